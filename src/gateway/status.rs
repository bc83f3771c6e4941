use crate::error::{AppError, StatusCause, FIELD_VALUE_TOO_LONG};

/// Marker the API server puts after a field path that exceeded its limit.
const TOO_LONG_MARKER: &str = ": Too long";

/// Map a client error to the error taxonomy, prefixing `context`.
pub fn from_kube(error: kube::Error, context: &str) -> AppError {
    match error {
        kube::Error::Api(response) => {
            api_error(response.code, &response.reason, &response.message, context)
        }
        other => AppError::Kube(other),
    }
}

/// Map a failed API call by its HTTP code.
pub fn api_error(code: u16, reason: &str, message: &str, context: &str) -> AppError {
    let text = if message.is_empty() {
        format!("{context}: {reason}")
    } else {
        format!("{context}: {message}")
    };
    match code {
        404 => AppError::NotFound(text),
        409 => AppError::Conflict(text),
        410 => AppError::Expired(text),
        422 => AppError::Validation {
            message: text,
            causes: causes_from_message(message),
        },
        401 | 403 => AppError::Forbidden(text),
        code => AppError::Api {
            code,
            reason: reason.to_string(),
            message: text,
        },
    }
}

/// Recover `FieldValueTooLong` causes from an `Invalid` status message such
/// as `ConfigMap "a" is invalid: metadata.annotations: Too long: ...`.
fn causes_from_message(message: &str) -> Vec<StatusCause> {
    message
        .match_indices(TOO_LONG_MARKER)
        .filter_map(|(at, _)| {
            let field = message[..at].rsplit(|c: char| c == ' ' || c == '[').next()?;
            (!field.is_empty()).then(|| StatusCause {
                reason: FIELD_VALUE_TOO_LONG.to_string(),
                message: message[at + 2..]
                    .split(", ")
                    .next()
                    .unwrap_or_default()
                    .trim_end_matches(']')
                    .to_string(),
                field: field.to_string(),
            })
        })
        .collect()
}
