use serde::Deserialize;
use thiserror::Error;

/// A single cause reported by the API server inside a `Status` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusCause {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub field: String,
}

/// Cause reason the API server uses when a field exceeds its size limit.
pub const FIELD_VALUE_TOO_LONG: &str = "FieldValueTooLong";

/// Field holding the last-applied annotation.
pub const ANNOTATIONS_FIELD: &str = "metadata.annotations";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Cannot construct cluster gateway: {0}")]
    GatewayConstruction(String),

    #[error("No resource mapping for {0}")]
    UnknownKind(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        causes: Vec<StatusCause>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource version expired: {0}")]
    Expired(String),

    #[error("API server returned {code} {reason}: {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// True when the server rejected the annotations for being too long,
    /// which for apply means the last-applied annotation did not fit.
    pub fn is_field_too_long(&self) -> bool {
        match self {
            AppError::Validation { causes, .. } => causes
                .iter()
                .any(|c| c.reason == FIELD_VALUE_TOO_LONG && c.field == ANNOTATIONS_FIELD),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
