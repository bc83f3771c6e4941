use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::manifest::{gvk_label, ResourceManifest, Scheme};

/// Decode bytes holding exactly one object.
pub fn decode(bytes: &[u8], scheme: &Scheme) -> Result<ResourceManifest> {
    let mut manifests = decode_all(bytes, scheme)?;
    match manifests.len() {
        1 => Ok(manifests.remove(0)),
        0 => Err(AppError::Decode("no object found in input".to_string())),
        n => Err(AppError::Decode(format!(
            "expected a single object, found {n}"
        ))),
    }
}

/// Decode every object in the input: JSON, single or multi-document YAML,
/// with `List` wrappers flattened.
pub fn decode_all(bytes: &[u8], scheme: &Scheme) -> Result<Vec<ResourceManifest>> {
    let mut manifests = Vec::new();
    for document in parse_documents(bytes)? {
        flatten(document, scheme, &mut manifests)?;
    }
    Ok(manifests)
}

fn parse_documents(bytes: &[u8]) -> Result<Vec<Value>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| AppError::Decode(format!("input is not valid UTF-8: {e}")))?;

    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| AppError::Decode(format!("invalid JSON: {e}")))?;
        return Ok(vec![value]);
    }

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)
            .map_err(|e| AppError::Decode(format!("invalid YAML: {e}")))?;
        // Empty documents between separators
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

fn flatten(value: Value, scheme: &Scheme, out: &mut Vec<ResourceManifest>) -> Result<()> {
    if is_list(&value) {
        let items = match value {
            Value::Object(mut map) => map.remove("items").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        return match items {
            Value::Array(items) => items
                .into_iter()
                .try_for_each(|item| flatten(item, scheme, out)),
            Value::Null => Ok(()),
            _ => Err(AppError::Decode("List items must be an array".to_string())),
        };
    }

    let manifest = ResourceManifest::from_value(value)?;
    if !scheme.recognizes(&manifest.gvk) {
        return Err(AppError::Decode(format!(
            "no kind {} is registered",
            gvk_label(&manifest.gvk)
        )));
    }
    out.push(manifest);
    Ok(())
}

fn is_list(value: &Value) -> bool {
    value
        .get("kind")
        .and_then(Value::as_str)
        .map_or(false, |kind| {
            kind == "List" || (kind.ends_with("List") && value.get("items").is_some())
        })
}
