use serde_json::Value;

use crate::error::{AppError, Result};
use crate::manifest::{gvk_label, ResourceManifest};

const MAX_SUBDOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Structural checks every API server applies regardless of kind.
pub fn validate_object(manifest: &ResourceManifest) -> Result<()> {
    let gvk = gvk_label(&manifest.gvk);
    let name = &manifest.name;

    if !is_dns_subdomain(name) {
        return Err(AppError::validation(format!(
            "{gvk} {name:?}: metadata.name must be a lowercase RFC 1123 subdomain of at most {MAX_SUBDOMAIN_LEN} characters"
        )));
    }

    if let Some(ns) = &manifest.namespace {
        if !is_dns_label(ns) {
            return Err(AppError::validation(format!(
                "{gvk} {name:?}: metadata.namespace {ns:?} must be a lowercase RFC 1123 label"
            )));
        }
    }

    let metadata = manifest.object.get("metadata");
    for field in ["labels", "annotations"] {
        match metadata.and_then(|m| m.get(field)) {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                if let Some((key, _)) = map.iter().find(|(_, v)| !v.is_string()) {
                    return Err(AppError::validation(format!(
                        "{gvk} {name:?}: metadata.{field}.{key} must be a string"
                    )));
                }
            }
            Some(_) => {
                return Err(AppError::validation(format!(
                    "{gvk} {name:?}: metadata.{field} must be a map of strings"
                )));
            }
        }
    }

    Ok(())
}

fn is_dns_label(s: &str) -> bool {
    s.len() <= MAX_LABEL_LEN
        && !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

fn is_dns_subdomain(s: &str) -> bool {
    s.len() <= MAX_SUBDOMAIN_LEN && s.split('.').all(is_dns_label)
}
