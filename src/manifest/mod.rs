pub mod decode;
pub mod scheme;
pub mod validate;

pub use kube::core::GroupVersionKind;
use serde_json::Value;

use crate::error::{AppError, Result};

pub use decode::{decode, decode_all};
pub use scheme::{serialize, Scheme};

/// Annotation holding the manifest that was last applied to an object.
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Build a GVK from the `apiVersion` and `kind` fields of an object.
pub fn gvk_from_api_version(api_version: &str, kind: &str) -> Result<GroupVersionKind> {
    if kind.is_empty() {
        return Err(AppError::Decode("kind is empty".to_string()));
    }
    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    };
    if version.is_empty() || version.contains('/') {
        return Err(AppError::Decode(format!(
            "invalid apiVersion: {api_version:?}"
        )));
    }
    Ok(GroupVersionKind::gvk(group, version, kind))
}

/// Parse `group/version/Kind`, or `version/Kind` for the core group.
pub fn parse_gvk(reference: &str) -> Result<GroupVersionKind> {
    let parts: Vec<&str> = reference.split('/').collect();
    match parts.as_slice() {
        [version, kind] => gvk_from_api_version(version, kind),
        [group, version, kind] => gvk_from_api_version(&format!("{group}/{version}"), kind),
        _ => Err(AppError::Config(format!(
            "expected group/version/Kind, got {reference:?}"
        ))),
    }
}

/// `apps/v1, Kind=Deployment`, for messages and logs.
pub fn gvk_label(gvk: &GroupVersionKind) -> String {
    format!("{}, Kind={}", gvk.api_version(), gvk.kind)
}

/// A decoded desired object: its type, identity and full field tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceManifest {
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
    pub object: Value,
}

impl ResourceManifest {
    /// Extract identity from a JSON object tree.
    pub fn from_value(object: Value) -> Result<Self> {
        if !object.is_object() {
            return Err(AppError::Decode(format!(
                "expected an object, got {}",
                type_name(&object)
            )));
        }
        let api_version = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Decode("missing apiVersion".to_string()))?;
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Decode("missing kind".to_string()))?;
        let gvk = gvk_from_api_version(api_version, kind)?;

        let metadata = object.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                AppError::Decode(format!("{}: missing metadata.name", gvk_label(&gvk)))
            })?
            .to_string();
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        Ok(Self {
            gvk,
            namespace,
            name,
            object,
        })
    }

    /// `namespace/name`, or just `name` for unscoped objects.
    pub fn key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
