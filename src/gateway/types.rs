use kube::discovery::ApiResource;
use serde_json::Value;

use crate::manifest::GroupVersionKind;

/// REST mapping of a kind: kube's `ApiResource` plus whether its objects
/// live inside a namespace.
#[derive(Debug, Clone)]
pub struct ResourceMapping {
    pub api: ApiResource,
    pub namespaced: bool,
}

impl ResourceMapping {
    pub fn new(gvk: &GroupVersionKind, plural: &str, namespaced: bool) -> Self {
        Self {
            api: ApiResource::from_gvk_with_plural(gvk, plural),
            namespaced,
        }
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.api.group, &self.api.version, &self.api.kind)
    }

    /// Lowercase plural used in URLs, e.g. `configmaps`.
    pub fn plural(&self) -> &str {
        &self.api.plural
    }

    /// The namespace a request is scoped to; always `None` for cluster-scoped
    /// kinds.
    pub fn scope<'a>(&self, namespace: Option<&'a str>) -> Option<&'a str> {
        namespace.filter(|_| self.namespaced)
    }

    /// Human readable reference used in error messages.
    pub fn describe(&self, namespace: Option<&str>, name: &str) -> String {
        match self.scope(namespace) {
            Some(ns) => format!("{} \"{ns}/{name}\"", self.api.plural),
            None => format!("{} \"{name}\"", self.api.plural),
        }
    }
}

/// Label and field selectors narrowing a watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl Selectors {
    pub fn labels(selector: &str) -> Self {
        Self {
            label_selector: Some(selector.to_string()),
            ..Self::default()
        }
    }

    /// Equality-based label matching (`a=b,c=d`). Set-based terms are left
    /// to the API server and match everything here.
    pub fn matches_labels(&self, object: &Value) -> bool {
        let Some(selector) = &self.label_selector else {
            return true;
        };
        let labels = object.get("metadata").and_then(|m| m.get("labels"));
        selector
            .split(',')
            .filter_map(|term| term.split_once('='))
            .all(|(key, value)| {
                if key.ends_with('!') {
                    return true;
                }
                let value = value.strip_prefix('=').unwrap_or(value);
                labels
                    .and_then(|l| l.get(key.trim()))
                    .and_then(Value::as_str)
                    == Some(value.trim())
            })
    }
}

/// String field of an object's `metadata`.
pub fn meta_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_str)
}
