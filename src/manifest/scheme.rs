use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use kube::Resource;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::manifest::{gvk_from_api_version, gvk_label, GroupVersionKind};

/// Kinds every stock API server serves, keyed by api version.
const BUILTIN_KINDS: &[(&str, &[&str])] = &[
    (
        "v1",
        &[
            "ConfigMap",
            "Endpoints",
            "Namespace",
            "PersistentVolumeClaim",
            "Pod",
            "Secret",
            "Service",
            "ServiceAccount",
        ],
    ),
    (
        "apps/v1",
        &["DaemonSet", "Deployment", "ReplicaSet", "StatefulSet"],
    ),
    ("batch/v1", &["CronJob", "Job"]),
    (
        "rbac.authorization.k8s.io/v1",
        &["ClusterRole", "ClusterRoleBinding", "Role", "RoleBinding"],
    ),
    ("networking.k8s.io/v1", &["Ingress", "NetworkPolicy"]),
    ("apiextensions.k8s.io/v1", &["CustomResourceDefinition"]),
];

/// Registry of the kinds a caller accepts, plus Rust type bindings for
/// typed encoding.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: HashSet<GroupVersionKind>,
    types: HashMap<TypeId, GroupVersionKind>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheme knowing the stock kinds, with `ConfigMap` and `Namespace`
    /// bound to their k8s-openapi types.
    pub fn with_builtins() -> Self {
        let mut scheme = Self::new();
        for (api_version, kinds) in BUILTIN_KINDS {
            for kind in *kinds {
                if let Ok(gvk) = gvk_from_api_version(api_version, kind) {
                    scheme.register_gvk(gvk);
                }
            }
        }
        scheme.register_resource::<ConfigMap>();
        scheme.register_resource::<Namespace>();
        scheme
    }

    pub fn register_gvk(&mut self, gvk: GroupVersionKind) {
        self.kinds.insert(gvk);
    }

    /// Bind a Rust type to a kind; the kind becomes decodable too.
    pub fn register_type<T: 'static>(&mut self, gvk: GroupVersionKind) {
        self.kinds.insert(gvk.clone());
        self.types.insert(TypeId::of::<T>(), gvk);
    }

    /// Bind a statically typed resource under the kind it declares.
    pub fn register_resource<K: Resource<DynamicType = ()> + 'static>(&mut self) {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        self.register_type::<K>(gvk);
    }

    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains(gvk)
    }

    pub fn gvk_for<T: 'static>(&self) -> Option<&GroupVersionKind> {
        self.types.get(&TypeId::of::<T>())
    }
}

/// Encode a typed object to JSON bytes, stamping the `apiVersion` and `kind`
/// its type is registered under.
pub fn serialize<T: Serialize + 'static>(obj: &T, scheme: &Scheme) -> Result<Vec<u8>> {
    let gvk = scheme.gvk_for::<T>().ok_or_else(|| {
        AppError::Serialize(format!(
            "type {} is not registered in the scheme",
            type_name::<T>()
        ))
    })?;

    let label = gvk_label(gvk);

    let mut value = serde_json::to_value(obj)
        .map_err(|e| AppError::Serialize(format!("{label}: {e}")))?;
    let map = value.as_object_mut().ok_or_else(|| {
        AppError::Serialize(format!("{label}: object did not encode to a JSON object"))
    })?;
    map.insert("apiVersion".to_string(), Value::String(gvk.api_version()));
    map.insert("kind".to_string(), Value::String(gvk.kind.clone()));

    serde_json::to_vec(&value).map_err(|e| AppError::Serialize(format!("{label}: {e}")))
}
