pub mod merge;
pub mod result;
pub mod tracker;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::gateway::types::{meta_str, ResourceMapping};
use crate::gateway::{ClusterGateway, KubeGateway};
use crate::manifest::{
    decode_all, gvk_label, parse_gvk, serialize, ResourceManifest, Scheme,
    LAST_APPLIED_ANNOTATION,
};
use merge::{is_empty_patch, three_way_merge_patch};

pub use result::ApplyResult;
pub use tracker::{classify, OutcomeTracker};

/// How an object is brought to its desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Three-way merge against the last applied manifest.
    Apply,
    /// Create, or overwrite whatever is there.
    CreateOrUpdate,
    /// Create; an existing object is a conflict.
    CreateOnly,
}

impl Strategy {
    fn verb(&self) -> &'static str {
        match self {
            Strategy::Apply => "apply",
            Strategy::CreateOrUpdate => "create-or-update",
            Strategy::CreateOnly => "create",
        }
    }
}

/// A manifest resolved against the cluster: where it goes and what to write.
struct Target {
    resource: ResourceMapping,
    namespace: Option<String>,
    name: String,
    object: Value,
}

impl Target {
    fn ns(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn describe(&self) -> String {
        self.resource.describe(self.ns(), &self.name)
    }
}

/// Converges cluster objects toward manifests and reports what it did.
pub struct Applier {
    gateway: Arc<dyn ClusterGateway>,
    scheme: Scheme,
    namespace: String,
    enforce_namespace: bool,
    validate: bool,
}

impl Applier {
    pub fn new(gateway: Arc<dyn ClusterGateway>, scheme: Scheme) -> Self {
        Self {
            gateway,
            scheme,
            namespace: "default".to_string(),
            enforce_namespace: false,
            validate: true,
        }
    }

    /// Namespace used for namespaced objects that do not name one. With
    /// `enforce`, objects naming a different namespace are rejected.
    pub fn with_namespace(mut self, namespace: &str, enforce: bool) -> Self {
        self.namespace = namespace.to_string();
        self.enforce_namespace = enforce;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Build an applier talking to the cluster described by `config`.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let mut scheme = Scheme::with_builtins();
        for kind in &config.apply.kinds {
            scheme.register_gvk(parse_gvk(kind)?);
        }

        let gateway = KubeGateway::new(&config.cluster, &config.apply.field_manager).await?;

        Ok(Self::new(Arc::new(gateway), scheme)
            .with_namespace(&config.cluster.namespace, config.cluster.enforce_namespace)
            .with_validation(config.apply.validate))
    }

    pub fn gateway(&self) -> Arc<dyn ClusterGateway> {
        Arc::clone(&self.gateway)
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Converge the objects in `obj` with a three-way merge.
    pub async fn apply(&self, obj: &[u8]) -> Result<ApplyResult> {
        self.run(obj, Strategy::Apply).await
    }

    /// Serialize `obj` through `scheme`, then [`Applier::apply`] it.
    pub async fn apply_typed<T: Serialize + 'static>(
        &self,
        obj: &T,
        scheme: &Scheme,
    ) -> Result<ApplyResult> {
        let data = serialize_typed(obj, scheme)?;
        self.apply(&data).await
    }

    /// Create missing objects and overwrite existing ones, without merging.
    pub async fn create_or_update(&self, obj: &[u8]) -> Result<ApplyResult> {
        self.run(obj, Strategy::CreateOrUpdate).await
    }

    pub async fn create_or_update_typed<T: Serialize + 'static>(
        &self,
        obj: &T,
        scheme: &Scheme,
    ) -> Result<ApplyResult> {
        let data = serialize_typed(obj, scheme)?;
        self.create_or_update(&data).await
    }

    /// Create the objects; fails with a conflict if one already exists.
    pub async fn create(&self, obj: &[u8]) -> Result<ApplyResult> {
        self.run(obj, Strategy::CreateOnly).await
    }

    pub async fn create_typed<T: Serialize + 'static>(
        &self,
        obj: &T,
        scheme: &Scheme,
    ) -> Result<ApplyResult> {
        let data = serialize_typed(obj, scheme)?;
        self.create(&data).await
    }

    async fn run(&self, obj: &[u8], strategy: Strategy) -> Result<ApplyResult> {
        let manifests = match decode_all(obj, &self.scheme) {
            Ok(manifests) => manifests,
            Err(e) => {
                tracing::warn!(error = %e, "cannot decode manifest");
                return Err(e);
            }
        };

        let mut tracker = OutcomeTracker::new();
        for manifest in &manifests {
            match self.converge(manifest, strategy).await {
                Ok(outcome) => {
                    tracing::info!(
                        kind = %gvk_label(&manifest.gvk),
                        name = %manifest.key(),
                        result = %outcome,
                        "Converged object"
                    );
                    tracker.observe(outcome);
                }
                Err(e) => {
                    tracing::warn!(
                        kind = %gvk_label(&manifest.gvk),
                        name = %manifest.key(),
                        error = %e,
                        "running the {} command failed",
                        strategy.verb()
                    );
                    return Err(e);
                }
            }
        }

        if manifests.len() != 1 {
            tracing::debug!(
                objects = manifests.len(),
                "Outcome cannot be classified for this input"
            );
        }
        Ok(tracker.result())
    }

    async fn converge(&self, manifest: &ResourceManifest, strategy: Strategy) -> Result<ApplyResult> {
        let target = self.prepare(manifest).await?;
        match strategy {
            Strategy::Apply => self.merge_apply(&target).await,
            Strategy::CreateOrUpdate => self.create_or_replace(&target).await,
            Strategy::CreateOnly => {
                self.gateway
                    .create(&target.resource, target.ns(), &target.object)
                    .await?;
                Ok(ApplyResult::Created)
            }
        }
    }

    async fn prepare(&self, manifest: &ResourceManifest) -> Result<Target> {
        if self.validate {
            self.gateway.validate(manifest).await?;
        }

        let resource = self.gateway.resolve(&manifest.gvk).await?;
        let namespace = if resource.namespaced {
            match &manifest.namespace {
                Some(ns) if self.enforce_namespace && *ns != self.namespace => {
                    return Err(AppError::validation(format!(
                        "the namespace from the provided object {ns:?} does not match the namespace {:?}",
                        self.namespace
                    )));
                }
                Some(ns) => Some(ns.clone()),
                None => Some(self.namespace.clone()),
            }
        } else {
            None
        };

        let mut object = manifest.object.clone();
        if let Some(metadata) = metadata_mut(&mut object) {
            match &namespace {
                Some(ns) => {
                    metadata.insert("namespace".to_string(), Value::String(ns.clone()));
                }
                None => {
                    metadata.remove("namespace");
                }
            }
        }

        Ok(Target {
            resource,
            namespace,
            name: manifest.name.clone(),
            object,
        })
    }

    async fn merge_apply(&self, target: &Target) -> Result<ApplyResult> {
        let modified = with_last_applied(&target.object)?;

        let live = match self
            .gateway
            .get(&target.resource, target.ns(), &target.name)
            .await
        {
            Ok(live) => live,
            Err(e) if e.is_not_found() => {
                return match self
                    .gateway
                    .create(&target.resource, target.ns(), &modified)
                    .await
                {
                    Ok(_) => Ok(ApplyResult::Created),
                    Err(e) if e.is_field_too_long() => self.fallback(target, &e).await,
                    Err(e) => Err(e),
                };
            }
            Err(e) => return Err(e),
        };

        let original = last_applied(&live);
        let patch = three_way_merge_patch(original.as_ref(), &modified, &live);
        if is_empty_patch(&patch) {
            return Ok(ApplyResult::Unchanged);
        }

        tracing::debug!(object = %target.describe(), patch = %patch, "Patching object");
        match self
            .gateway
            .patch(&target.resource, target.ns(), &target.name, &patch)
            .await
        {
            Ok(_) => Ok(ApplyResult::Configured),
            Err(e) if e.is_field_too_long() => self.fallback(target, &e).await,
            Err(e) => Err(e),
        }
    }

    /// The last-applied annotation did not fit; converge without it.
    async fn fallback(&self, target: &Target, cause: &AppError) -> Result<ApplyResult> {
        tracing::warn!(
            object = %target.describe(),
            error = %cause,
            "last-applied configuration too large, falling back to create-or-update"
        );
        self.create_or_replace(target).await
    }

    async fn create_or_replace(&self, target: &Target) -> Result<ApplyResult> {
        match self
            .gateway
            .get(&target.resource, target.ns(), &target.name)
            .await
        {
            Err(e) if e.is_not_found() => {
                self.gateway
                    .create(&target.resource, target.ns(), &target.object)
                    .await?;
                Ok(ApplyResult::Created)
            }
            Err(e) => Err(e),
            Ok(live) => {
                let mut object = target.object.clone();
                if let (Some(version), Some(metadata)) =
                    (meta_str(&live, "resourceVersion"), metadata_mut(&mut object))
                {
                    metadata.insert(
                        "resourceVersion".to_string(),
                        Value::String(version.to_string()),
                    );
                }
                self.gateway
                    .replace(&target.resource, target.ns(), &target.name, &object)
                    .await?;
                Ok(ApplyResult::Configured)
            }
        }
    }
}

fn serialize_typed<T: Serialize + 'static>(obj: &T, scheme: &Scheme) -> Result<Vec<u8>> {
    serialize(obj, scheme).map_err(|e| {
        tracing::warn!(error = %e, "cannot serialize typed object");
        e
    })
}

fn metadata_mut(object: &mut Value) -> Option<&mut Map<String, Value>> {
    let map = object.as_object_mut()?;
    let metadata = map
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    metadata.as_object_mut()
}

/// `object` with the last-applied annotation set to its own encoding.
fn with_last_applied(object: &Value) -> Result<Value> {
    let mut modified = object.clone();
    let Some(metadata) = metadata_mut(&mut modified) else {
        return Ok(modified);
    };

    let annotations = metadata
        .entry("annotations")
        .or_insert_with(|| Value::Object(Map::new()));
    if !annotations.is_object() {
        *annotations = Value::Object(Map::new());
    }
    if let Some(annotations) = annotations.as_object_mut() {
        annotations.remove(LAST_APPLIED_ANNOTATION);
        if annotations.is_empty() {
            metadata.remove("annotations");
        }
    }

    let encoded = serde_json::to_string(&modified)?;
    if let Some(annotations) = metadata_mut(&mut modified).and_then(|m| {
        m.entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
    }) {
        annotations.insert(LAST_APPLIED_ANNOTATION.to_string(), Value::String(encoded));
    }
    Ok(modified)
}

fn last_applied(live: &Value) -> Option<Value> {
    let raw = live
        .get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| a.get(LAST_APPLIED_ANNOTATION))
        .and_then(Value::as_str)?;
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unparsable last-applied configuration");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StatusCause, FIELD_VALUE_TOO_LONG};
    use crate::gateway::InMemoryGateway;
    use crate::manifest::GroupVersionKind;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn setup() -> (Arc<InMemoryGateway>, Applier) {
        let gateway = Arc::new(InMemoryGateway::new());
        let applier = Applier::new(gateway.clone(), Scheme::with_builtins());
        (gateway, applier)
    }

    fn config_map(value: &str) -> Vec<u8> {
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  k: {value}\n")
            .into_bytes()
    }

    async fn live_config_map(gateway: &InMemoryGateway, name: &str) -> Value {
        let resource = gateway
            .resolve(&GroupVersionKind::gvk("", "v1", "ConfigMap"))
            .await
            .unwrap();
        gateway.get(&resource, Some("default"), name).await.unwrap()
    }

    #[tokio::test]
    async fn test_created_unchanged_configured() {
        let (gateway, applier) = setup();

        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Created);
        assert_eq!(live_config_map(&gateway, "a").await["data"]["k"], "v1");

        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Unchanged);

        assert_eq!(applier.apply(&config_map("v2")).await.unwrap(), ApplyResult::Configured);
        assert_eq!(live_config_map(&gateway, "a").await["data"]["k"], "v2");

        assert_eq!(applier.apply(&config_map("v2")).await.unwrap(), ApplyResult::Unchanged);

        let calls = gateway.calls();
        assert_eq!(calls.create, 1);
        assert_eq!(calls.patch, 1);
        assert_eq!(calls.replace, 0);
    }

    #[tokio::test]
    async fn test_created_object_records_last_applied() {
        let (gateway, applier) = setup();
        applier.apply(&config_map("v1")).await.unwrap();

        let live = live_config_map(&gateway, "a").await;
        let recorded = last_applied(&live).unwrap();
        assert_eq!(recorded["data"]["k"], "v1");
        assert_eq!(recorded["metadata"]["namespace"], "default");
        assert!(recorded["metadata"].get("annotations").is_none());
    }

    #[tokio::test]
    async fn test_malformed_bytes_issue_no_calls() {
        let (gateway, applier) = setup();
        let err = applier.apply(b"not-json-or-yaml").await.unwrap_err();
        assert!(matches!(err, AppError::Decode(_)));
        assert_eq!(gateway.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_get_failure_propagates_without_create() {
        let (gateway, applier) = setup();
        gateway.fail_next_get(AppError::Api {
            code: 503,
            reason: "Service Unavailable".to_string(),
            message: "etcd unavailable".to_string(),
        });
        let err = applier.apply(&config_map("v1")).await.unwrap_err();
        assert!(matches!(err, AppError::Api { code: 503, .. }));
        assert_eq!(gateway.calls().create, 0);
        assert!(gateway.is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_surfaces_unmodified() {
        let (gateway, applier) = setup();
        gateway.fail_next_get(AppError::Forbidden("configmaps is forbidden".to_string()));
        let err = applier.apply(&config_map("v1")).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_batch_and_empty_input_are_unknown() {
        let (gateway, applier) = setup();
        let batch = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n";
        assert_eq!(applier.apply(batch).await.unwrap(), ApplyResult::Unknown);
        assert_eq!(gateway.len(), 2);

        assert_eq!(applier.apply(b"").await.unwrap(), ApplyResult::Unknown);
        assert_eq!(applier.apply(b"---\n").await.unwrap(), ApplyResult::Unknown);
    }

    #[tokio::test]
    async fn test_typed_matches_untyped() {
        let (gateway, applier) = setup();
        let scheme = Scheme::with_builtins();
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("a".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), "v1".to_string())])),
            ..ConfigMap::default()
        };

        assert_eq!(applier.apply_typed(&cm, &scheme).await.unwrap(), ApplyResult::Created);
        let bytes = serialize(&cm, &scheme).unwrap();
        assert_eq!(applier.apply(&bytes).await.unwrap(), ApplyResult::Unchanged);
        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Unchanged);
        assert_eq!(gateway.calls().writes(), 1);
    }

    #[tokio::test]
    async fn test_typed_serialize_failure() {
        #[derive(Serialize)]
        struct Unregistered {
            name: String,
        }
        let (gateway, applier) = setup();
        let obj = Unregistered {
            name: "a".to_string(),
        };
        let err = applier
            .apply_typed(&obj, &Scheme::with_builtins())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Serialize(_)));
        assert_eq!(gateway.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_removed_field_is_deleted() {
        let (gateway, applier) = setup();
        let two_keys = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\ndata:\n  k: v1\n  old: x\n";
        applier.apply(two_keys).await.unwrap();

        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Configured);
        let live = live_config_map(&gateway, "a").await;
        assert_eq!(live["data"], json!({"k": "v1"}));
    }

    #[tokio::test]
    async fn test_unmanaged_drift_is_kept_and_managed_drift_reverted() {
        let (gateway, applier) = setup();
        applier.apply(&config_map("v1")).await.unwrap();
        let resource = gateway
            .resolve(&GroupVersionKind::gvk("", "v1", "ConfigMap"))
            .await
            .unwrap();

        gateway
            .patch(
                &resource,
                Some("default"),
                "a",
                &json!({"metadata": {"labels": {"owner": "ops"}}}),
            )
            .await
            .unwrap();
        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Unchanged);

        gateway
            .patch(&resource, Some("default"), "a", &json!({"data": {"k": "drift"}}))
            .await
            .unwrap();
        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Configured);

        let live = live_config_map(&gateway, "a").await;
        assert_eq!(live["data"]["k"], "v1");
        assert_eq!(live["metadata"]["labels"]["owner"], "ops");
    }

    #[tokio::test]
    async fn test_apply_over_object_without_annotation() {
        let (_gateway, applier) = setup();
        assert_eq!(applier.create(&config_map("v1")).await.unwrap(), ApplyResult::Created);
        // First apply only adds the annotation
        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Configured);
        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Unchanged);
    }

    #[tokio::test]
    async fn test_create_only_conflicts_on_existing() {
        let (gateway, applier) = setup();
        assert_eq!(applier.create(&config_map("v1")).await.unwrap(), ApplyResult::Created);
        let err = applier.create(&config_map("v1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(gateway.calls().get, 0);
    }

    #[tokio::test]
    async fn test_create_or_update_overwrites() {
        let (gateway, applier) = setup();
        assert_eq!(
            applier.create_or_update(&config_map("v1")).await.unwrap(),
            ApplyResult::Created
        );
        assert_eq!(
            applier.create_or_update(&config_map("v2")).await.unwrap(),
            ApplyResult::Configured
        );
        assert_eq!(live_config_map(&gateway, "a").await["data"]["k"], "v2");
        assert_eq!(gateway.calls().replace, 1);

        let scheme = Scheme::with_builtins();
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("b".to_string()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        };
        assert_eq!(
            applier.create_or_update_typed(&cm, &scheme).await.unwrap(),
            ApplyResult::Created
        );
        assert!(applier.create_typed(&cm, &scheme).await.is_err());
    }

    #[tokio::test]
    async fn test_namespace_defaulting_and_enforcement() {
        let gateway = Arc::new(InMemoryGateway::new());
        let applier = Applier::new(gateway.clone(), Scheme::with_builtins()).with_namespace("team", true);

        applier.apply(&config_map("v1")).await.unwrap();
        let resource = gateway
            .resolve(&GroupVersionKind::gvk("", "v1", "ConfigMap"))
            .await
            .unwrap();
        assert!(gateway.get(&resource, Some("team"), "a").await.is_ok());

        let elsewhere = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: b\n  namespace: other\n";
        let before = gateway.calls().get;
        let err = applier.apply(elsewhere).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(gateway.calls().get, before);
    }

    #[tokio::test]
    async fn test_cluster_scoped_kind_drops_namespace() {
        let (gateway, applier) = setup();
        let ns = b"apiVersion: v1\nkind: Namespace\nmetadata:\n  name: team\n  namespace: ignored\n";
        assert_eq!(applier.apply(ns).await.unwrap(), ApplyResult::Created);
        assert_eq!(applier.apply(ns).await.unwrap(), ApplyResult::Unchanged);

        let resource = gateway
            .resolve(&GroupVersionKind::gvk("", "v1", "Namespace"))
            .await
            .unwrap();
        let live = gateway.get(&resource, None, "team").await.unwrap();
        assert!(live["metadata"].get("namespace").is_none());
    }

    #[tokio::test]
    async fn test_field_too_long_falls_back() {
        let (gateway, applier) = setup();
        gateway.fail_next_write(AppError::Validation {
            message: "metadata.annotations: Too long".to_string(),
            causes: vec![StatusCause {
                reason: FIELD_VALUE_TOO_LONG.to_string(),
                message: "Too long: must have at most 262144 bytes".to_string(),
                field: "metadata.annotations".to_string(),
            }],
        });
        assert_eq!(applier.apply(&config_map("v1")).await.unwrap(), ApplyResult::Created);
        assert_eq!(gateway.calls().create, 2);

        let live = live_config_map(&gateway, "a").await;
        assert!(last_applied(&live).is_none());
    }

    #[tokio::test]
    async fn test_other_field_too_long_surfaces() {
        let (gateway, applier) = setup();
        gateway.fail_next_write(AppError::Validation {
            message: "data.k: Too long".to_string(),
            causes: vec![StatusCause {
                reason: FIELD_VALUE_TOO_LONG.to_string(),
                message: "Too long: must have at most 1048576 bytes".to_string(),
                field: "data.k".to_string(),
            }],
        });
        let err = applier.apply(&config_map("v1")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(gateway.calls().create, 1);
        assert!(gateway.is_empty());
    }

    #[tokio::test]
    async fn test_validation_runs_before_any_call() {
        let (gateway, applier) = setup();
        let bad = b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: Not_Valid\n";
        let err = applier.apply(bad).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(gateway.calls().total(), 0);

        let lenient = Applier::new(gateway.clone(), Scheme::with_builtins()).with_validation(false);
        assert_eq!(lenient.apply(bad).await.unwrap(), ApplyResult::Created);
    }

    #[tokio::test]
    async fn test_kind_without_mapping() {
        let (_gateway, applier) = setup();
        let pod = b"apiVersion: v1\nkind: Pod\nmetadata:\n  name: p\n";
        let err = applier.apply(pod).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownKind(_)));
    }

    #[test]
    fn test_with_last_applied_replaces_previous_annotation() {
        let object = json!({
            "metadata": {
                "name": "a",
                "annotations": {LAST_APPLIED_ANNOTATION: "stale", "team": "core"}
            },
            "data": {"k": "v1"}
        });
        let modified = with_last_applied(&object).unwrap();
        let recorded = last_applied(&modified).unwrap();
        assert_eq!(
            recorded,
            json!({"metadata": {"name": "a", "annotations": {"team": "core"}}, "data": {"k": "v1"}})
        );
        assert_eq!(modified["metadata"]["annotations"]["team"], "core");
    }

    #[tokio::test]
    async fn test_from_config_registers_kinds() {
        let mut config = AppConfig::default();
        config.cluster.server = Some("http://127.0.0.1:6443".to_string());
        config.apply.kinds = vec!["hive.openshift.io/v1/HiveConfig".to_string()];
        let applier = Applier::from_config(&config).await.unwrap();
        assert!(applier
            .scheme()
            .recognizes(&GroupVersionKind::gvk("hive.openshift.io", "v1", "HiveConfig")));

        config.apply.kinds = vec!["HiveConfig".to_string()];
        assert!(matches!(
            Applier::from_config(&config).await,
            Err(AppError::Config(_))
        ));
    }
}
