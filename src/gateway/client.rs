use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::config::{
    AuthInfo, Cluster, Context, KubeConfigOptions, Kubeconfig, NamedAuthInfo, NamedCluster,
    NamedContext,
};
use kube::discovery::{oneshot::pinned_kind, Scope};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Config};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::ClusterConfig;
use crate::error::{AppError, Result};
use crate::gateway::status;
use crate::gateway::types::*;
use crate::gateway::{ClusterGateway, WatchStream};
use crate::manifest::{gvk_label, GroupVersionKind};

/// Name of the single cluster, user and context built from explicit settings.
const CONTEXT_NAME: &str = "converge";

/// Gateway backed by a `kube::Client`.
pub struct KubeGateway {
    client: Client,
    field_manager: String,
    request_timeout: Duration,
    /// Cache of resolved kinds
    discovery: Arc<RwLock<HashMap<GroupVersionKind, ResourceMapping>>>,
}

impl KubeGateway {
    /// Connect using the explicit server settings in `config`, or the
    /// kubeconfig / in-cluster environment when no server is set.
    pub async fn new(config: &ClusterConfig, field_manager: &str) -> Result<Self> {
        let mut kube_config = match &config.server {
            Some(server) => explicit_config(config, server).await?,
            None => inferred_config(config).await?,
        };
        kube_config.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));

        let client = Client::try_from(kube_config).map_err(|e| {
            AppError::GatewayConstruction(format!("Failed to build Kubernetes client: {e}"))
        })?;

        Ok(Self::from_client(
            client,
            field_manager,
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    pub fn from_client(client: Client, field_manager: &str, request_timeout: Duration) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
            request_timeout,
            discovery: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn api(&self, resource: &ResourceMapping, namespace: Option<&str>) -> Api<DynamicObject> {
        match resource.scope(namespace) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource.api),
            None => Api::all_with(self.client.clone(), &resource.api),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    /// Await one API call under the request timeout.
    async fn call<T, F>(&self, context: &str, request: F) -> Result<T>
    where
        F: Future<Output = kube::Result<T>>,
    {
        tracing::debug!(request = %context, "Calling API server");
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result.map_err(|e| status::from_kube(e, context)),
            Err(_) => Err(AppError::Timeout(format!(
                "{context}: no response within {}s",
                self.request_timeout.as_secs()
            ))),
        }
    }
}

async fn explicit_config(config: &ClusterConfig, server: &str) -> Result<Config> {
    if !server.starts_with("https://") && !server.starts_with("http://") {
        return Err(AppError::GatewayConstruction(format!(
            "Expected an http(s) server URL, got: {server}"
        )));
    }
    if config.insecure_skip_tls_verify {
        tracing::warn!(server = %server, "TLS verification disabled");
    }

    let kubeconfig = Kubeconfig {
        clusters: vec![NamedCluster {
            name: CONTEXT_NAME.to_string(),
            cluster: Some(Cluster {
                server: Some(server.to_string()),
                insecure_skip_tls_verify: Some(config.insecure_skip_tls_verify),
                certificate_authority: config
                    .certificate_authority
                    .as_ref()
                    .map(|p| p.display().to_string()),
                certificate_authority_data: config.certificate_authority_data.clone(),
                ..Default::default()
            }),
        }],
        contexts: vec![NamedContext {
            name: CONTEXT_NAME.to_string(),
            context: Some(Context {
                cluster: CONTEXT_NAME.to_string(),
                user: Some(CONTEXT_NAME.to_string()),
                namespace: Some(config.namespace.clone()),
                ..Default::default()
            }),
        }],
        auth_infos: vec![NamedAuthInfo {
            name: CONTEXT_NAME.to_string(),
            auth_info: Some(AuthInfo {
                token: config.token.clone().map(Into::into),
                token_file: config.token_file.as_ref().map(|p| p.display().to_string()),
                ..Default::default()
            }),
        }],
        current_context: Some(CONTEXT_NAME.to_string()),
        ..Default::default()
    };

    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| AppError::GatewayConstruction(format!("Invalid cluster settings: {e}")))
}

async fn inferred_config(config: &ClusterConfig) -> Result<Config> {
    match &config.context {
        Some(context) => {
            tracing::debug!(context = %context, "Using kubeconfig context");
            Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.clone()),
                ..Default::default()
            })
            .await
            .map_err(|e| {
                AppError::GatewayConstruction(format!("Failed to load context {context}: {e}"))
            })
        }
        None => Config::infer().await.map_err(|e| {
            AppError::GatewayConstruction(format!("Failed to infer cluster config: {e}"))
        }),
    }
}

fn to_dynamic(object: &Value) -> Result<DynamicObject> {
    Ok(serde_json::from_value(object.clone())?)
}

fn to_value(object: DynamicObject) -> Result<Value> {
    Ok(serde_json::to_value(object)?)
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping> {
        // Check cache
        {
            let cache = self.discovery.read().await;
            if let Some(mapping) = cache.get(gvk) {
                return Ok(mapping.clone());
            }
        }

        let context = format!("discover {}", gvk_label(gvk));
        let (api, capabilities) = self
            .call(&context, pinned_kind(&self.client, gvk))
            .await
            .map_err(|e| match e {
                AppError::NotFound(_) | AppError::Kube(kube::Error::Discovery(_)) => {
                    AppError::UnknownKind(gvk_label(gvk))
                }
                other => other,
            })?;

        let mapping = ResourceMapping {
            api,
            namespaced: matches!(capabilities.scope, Scope::Namespaced),
        };
        tracing::debug!(
            api_version = %gvk.api_version(),
            kind = %gvk.kind,
            plural = %mapping.plural(),
            namespaced = mapping.namespaced,
            "Discovered API resource"
        );

        let mut cache = self.discovery.write().await;
        cache.insert(gvk.clone(), mapping.clone());

        Ok(mapping)
    }

    async fn get(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value> {
        let context = format!("get {}", resource.describe(namespace, name));
        let object = self
            .call(&context, self.api(resource, namespace).get(name))
            .await?;
        to_value(object)
    }

    async fn create(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value> {
        let name = meta_str(object, "name").unwrap_or_default();
        let context = format!("create {}", resource.describe(namespace, name));
        let api = self.api(resource, namespace);
        let created = self
            .call(&context, api.create(&self.post_params(), &to_dynamic(object)?))
            .await?;
        to_value(created)
    }

    async fn patch(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value> {
        let context = format!("patch {}", resource.describe(namespace, name));
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let api = self.api(resource, namespace);
        let patched = self
            .call(&context, api.patch(name, &params, &Patch::Merge(patch)))
            .await?;
        to_value(patched)
    }

    async fn replace(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> Result<Value> {
        let context = format!("replace {}", resource.describe(namespace, name));
        let api = self.api(resource, namespace);
        let replaced = self
            .call(
                &context,
                api.replace(name, &self.post_params(), &to_dynamic(object)?),
            )
            .await?;
        to_value(replaced)
    }

    async fn watch(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        selectors: &Selectors,
    ) -> Result<WatchStream> {
        let mut config = watcher::Config::default();
        if let Some(selector) = &selectors.label_selector {
            config = config.labels(selector);
        }
        if let Some(selector) = &selectors.field_selector {
            config = config.fields(selector);
        }

        let context = match resource.scope(namespace) {
            Some(ns) => format!("watch {} in {ns}", resource.plural()),
            None => format!("watch {}", resource.plural()),
        };
        tracing::debug!(request = %context, "Starting watcher");

        let stream = watcher::watcher(self.api(resource, namespace), config)
            .default_backoff()
            .map(move |event| event.map_err(|e| AppError::Watch(format!("{context}: {e}"))));
        Ok(stream.boxed())
    }
}
