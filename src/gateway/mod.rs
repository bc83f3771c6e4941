pub mod client;
pub mod memory;
pub mod status;
pub mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::api::DynamicObject;
use kube::runtime::watcher;
use serde_json::Value;

use crate::error::Result;
use crate::manifest::validate::validate_object;
use crate::manifest::{GroupVersionKind, ResourceManifest};
use types::*;

pub use client::KubeGateway;
pub use memory::InMemoryGateway;

/// Watcher events for one collection: an initial listing bracketed by
/// `Init`/`InitDone`, then live changes. The stream recovers from transient
/// failures on its own; errors are reported inline and never end it.
pub type WatchStream = BoxStream<'static, Result<watcher::Event<DynamicObject>>>;

/// Access to a cluster API server.
///
/// Implementations own connection state and discovery caches; callers only
/// read through them.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Resolve the REST mapping of a kind.
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping>;

    /// Schema checks run before any write.
    async fn validate(&self, manifest: &ResourceManifest) -> Result<()> {
        validate_object(manifest)
    }

    async fn get(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value>;

    async fn create(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value>;

    /// Apply a JSON merge patch (RFC 7386) to an existing object.
    async fn patch(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value>;

    /// Overwrite an existing object. A `metadata.resourceVersion` in `object`
    /// makes the write conditional on it.
    async fn replace(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> Result<Value>;

    /// List then watch a collection, in every namespace when `namespace` is
    /// `None`.
    async fn watch(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        selectors: &Selectors,
    ) -> Result<WatchStream>;
}
