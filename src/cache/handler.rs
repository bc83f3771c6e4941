use kube::api::DynamicObject;
use kube::ResourceExt;

use crate::cache::store::object_key;

/// Receives notifications as the cache changes.
///
/// Called inline by the reflector; implementations should return quickly.
pub trait ResourceEventHandler: Send + Sync {
    fn on_add(&self, object: &DynamicObject);

    /// `old` and `new` carry the same resource version on a resync.
    fn on_update(&self, old: &DynamicObject, new: &DynamicObject);

    fn on_delete(&self, object: &DynamicObject);
}

/// Logs every notification.
pub struct LoggingHandler;

impl ResourceEventHandler for LoggingHandler {
    fn on_add(&self, object: &DynamicObject) {
        tracing::info!(object = %object_key(object), "Object added");
    }

    fn on_update(&self, old: &DynamicObject, new: &DynamicObject) {
        if old.resource_version() == new.resource_version() {
            tracing::debug!(object = %object_key(new), "Object resynced");
        } else {
            tracing::info!(
                object = %object_key(new),
                resource_version = %new.resource_version().unwrap_or_default(),
                "Object updated"
            );
        }
    }

    fn on_delete(&self, object: &DynamicObject) {
        tracing::info!(object = %object_key(object), "Object deleted");
    }
}
