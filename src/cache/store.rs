use std::sync::Arc;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;

/// `namespace/name` for namespaced objects, `name` otherwise.
pub fn object_key(object: &DynamicObject) -> String {
    let name = object.name_any();
    match object.namespace() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name,
    }
}

/// Read-only view over a reflector's store.
#[derive(Clone)]
pub struct Lister {
    store: Store<DynamicObject>,
    resource: ApiResource,
}

impl Lister {
    pub fn new(store: Store<DynamicObject>, resource: ApiResource) -> Self {
        Self { store, resource }
    }

    /// Cached objects ordered by key, limited to `namespace` when given.
    pub fn list(&self, namespace: Option<&str>) -> Vec<Arc<DynamicObject>> {
        let mut objects: Vec<_> = self
            .store
            .state()
            .into_iter()
            .filter(|obj| namespace.map_or(true, |ns| obj.metadata.namespace.as_deref() == Some(ns)))
            .collect();
        objects.sort_by_key(|obj| object_key(obj));
        objects
    }

    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<Arc<DynamicObject>> {
        let reference = ObjectRef::new_with(name, self.resource.clone());
        let reference = match namespace {
            Some(ns) => reference.within(ns),
            None => reference,
        };
        self.store.get(&reference)
    }

    pub fn keys(&self) -> Vec<String> {
        self.list(None).iter().map(|obj| object_key(obj)).collect()
    }

    pub fn len(&self) -> usize {
        self.store.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
