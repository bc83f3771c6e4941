//! In-process gateway backed by a versioned map.
//!
//! Behaves like an API server for the verbs the crate uses: it stamps
//! `uid`, `creationTimestamp` and `resourceVersion`, applies merge patches,
//! rejects duplicate creates and stale replaces, and feeds watchers. Watches
//! follow `kube::runtime::watcher` semantics: a listing of the current state,
//! then live changes. No event history is retained.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::SecondsFormat;
use futures::channel::mpsc;
use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::watcher;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::gateway::types::*;
use crate::gateway::{ClusterGateway, WatchStream};
use crate::manifest::{gvk_label, GroupVersionKind};

/// Number of calls seen per verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub resolve: usize,
    pub get: usize,
    pub create: usize,
    pub patch: usize,
    pub replace: usize,
    pub watch: usize,
}

impl CallCounts {
    pub fn writes(&self) -> usize {
        self.create + self.patch + self.replace
    }

    pub fn total(&self) -> usize {
        self.resolve + self.get + self.writes() + self.watch
    }
}

type ObjectKey = (String, String, String);
type EventSender = mpsc::UnboundedSender<Result<watcher::Event<DynamicObject>>>;

struct Watcher {
    resource: String,
    namespace: Option<String>,
    selectors: Selectors,
    tx: EventSender,
}

impl Watcher {
    fn covers(&self, resource: &str, namespace: &str) -> bool {
        self.resource == resource && self.namespace.as_deref().map_or(true, |ns| ns == namespace)
    }

    fn send(&self, event: Result<watcher::Event<DynamicObject>>) -> bool {
        self.tx.unbounded_send(event).is_ok()
    }
}

/// A write as seen by watchers.
enum Change {
    Upsert { old: Option<Value>, new: Value },
    Delete(Value),
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, Value>,
    version: u64,
    watchers: Vec<Watcher>,
    calls: CallCounts,
    fail_next_get: Option<AppError>,
    fail_next_write: Option<AppError>,
}

pub struct InMemoryGateway {
    resources: Vec<ResourceMapping>,
    state: Mutex<MemoryState>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    /// A gateway serving the common core and apps kinds.
    pub fn new() -> Self {
        let core = |kind: &str, plural: &str, namespaced: bool| {
            ResourceMapping::new(&GroupVersionKind::gvk("", "v1", kind), plural, namespaced)
        };
        let resources = vec![
            core("ConfigMap", "configmaps", true),
            core("Secret", "secrets", true),
            core("Service", "services", true),
            core("ServiceAccount", "serviceaccounts", true),
            core("Namespace", "namespaces", false),
            ResourceMapping::new(
                &GroupVersionKind::gvk("apps", "v1", "Deployment"),
                "deployments",
                true,
            ),
            ResourceMapping::new(
                &GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "ClusterRole"),
                "clusterroles",
                false,
            ),
        ];
        Self {
            resources,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_resource(mut self, resource: ResourceMapping) -> Self {
        self.resources.push(resource);
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Make the next `get` fail with `error`.
    pub fn fail_next_get(&self, error: AppError) {
        self.state().fail_next_get = Some(error);
    }

    /// Make the next create, patch or replace fail with `error`.
    pub fn fail_next_write(&self, error: AppError) {
        self.state().fail_next_write = Some(error);
    }

    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete an object out of band, notifying watchers.
    pub fn delete_object(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value> {
        let mut state = self.state();
        let namespace = resource.scope(namespace);
        let key = object_key(resource, namespace, name);
        let mut removed = state
            .objects
            .remove(&key)
            .ok_or_else(|| AppError::NotFound(resource.describe(namespace, name)))?;
        let version = state.bump();
        set_meta(&mut removed, "resourceVersion", json!(version.to_string()));
        state.publish(&key, Change::Delete(removed.clone()));
        Ok(removed)
    }

    /// Deliver `message` as an error on every open watch stream. The
    /// streams stay open, as a watcher's do after a transient failure.
    pub fn fail_watches(&self, message: &str) {
        self.state()
            .watchers
            .retain(|w| w.send(Err(AppError::Watch(message.to_string()))));
    }

    /// Re-send the full listing on every open watch stream, as a watcher
    /// does when it has to relist.
    pub fn restart_watches(&self) {
        let mut state = self.state();
        let watchers = std::mem::take(&mut state.watchers);
        let watchers: Vec<Watcher> = watchers
            .into_iter()
            .filter(|w| state.send_listing(w))
            .collect();
        state.watchers = watchers;
    }

    /// End every open watch stream.
    pub fn close_watches(&self) {
        self.state().watchers.clear();
    }
}

impl MemoryState {
    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    /// Notify the watchers covering `key`. An update that moves an object
    /// out of a watcher's selector reaches it as a delete.
    fn publish(&mut self, key: &ObjectKey, change: Change) {
        let (resource, namespace, _) = key;
        self.watchers.retain(|w| {
            if !w.covers(resource, namespace) {
                return true;
            }
            let event = match &change {
                Change::Upsert { new, .. } if w.selectors.matches_labels(new) => {
                    to_event(new, watcher::Event::Apply)
                }
                Change::Upsert { old: Some(old), new } if w.selectors.matches_labels(old) => {
                    to_event(new, watcher::Event::Delete)
                }
                Change::Upsert { .. } => return true,
                Change::Delete(obj) if w.selectors.matches_labels(obj) => {
                    to_event(obj, watcher::Event::Delete)
                }
                Change::Delete(_) => return true,
            };
            w.send(event)
        });
    }

    /// Send `Init`, the matching objects, then `InitDone`.
    fn send_listing(&self, watcher: &Watcher) -> bool {
        let mut events = vec![Ok(watcher::Event::Init)];
        events.extend(
            self.objects
                .iter()
                .filter(|((resource, namespace, _), obj)| {
                    watcher.covers(resource, namespace) && watcher.selectors.matches_labels(obj)
                })
                .map(|(_, obj)| to_event(obj, watcher::Event::InitApply)),
        );
        events.push(Ok(watcher::Event::InitDone));
        events.into_iter().all(|event| watcher.send(event))
    }

    fn take_write_failure(&mut self) -> Result<()> {
        match self.fail_next_write.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn to_event(
    object: &Value,
    wrap: fn(DynamicObject) -> watcher::Event<DynamicObject>,
) -> Result<watcher::Event<DynamicObject>> {
    let object: DynamicObject = serde_json::from_value(object.clone())?;
    Ok(wrap(object))
}

fn resource_key(resource: &ResourceMapping) -> String {
    format!("{}/{}", resource.api.group, resource.plural())
}

fn object_key(resource: &ResourceMapping, namespace: Option<&str>, name: &str) -> ObjectKey {
    let namespace = resource.scope(namespace).unwrap_or_default();
    (resource_key(resource), namespace.to_string(), name.to_string())
}

fn scoped_namespace<'a>(
    resource: &ResourceMapping,
    namespace: Option<&'a str>,
) -> Result<Option<&'a str>> {
    match (resource.namespaced, namespace) {
        (true, Some(ns)) => Ok(Some(ns)),
        (true, None) => Err(AppError::validation(format!(
            "{} is namespaced but no namespace was given",
            resource.plural()
        ))),
        (false, _) => Ok(None),
    }
}

fn set_meta(object: &mut Value, field: &str, value: Value) {
    if let Some(map) = object.as_object_mut() {
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert(field.to_string(), value);
        }
    }
}

fn without_version(object: &Value) -> Value {
    let mut object = object.clone();
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("resourceVersion");
    }
    object
}

#[async_trait]
impl ClusterGateway for InMemoryGateway {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping> {
        self.state().calls.resolve += 1;
        self.resources
            .iter()
            .find(|r| r.gvk() == *gvk)
            .cloned()
            .ok_or_else(|| AppError::UnknownKind(gvk_label(gvk)))
    }

    async fn get(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Value> {
        let mut state = self.state();
        state.calls.get += 1;
        if let Some(e) = state.fail_next_get.take() {
            return Err(e);
        }
        state
            .objects
            .get(&object_key(resource, namespace, name))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("{} not found", resource.describe(namespace, name)))
            })
    }

    async fn create(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        object: &Value,
    ) -> Result<Value> {
        let mut state = self.state();
        state.calls.create += 1;
        state.take_write_failure()?;

        let name = meta_str(object, "name")
            .ok_or_else(|| AppError::validation("metadata.name is required"))?
            .to_string();
        let namespace = scoped_namespace(resource, namespace)?;
        let key = object_key(resource, namespace, &name);
        if state.objects.contains_key(&key) {
            return Err(AppError::Conflict(format!(
                "{} already exists",
                resource.describe(namespace, &name)
            )));
        }

        let version = state.bump();
        let mut stored = object.clone();
        if let Some(ns) = namespace {
            set_meta(&mut stored, "namespace", json!(ns));
        }
        set_meta(&mut stored, "uid", json!(format!("uid-{version}")));
        set_meta(
            &mut stored,
            "creationTimestamp",
            json!(chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        set_meta(&mut stored, "resourceVersion", json!(version.to_string()));

        state.objects.insert(key.clone(), stored.clone());
        state.publish(
            &key,
            Change::Upsert {
                old: None,
                new: stored.clone(),
            },
        );
        Ok(stored)
    }

    async fn patch(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        patch: &Value,
    ) -> Result<Value> {
        let mut state = self.state();
        state.calls.patch += 1;
        state.take_write_failure()?;
        let namespace = scoped_namespace(resource, namespace)?;

        let key = object_key(resource, namespace, name);
        let current = state.objects.get(&key).cloned().ok_or_else(|| {
            AppError::NotFound(format!("{} not found", resource.describe(namespace, name)))
        })?;

        let mut patched = current.clone();
        json_patch::merge(&mut patched, patch);
        // Identity and server-owned fields are immutable through patches
        for field in ["name", "namespace", "uid", "creationTimestamp", "resourceVersion"] {
            match current.get("metadata").and_then(|m| m.get(field)) {
                Some(value) => set_meta(&mut patched, field, value.clone()),
                None => {
                    if let Some(metadata) =
                        patched.get_mut("metadata").and_then(Value::as_object_mut)
                    {
                        metadata.remove(field);
                    }
                }
            }
        }

        if patched == current {
            return Ok(current);
        }

        let version = state.bump();
        set_meta(&mut patched, "resourceVersion", json!(version.to_string()));
        state.objects.insert(key.clone(), patched.clone());
        state.publish(
            &key,
            Change::Upsert {
                old: Some(current),
                new: patched.clone(),
            },
        );
        Ok(patched)
    }

    async fn replace(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        name: &str,
        object: &Value,
    ) -> Result<Value> {
        let mut state = self.state();
        state.calls.replace += 1;
        state.take_write_failure()?;
        let namespace = scoped_namespace(resource, namespace)?;

        let key = object_key(resource, namespace, name);
        let current = state.objects.get(&key).cloned().ok_or_else(|| {
            AppError::NotFound(format!("{} not found", resource.describe(namespace, name)))
        })?;

        let expected = meta_str(object, "resourceVersion");
        let actual = meta_str(&current, "resourceVersion");
        if expected.is_some() && expected != actual {
            return Err(AppError::Conflict(format!(
                "{}: the object has been modified",
                resource.describe(namespace, name)
            )));
        }

        let mut replaced = object.clone();
        for field in ["name", "namespace", "uid", "creationTimestamp"] {
            if let Some(value) = current.get("metadata").and_then(|m| m.get(field)) {
                set_meta(&mut replaced, field, value.clone());
            }
        }
        if without_version(&replaced) == without_version(&current) {
            return Ok(current);
        }

        let version = state.bump();
        set_meta(&mut replaced, "resourceVersion", json!(version.to_string()));
        state.objects.insert(key.clone(), replaced.clone());
        state.publish(
            &key,
            Change::Upsert {
                old: Some(current),
                new: replaced.clone(),
            },
        );
        Ok(replaced)
    }

    async fn watch(
        &self,
        resource: &ResourceMapping,
        namespace: Option<&str>,
        selectors: &Selectors,
    ) -> Result<WatchStream> {
        let mut state = self.state();
        state.calls.watch += 1;

        let (tx, rx) = mpsc::unbounded();
        let watcher = Watcher {
            resource: resource_key(resource),
            namespace: resource.scope(namespace).map(str::to_string),
            selectors: selectors.clone(),
            tx,
        };
        if state.send_listing(&watcher) {
            state.watchers.push(watcher);
        }
        Ok(rx.boxed())
    }
}
