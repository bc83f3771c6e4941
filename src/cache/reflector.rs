use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher;
use tokio::time::{interval_at, Instant, Interval};

use crate::cache::handler::ResourceEventHandler;
use crate::cache::store::Lister;
use crate::error::Result;
use crate::gateway::types::{ResourceMapping, Selectors};
use crate::gateway::ClusterGateway;

/// Keeps a reflector store in sync with one collection on the cluster and
/// tells handlers what changed.
///
/// Follows the gateway's watch stream: a listing, then live changes. Errors
/// on the stream are logged and the stream is followed on; a stream that
/// ends is reopened, which lists the collection again.
pub struct Reflector {
    gateway: Arc<dyn ClusterGateway>,
    resource: ResourceMapping,
    namespace: Option<String>,
    selectors: Selectors,
    writer: Writer<DynamicObject>,
    reader: Store<DynamicObject>,
    handlers: Vec<Arc<dyn ResourceEventHandler>>,
    resync_period: Option<Duration>,
    /// Objects seen since the current listing began.
    listed: Option<HashSet<ObjectRef<DynamicObject>>>,
}

impl Reflector {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        resource: ResourceMapping,
        namespace: Option<&str>,
    ) -> Self {
        let writer = Writer::new(resource.api.clone());
        let reader = writer.as_reader();
        Self {
            gateway,
            resource,
            namespace: namespace.map(str::to_string),
            selectors: Selectors::default(),
            writer,
            reader,
            handlers: Vec::new(),
            resync_period: None,
            listed: None,
        }
    }

    pub fn with_selectors(mut self, selectors: Selectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Re-deliver every cached object to the handlers each `period`.
    /// A zero period disables resync.
    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = (!period.is_zero()).then_some(period);
        self
    }

    pub fn add_handler(mut self, handler: Arc<dyn ResourceEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn lister(&self) -> Lister {
        Lister::new(self.reader.clone(), self.resource.api.clone())
    }

    /// Mirror the collection until `shutdown` resolves. Fails only when a
    /// watch cannot be opened.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut resync = self
            .resync_period
            .map(|period| interval_at(Instant::now() + period, period));

        tracing::info!(
            resource = %self.resource.plural(),
            namespace = self.namespace.as_deref().unwrap_or("*"),
            "Reflector started"
        );

        loop {
            let mut events = self
                .gateway
                .watch(&self.resource, self.namespace.as_deref(), &self.selectors)
                .await?;

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        tracing::info!(resource = %self.resource.plural(), "Reflector stopped");
                        return Ok(());
                    }
                    _ = tick(&mut resync) => {
                        self.resync();
                    }
                    event = events.next() => match event {
                        Some(Ok(event)) => self.handle(event),
                        Some(Err(e)) => {
                            tracing::warn!(
                                resource = %self.resource.plural(),
                                error = %e,
                                "Watch stream error"
                            );
                        }
                        None => {
                            tracing::debug!(resource = %self.resource.plural(), "Watch closed, reopening");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Notify handlers of one event, then apply it to the store.
    fn handle(&mut self, event: watcher::Event<DynamicObject>) {
        match &event {
            watcher::Event::Init => {
                self.listed = Some(HashSet::new());
            }
            watcher::Event::InitApply(object) => {
                let reference = self.object_ref(object);
                if let Some(listed) = &mut self.listed {
                    listed.insert(reference);
                }
                self.upserted(object);
            }
            watcher::Event::InitDone => {
                let listed = self.listed.take().unwrap_or_default();
                let gone: Vec<_> = self
                    .reader
                    .state()
                    .into_iter()
                    .filter(|object| !listed.contains(&self.object_ref(object)))
                    .collect();
                tracing::debug!(
                    resource = %self.resource.plural(),
                    objects = listed.len(),
                    removed = gone.len(),
                    "Listed collection"
                );
                for object in &gone {
                    self.notify_delete(object);
                }
            }
            watcher::Event::Apply(object) => self.upserted(object),
            watcher::Event::Delete(object) => self.notify_delete(object),
        }
        self.writer.apply_watcher_event(&event);
    }

    fn object_ref(&self, object: &DynamicObject) -> ObjectRef<DynamicObject> {
        ObjectRef::from_obj_with(object, self.resource.api.clone())
    }

    /// The store still holds the previous state while a listing is in
    /// flight, so relisted objects arrive as updates.
    fn upserted(&self, object: &DynamicObject) {
        match self.reader.get(&self.object_ref(object)) {
            Some(old) => {
                for handler in &self.handlers {
                    handler.on_update(&old, object);
                }
            }
            None => {
                for handler in &self.handlers {
                    handler.on_add(object);
                }
            }
        }
    }

    fn notify_delete(&self, object: &DynamicObject) {
        for handler in &self.handlers {
            handler.on_delete(object);
        }
    }

    fn resync(&self) {
        let objects = self.reader.state();
        tracing::debug!(objects = objects.len(), "Resyncing");
        for object in &objects {
            for handler in &self.handlers {
                handler.on_update(object, object);
            }
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
