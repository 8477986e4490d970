//! Watch/cache adapter
//!
//! An [`Informer`] owns the only [`Writer`] of a reflector store and turns
//! the raw watch stream into add/update/delete notifications for registered
//! handlers. Reconcilers only ever see the read-only [`Store`].

use crate::crd::experiment::Experiment;
use crate::crd::rollout::Rollout;
use crate::server::ShutdownSignal;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default periodic resync for every informer
pub const DEFAULT_ROLLOUT_RESYNC_SECS: u64 = 900;

/// Change notification delivered to event handlers
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated(Arc<K>),
    Deleted(Arc<K>),
}

impl<K> ResourceEvent<K> {
    pub fn object(&self) -> &Arc<K> {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Updated(obj) | ResourceEvent::Deleted(obj) => {
                obj
            }
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, ResourceEvent::Deleted(_))
    }
}

#[derive(Debug, Error)]
pub enum InformerError {
    #[error("{0} informer already started")]
    AlreadyStarted(String),

    #[error("{0} informer stopped before its cache synced")]
    SyncFailed(String),
}

type Handler<K> = Arc<dyn Fn(&ResourceEvent<K>) + Send + Sync>;

pub struct Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    writer: Mutex<Option<Writer<K>>>,
    handlers: Arc<RwLock<Vec<Handler<K>>>>,
    resync: Option<Duration>,
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    /// `resync` re-delivers every cached object as `Updated` on that period
    pub fn new(resync: Option<Duration>) -> Self {
        let (store, writer) = reflector::store();
        Self {
            store,
            writer: Mutex::new(Some(writer)),
            handlers: Arc::new(RwLock::new(Vec::new())),
            resync: resync.filter(|period| !period.is_zero()),
        }
    }

    pub fn kind() -> String {
        K::kind(&()).into_owned()
    }

    /// Read-only view of the cache
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Register a handler. Handlers run on the informer task and must not block.
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(&ResourceEvent<K>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Start watching `api`. Returns immediately; the watch runs on its own task.
    pub fn start(
        &self,
        api: Api<K>,
        config: watcher::Config,
        shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, InformerError> {
        let stream = watcher(api, config).default_backoff();
        self.run_stream(stream, shutdown)
    }

    /// Drive the informer from any watch event stream
    pub fn run_stream<S>(
        &self,
        stream: S,
        shutdown: ShutdownSignal,
    ) -> Result<JoinHandle<()>, InformerError>
    where
        S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
    {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| InformerError::AlreadyStarted(Self::kind()))?;

        let delivery = Delivery {
            kind: Self::kind(),
            store: self.store.clone(),
            writer,
            handlers: Arc::clone(&self.handlers),
            relist: None,
        };
        Ok(tokio::spawn(delivery.run(stream, self.resync, shutdown)))
    }

    /// Wait until the initial list has been applied to the cache
    pub async fn wait_for_sync(&self) -> Result<(), InformerError> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|_| InformerError::SyncFailed(Self::kind()))
    }
}

/// Events collected while a relist is in progress
struct Relist<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    seen: HashSet<ObjectRef<K>>,
    pending: Vec<(bool, K)>,
}

struct Delivery<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    kind: String,
    store: Store<K>,
    writer: Writer<K>,
    handlers: Arc<RwLock<Vec<Handler<K>>>>,
    relist: Option<Relist<K>>,
}

impl<K> Delivery<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    async fn run<S>(mut self, stream: S, resync: Option<Duration>, shutdown: ShutdownSignal)
    where
        S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
    {
        let mut stream = std::pin::pin!(stream);
        let mut ticker = resync.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        debug!(kind = %self.kind, "Informer started");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = next_tick(&mut ticker) => self.resync(),
                event = stream.next() => match event {
                    Some(Ok(event)) => self.apply(event),
                    Some(Err(e)) => warn!(kind = %self.kind, error = %e, "Watch error, retrying"),
                    None => {
                        warn!(kind = %self.kind, "Watch stream ended");
                        break;
                    }
                },
            }
        }
        info!(kind = %self.kind, "Informer stopped");
    }

    fn apply(&mut self, event: watcher::Event<K>) {
        match &event {
            watcher::Event::Apply(obj) => {
                let existed = self.contains(obj);
                self.writer.apply_watcher_event(&event);
                let obj = self.cached_or(obj);
                if existed {
                    self.dispatch(&ResourceEvent::Updated(obj));
                } else {
                    self.dispatch(&ResourceEvent::Added(obj));
                }
            }
            watcher::Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                self.dispatch(&ResourceEvent::Deleted(Arc::new(obj.clone())));
            }
            watcher::Event::Init => {
                debug!(kind = %self.kind, "Relist started");
                self.writer.apply_watcher_event(&event);
                self.relist = Some(Relist {
                    seen: HashSet::new(),
                    pending: Vec::new(),
                });
            }
            watcher::Event::InitApply(obj) => {
                let existed = self.contains(obj);
                self.writer.apply_watcher_event(&event);
                // The store only swaps in the new list on InitDone
                if let Some(relist) = self.relist.as_mut() {
                    relist.seen.insert(ObjectRef::from_obj(obj));
                    relist.pending.push((existed, obj.clone()));
                }
            }
            watcher::Event::InitDone => {
                let previous = self.store.state();
                self.writer.apply_watcher_event(&event);
                let Some(relist) = self.relist.take() else {
                    return;
                };
                debug!(kind = %self.kind, objects = relist.seen.len(), "Relist done");

                for (existed, obj) in relist.pending {
                    let obj = self.cached_or(&obj);
                    if existed {
                        self.dispatch(&ResourceEvent::Updated(obj));
                    } else {
                        self.dispatch(&ResourceEvent::Added(obj));
                    }
                }
                // Objects deleted while the watch was down
                for obj in previous {
                    if !relist.seen.contains(&ObjectRef::from_obj(obj.as_ref())) {
                        self.dispatch(&ResourceEvent::Deleted(obj));
                    }
                }
            }
        }
    }

    fn resync(&self) {
        let objects = self.store.state();
        debug!(kind = %self.kind, objects = objects.len(), "Resync");
        for obj in objects {
            self.dispatch(&ResourceEvent::Updated(obj));
        }
    }

    fn contains(&self, obj: &K) -> bool {
        self.store.get(&ObjectRef::from_obj(obj)).is_some()
    }

    fn cached_or(&self, obj: &K) -> Arc<K> {
        self.store
            .get(&ObjectRef::from_obj(obj))
            .unwrap_or_else(|| Arc::new(obj.clone()))
    }

    fn dispatch(&self, event: &ResourceEvent<K>) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(event);
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The informers the controller manager consumes
pub struct Informers {
    pub replicasets: Informer<ReplicaSet>,
    pub services: Informer<Service>,
    pub rollouts: Informer<Rollout>,
    pub experiments: Informer<Experiment>,
}

impl Informers {
    pub fn new(resync: Option<Duration>) -> Self {
        Self {
            replicasets: Informer::new(resync),
            services: Informer::new(resync),
            rollouts: Informer::new(resync),
            experiments: Informer::new(resync),
        }
    }

    /// Start every informer against the cluster, optionally limited to one namespace
    pub fn start(
        &self,
        client: &Client,
        namespace: Option<&str>,
        shutdown: &ShutdownSignal,
    ) -> Result<Vec<JoinHandle<()>>, InformerError> {
        let config = watcher::Config::default();
        Ok(vec![
            self.replicasets
                .start(api(client, namespace), config.clone(), shutdown.clone())?,
            self.services
                .start(api(client, namespace), config.clone(), shutdown.clone())?,
            self.rollouts
                .start(api(client, namespace), config.clone(), shutdown.clone())?,
            self.experiments
                .start(api(client, namespace), config, shutdown.clone())?,
        ])
    }

    /// Wait until every cache completed its initial list
    pub async fn wait_for_sync(&self) -> Result<(), InformerError> {
        self.replicasets.wait_for_sync().await?;
        self.services.wait_for_sync().await?;
        self.rollouts.wait_for_sync().await?;
        self.experiments.wait_for_sync().await?;
        info!("Informer caches synced");
        Ok(())
    }
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "informer_test.rs"]
mod tests;
