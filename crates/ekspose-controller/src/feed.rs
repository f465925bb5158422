//! Change feed for watched workloads
//!
//! Runs a reflector over Deployments: every add, update, and delete
//! notification is reduced to the workload's `namespace/name` key and added to
//! the work queue, while the reflector keeps a local cache the reconciler can
//! read labels from. The notification kind itself is dropped; the
//! reconciler re-derives what to do from the live object.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Api;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[cfg(test)]
use mockall::automock;

use crate::key::WorkloadRef;
use crate::queue::WorkQueue;
use crate::{Error, Result};

/// Server-side watch timeout, kept under the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Read access to the locally cached copy of a workload
#[cfg_attr(test, automock)]
pub trait WorkloadCache: Send + Sync {
    /// Cached workload, or `None` if the cache has not seen it
    fn get_cached(&self, namespace: &str, name: &str) -> Option<Arc<Deployment>>;
}

impl WorkloadCache for Store<Deployment> {
    fn get_cached(&self, namespace: &str, name: &str) -> Option<Arc<Deployment>> {
        self.get(&ObjectRef::new(name).within(namespace))
    }
}

/// Watches Deployments and feeds their keys into the work queue
pub struct ChangeFeed {
    queue: WorkQueue<String>,
    store: Store<Deployment>,
    writer: Mutex<Option<Writer<Deployment>>>,
}

impl ChangeFeed {
    /// Create a feed that enqueues into `queue`
    pub fn new(queue: WorkQueue<String>) -> Self {
        let (store, writer) = reflector::store();
        Self {
            queue,
            store,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Reader for the local workload cache
    pub fn cache(&self) -> Store<Deployment> {
        self.store.clone()
    }

    /// Enqueue the key of the workload an event is about
    ///
    /// Add, update, and delete (including the initial listing) all enqueue;
    /// list boundaries carry no object and are ignored.
    pub fn handle_event(&self, event: &Event<Deployment>) {
        let (obj, kind) = match event {
            Event::Apply(obj) => (obj, "apply"),
            Event::InitApply(obj) => (obj, "init-apply"),
            Event::Delete(obj) => (obj, "delete"),
            Event::Init | Event::InitDone => return,
        };

        match WorkloadRef::from_resource(obj) {
            Ok(workload) => {
                trace!(%workload, event = kind, "enqueueing workload");
                self.queue.add(workload.key());
            }
            Err(e) => {
                warn!(error = %e, event = kind, "skipping notification for unaddressable workload");
            }
        }
    }

    /// Run the watch until cancelled
    ///
    /// Watch errors are logged and retried with the reflector's default
    /// backoff; they never stop the feed. Can only be started once.
    pub async fn run(
        &self,
        api: Api<Deployment>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let writer = self.writer.lock().take().ok_or_else(|| {
            Error::internal_with_context("feed", "change feed is already running")
        })?;

        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let mut stream = reflector::reflector(writer, watcher::watcher(api, config))
            .default_backoff()
            .boxed();

        info!(queue = %self.queue.name(), "change feed started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("change feed stopping");
                    return Ok(());
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle_event(&event),
                    Some(Err(e)) => warn!(error = %e, "watch error, retrying"),
                    None => {
                        warn!("watch stream ended");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Wait for the first full listing to land in the cache
    ///
    /// Returns false on timeout or if the feed stopped first. Callers treat
    /// this as advisory: the reconciler falls back to live reads.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.store.wait_until_ready()).await {
            Ok(Ok(())) => {
                info!(cached = self.store.state().len(), "workload cache synced");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "change feed stopped before cache synced");
                false
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "timed out waiting for workload cache, continuing"
                );
                false
            }
        }
    }

    /// Enqueue every cached workload
    ///
    /// Returns the number of keys added.
    pub fn resync(&self) -> usize {
        let mut added = 0;
        for obj in self.store.state() {
            if let Ok(workload) = WorkloadRef::from_resource(obj.as_ref()) {
                self.queue.add(workload.key());
                added += 1;
            }
        }
        debug!(added, "periodic resync");
        added
    }
}
