//! Worker loop draining the work queue
//!
//! Each worker takes one key at a time, decodes it, hands it to the syncer,
//! and tells the queue how it went: success clears the key's backoff,
//! transient failure requeues it with backoff, permanent failure drops it.
//! The key is always released with `done` so a re-add that arrived while it
//! was held gets delivered.
//!
//! Workers stop only when the queue is shut down and drained, so keys that
//! were already pending at shutdown are still synced.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::controller::WorkloadSyncer;
use crate::key::WorkloadRef;
use crate::queue::WorkQueue;

/// One worker over a shared queue
pub struct Dispatcher {
    id: usize,
    queue: WorkQueue<String>,
    syncer: Arc<dyn WorkloadSyncer>,
}

impl Dispatcher {
    /// Create worker `id`
    pub fn new(id: usize, queue: WorkQueue<String>, syncer: Arc<dyn WorkloadSyncer>) -> Self {
        Self { id, queue, syncer }
    }

    /// Process one key
    ///
    /// Returns false once the queue is shut down and drained.
    pub async fn process_next_item(&self) -> bool {
        match self.queue.get().await {
            Some(key) => {
                self.handle(key).await;
                true
            }
            None => false,
        }
    }

    async fn handle(&self, key: String) {
        match WorkloadRef::parse(&key) {
            Ok(workload) => match self.syncer.sync(&workload).await {
                Ok(action) => {
                    debug!(worker = self.id, %workload, ?action, "sync complete");
                    self.queue.forget(&key);
                }
                Err(e) if e.is_retryable() => {
                    let delay = self.queue.add_rate_limited(key.clone());
                    warn!(
                        worker = self.id,
                        %workload,
                        error = %e,
                        requeues = self.queue.num_requeues(&key),
                        delay_ms = delay.as_millis() as u64,
                        "sync failed, requeueing"
                    );
                }
                Err(e) => {
                    error!(worker = self.id, %workload, error = %e, "sync failed permanently, dropping");
                    self.queue.forget(&key);
                }
            },
            Err(e) => {
                error!(worker = self.id, key = %key, error = %e, "dropping malformed key");
                self.queue.forget(&key);
            }
        }

        self.queue.done(&key);
    }

    /// Process keys until the queue is shut down and drained
    pub async fn run(self) {
        info!(worker = self.id, queue = %self.queue.name(), "worker started");
        while self.process_next_item().await {}
        info!(worker = self.id, "worker stopped");
    }
}
