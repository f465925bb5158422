//! Deduplicating, rate-limited work queue
//!
//! Semantics follow the classic controller work queue:
//!
//! - A key that is already waiting is not queued twice.
//! - A key added while a worker holds it is remembered and handed out again
//!   after that worker calls [`WorkQueue::done`]; it is never held by two
//!   workers at once.
//! - [`WorkQueue::add_rate_limited`] delays a key by its per-key exponential
//!   backoff; [`WorkQueue::forget`] resets that backoff.
//! - After [`WorkQueue::shut_down`], new adds are ignored, remaining keys are
//!   drained, and [`WorkQueue::get`] then returns `None` to every worker.
//!
//! The handle is cheap to clone; all clones share one queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use ekspose_common::retry::BackoffPolicy;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Bounds for anything stored in a [`WorkQueue`]
pub trait QueueKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

struct State<K> {
    /// Keys ready to be handed out, in arrival order
    queue: VecDeque<K>,
    /// Keys that need processing (waiting in `queue`, or re-added while held)
    dirty: HashSet<K>,
    /// Keys currently held by a worker
    processing: HashSet<K>,
    /// Consecutive failures per key
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

struct Inner<K> {
    name: String,
    backoff: BackoffPolicy,
    state: Mutex<State<K>>,
    notify: Notify,
}

/// Shared handle to a work queue
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create an empty queue with the given name and backoff policy
    pub fn new(name: impl Into<String>, backoff: BackoffPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                backoff,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Name of this queue
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            trace!(queue = %self.inner.name, ?key, "ignoring add after shutdown");
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(queue = %self.inner.name, ?key, "key already pending");
            return;
        }
        if state.processing.contains(&key) {
            // Handed out again by done()
            trace!(queue = %self.inner.name, ?key, "key in flight, will requeue on done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shut down and drained. The caller must
    /// call [`WorkQueue::done`] with the returned key when finished with it.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so no wakeup is lost in between
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release a key obtained from [`WorkQueue::get`]
    ///
    /// If the key was added again while held, it becomes available now.
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Add `key` after its per-key backoff delay, recording one more failure
    ///
    /// Returns the delay that was applied.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = {
            let mut state = self.inner.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.inner.backoff.delay_for(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
        delay
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        debug!(
            queue = %self.inner.name,
            ?key,
            delay_ms = delay.as_millis() as u64,
            "delaying requeue"
        );
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// True if no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        debug!(queue = %self.inner.name, "queue shutting down");
        self.inner.notify.notify_waiters();
    }

    /// True once [`WorkQueue::shut_down`] has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(
            "test",
            BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(80)),
        )
    }

    fn key(s: &str) -> String {
        s.to_string()
    }

    #[tokio::test]
    async fn duplicate_adds_before_get_collapse() {
        let q = queue();
        for _ in 0..5 {
            q.add(key("ns/app1"));
        }
        assert_eq!(q.len(), 1);

        assert_eq!(q.get().await, Some(key("ns/app1")));
        q.done(&key("ns/app1"));
        assert!(q.is_empty());

        q.shut_down();
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn distinct_keys_are_all_delivered() {
        let q = queue();
        q.add(key("ns/a"));
        q.add(key("ns/b"));
        q.add(key("ns/a"));
        assert_eq!(q.len(), 2);

        let first = q.get().await.unwrap();
        let second = q.get().await.unwrap();
        assert_eq!(first, "ns/a");
        assert_eq!(second, "ns/b");
    }

    #[tokio::test]
    async fn add_while_processing_is_redelivered_after_done() {
        let q = queue();
        q.add(key("ns/app1"));
        let held = q.get().await.unwrap();

        // Not handed to a second worker while held
        q.add(key("ns/app1"));
        assert!(q.is_empty());

        q.done(&held);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some(key("ns/app1")));
    }

    #[tokio::test]
    async fn done_without_readd_does_not_requeue() {
        let q = queue();
        q.add(key("ns/app1"));
        let held = q.get().await.unwrap();
        q.done(&held);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn get_blocks_until_add() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.add(key("ns/late"));

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("get should wake up")
            .unwrap();
        assert_eq!(got, Some(key("ns/late")));
    }

    #[tokio::test]
    async fn shutdown_wakes_all_waiters() {
        let q = queue();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.get().await })
            })
            .collect();
        tokio::task::yield_now().await;

        q.shut_down();
        for w in waiters {
            let got = tokio::time::timeout(Duration::from_secs(1), w)
                .await
                .expect("waiter should observe shutdown")
                .unwrap();
            assert_eq!(got, None);
        }
    }

    #[tokio::test]
    async fn shutdown_drains_pending_keys_first() {
        let q = queue();
        q.add(key("ns/a"));
        q.shut_down();

        // Adds after shutdown are ignored
        q.add(key("ns/b"));

        assert_eq!(q.get().await, Some(key("ns/a")));
        assert_eq!(q.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_delays_grow_and_forget_resets() {
        let q = queue();
        let k = key("ns/flaky");

        let d1 = q.add_rate_limited(k.clone());
        let d2 = q.add_rate_limited(k.clone());
        let d3 = q.add_rate_limited(k.clone());
        let d4 = q.add_rate_limited(k.clone());
        let d5 = q.add_rate_limited(k.clone());
        assert_eq!(d1, Duration::from_millis(10));
        assert_eq!(d2, Duration::from_millis(20));
        assert_eq!(d3, Duration::from_millis(40));
        assert_eq!(d4, Duration::from_millis(80));
        // Ceiling
        assert_eq!(d5, Duration::from_millis(80));
        assert_eq!(q.num_requeues(&k), 5);

        q.forget(&k);
        assert_eq!(q.num_requeues(&k), 0);
        assert_eq!(q.add_rate_limited(k.clone()), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_key_arrives_after_delay() {
        let q = queue();
        q.add_rate_limited(key("ns/app1"));
        assert!(q.is_empty());

        tokio::time::sleep(Duration::from_millis(11)).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some(key("ns/app1")));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_adds_are_dropped_after_shutdown() {
        let q = queue();
        q.add_after(key("ns/app1"), Duration::from_millis(50));
        q.shut_down();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(q.is_empty());
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn backoff_is_tracked_per_key() {
        let q = queue();
        q.add_rate_limited(key("ns/a"));
        q.add_rate_limited(key("ns/a"));
        q.add_rate_limited(key("ns/b"));
        assert_eq!(q.num_requeues(&key("ns/a")), 2);
        assert_eq!(q.num_requeues(&key("ns/b")), 1);
        assert_eq!(q.num_requeues(&key("ns/c")), 0);
    }
}
