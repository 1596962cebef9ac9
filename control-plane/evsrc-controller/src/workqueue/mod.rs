//! Deduplicating, rate-limited FIFO of keys awaiting reconciliation.
//!
//! An item is in at most one of two places: the FIFO or the processing set.
//! Adding an item that is already queued is a no-op; adding an item that is
//! being processed marks it dirty so `done` puts it back exactly once. This
//! gives at most one in-flight reconciliation per key without losing updates
//! that arrive mid-flight.

mod rate_limiter;

pub use rate_limiter::ExponentialBackoff;

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct State<K> {
    queue: VecDeque<K>,
    /// Items that need processing: queued ones plus in-flight ones re-added.
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Shared<K> {
    state: Mutex<State<K>>,
    limiter: Mutex<ExponentialBackoff<K>>,
    notify: Notify,
    shutdown: CancellationToken,
}

pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                limiter: Mutex::new(ExponentialBackoff::new(backoff_base, backoff_max)),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub async fn add(&self, item: K) {
        let mut state = self.shared.state.lock().await;
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            trace!(?item, "workqueue: in flight, marked dirty");
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Wait for the next item and mark it as processing. Returns `None` once
    /// the queue is shutting down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an add between unlock and await
            // still wakes us.
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Release the in-flight marker taken by `get`. Must be called exactly
    /// once per item returned from `get`.
    pub async fn done(&self, item: &K) {
        let mut state = self.shared.state.lock().await;
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Re-add after the item's current backoff delay.
    pub async fn add_rate_limited(&self, item: K) {
        let delay = self.shared.limiter.lock().await.when(item.clone());
        self.add_after(item, delay).await;
    }

    /// Stop tracking failures of `item`.
    pub async fn forget(&self, item: &K) {
        self.shared.limiter.lock().await.forget(item);
    }

    pub async fn num_requeues(&self, item: &K) -> u32 {
        self.shared.limiter.lock().await.num_requeues(item)
    }

    /// Add once `delay` has elapsed; dropped when the queue shuts down first.
    pub async fn add_after(&self, item: K, delay: Duration) {
        if self.is_shutting_down().await {
            return;
        }
        if delay.is_zero() {
            self.add(item).await;
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.shared.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(item).await,
            }
        });
    }

    pub async fn shut_down(&self) {
        let mut state = self.shared.state.lock().await;
        state.shutting_down = true;
        drop(state);
        self.shared.shutdown.cancel();
        self.shared.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().await.shutting_down
    }

    /// Number of queued items, not counting in-flight ones.
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
