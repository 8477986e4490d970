//! Deduplicating, rate-limited work queue
//!
//! Semantics follow the classic controller work queue:
//! - a key that is already pending is not queued twice
//! - a key that is being processed is never handed out again until `done`;
//!   re-adding it meanwhile marks it dirty so it is redelivered after `done`
//! - `add_rate_limited` re-adds with per-key exponential backoff, `forget`
//!   clears the backoff history
//! - after `shut_down`, `get` never hands out another key

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::trace;

/// Per-key exponential backoff for `add_rate_limited`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any retry delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl BackoffConfig {
    /// Delay for a key that has already failed `failures` times
    pub fn delay_for(&self, failures: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(failures))
            .min(self.max_delay)
    }
}

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    available: Notify,
    closed: watch::Sender<bool>,
    backoff: BackoffConfig,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_backoff(name, BackoffConfig::default())
    }

    pub fn with_backoff(name: impl Into<String>, backoff: BackoffConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            available: Notify::new(),
            closed,
            backoff,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // State is only mutated in short non-panicking sections
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `item` for processing. Never blocks.
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            // Redelivered by `done`
            return;
        }
        trace!(queue = %self.name, item = ?item, "Queued");
        state.queue.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add/shut_down cannot be missed
            notified.as_mut().enable();

            {
                let mut state = self.lock();
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

    /// Mark the current processing of `item` finished
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.available.notify_one();
        }
    }

    /// Re-add `item` after its backoff delay
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(item.clone()).or_insert(0);
            let delay = self.backoff.delay_for(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(item, delay);
    }

    /// Re-add `item` once `delay` has elapsed, unless the queue shuts down first
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }

        let queue = Arc::clone(self);
        let mut closed = self.closed.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(item),
                _ = closed.wait_for(|closed| *closed) => {}
            }
        });
    }

    /// Clear the backoff history of `item`
    pub fn forget(&self, item: &T) {
        self.lock().failures.remove(item);
    }

    /// How many times `item` has been re-added through `add_rate_limited`
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.lock().failures.get(item).copied().unwrap_or(0)
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake every waiting `get`
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.closed.send_replace(true);
        self.available.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod tests;
