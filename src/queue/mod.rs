//! Deduplicating, rate-limited work queue
//!
//! Keys are `namespace/name` strings. A key is held by at most one worker
//! between `get` and `done`; adding it again while it is in flight marks it
//! dirty so it is redelivered once the current processing finishes.

mod rate_limiter;

pub use rate_limiter::ExponentialFailureRateLimiter;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::OperatorConfig;
use crate::metrics;

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready for delivery, in order
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or re-added while in flight)
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
}

/// Work queue feeding reconcile workers
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ExponentialFailureRateLimiter,
    shutdown: CancellationToken,
}

impl WorkQueue {
    pub fn new(limiter: ExponentialFailureRateLimiter) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            limiter,
            shutdown: CancellationToken::new(),
        }
    }

    /// Queue using the retry policy from the operator configuration
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self::new(ExponentialFailureRateLimiter::new(
            config.retry_base_delay(),
            config.retry_max_delay(),
        ))
    }

    /// Enqueue `key` unless it is already pending.
    pub fn add(&self, key: &str) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut state = self.state.lock();
        if !state.dirty.insert(key.to_string()) {
            return;
        }
        if state.processing.contains(key) {
            // redelivered from done()
            return;
        }
        state.queue.push_back(key.to_string());
        metrics::QUEUE_DEPTH.set(state.queue.len() as f64);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue `key` after `delay`, unless the queue shuts down first.
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(&key),
            }
        });
    }

    /// Enqueue `key` with backoff derived from its failure history.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = self.limiter.when(key);
        debug!(key = %key, delay_ms = delay.as_millis() as u64, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if self.shutdown.is_cancelled() {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    metrics::QUEUE_DEPTH.set(state.queue.len() as f64);
                    return Some(key);
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Release `key` after processing. Must be called once per `get`.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            metrics::QUEUE_DEPTH.set(state.queue.len() as f64);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Clear retry history for `key`
    pub fn forget(&self, key: &str) {
        self.limiter.forget(key);
    }

    /// Failures recorded for `key` since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Keys waiting for delivery
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop delivering keys; blocked `get` calls return `None`.
    pub fn shut_down(&self) {
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
