//! Steward work queue
//!
//! Deduplicating FIFO of keys with three internal sets: the ordered *queue*,
//! the *dirty* set of keys that still owe a delivery, and the *processing*
//! set of keys checked out by a worker. A key is never handed to two workers
//! at once; a key re-added while checked out is delivered again after
//! [`WorkQueue::done`]. Delayed and rate-limited re-adds go through a
//! background delay task and re-enter via the same dedup path.

#![forbid(unsafe_code)]

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

mod delay;
mod limiter;
mod state;

pub use limiter::{
    default_controller_rate_limiter, BucketRateLimiter, ItemExponentialFailureRateLimiter,
    MaxOfRateLimiter, RateLimiter,
};

use delay::DelayMsg;
use state::{Added, QueueState, Take};

/// Delays at or beyond this are treated as "never" (about 30 years).
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay`, saturating at [`FAR_FUTURE`] instead of overflowing.
pub fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(FAR_FUTURE)).unwrap_or(now)
}

/// Bounds every queued key type must satisfy.
pub trait QueueKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + Sync + 'static> QueueKey for T {}

pub(crate) struct Shared<K> {
    name: String,
    state: Mutex<QueueState<K>>,
    notify: Notify,
    limiter: Box<dyn RateLimiter<K>>,
    delay_tx: mpsc::UnboundedSender<DelayMsg<K>>,
}

impl<K: QueueKey> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, key: K) {
        let (added, depth) = {
            let mut st = self.lock();
            let added = st.add(key.clone());
            (added, st.len())
        };
        match added {
            Added::Queued => {
                counter!("steward_workqueue_adds_total", 1, "name" => self.name.clone());
                gauge!("steward_workqueue_depth", depth as f64, "name" => self.name.clone());
                self.notify.notify_one();
            }
            Added::Deferred => {
                counter!("steward_workqueue_adds_total", 1, "name" => self.name.clone());
                trace!(queue = %self.name, ?key, "re-dirtied while processing");
            }
            Added::Duplicate => trace!(queue = %self.name, ?key, "coalesced duplicate add"),
            Added::Rejected => debug!(queue = %self.name, ?key, "add after shutdown ignored"),
        }
    }
}

/// Cloneable handle to one shared rate-limited work queue.
pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self { Self { shared: Arc::clone(&self.shared) } }
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create a named queue. Spawns the delay task, so a Tokio runtime must be running.
    pub fn new(name: impl Into<String>, limiter: impl RateLimiter<K> + 'static) -> Self {
        let (delay_tx, delay_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            name: name.into(),
            state: Mutex::new(QueueState::new()),
            notify: Notify::new(),
            limiter: Box::new(limiter),
            delay_tx,
        });
        tokio::spawn(delay::run(Arc::downgrade(&shared), delay_rx));
        Self { shared }
    }

    /// Queue using [`default_controller_rate_limiter`].
    pub fn with_default_rate_limiter(name: impl Into<String>) -> Self {
        Self::new(name, default_controller_rate_limiter())
    }

    pub fn name(&self) -> &str { &self.shared.name }

    /// Mark `key` dirty; queue it unless it is already pending or checked out.
    pub fn add(&self, key: K) { self.shared.add(key) }

    /// Wait for the next key. `None` once the queue is shut down.
    ///
    /// Every `Some(key)` must be answered by exactly one [`WorkQueue::done`].
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.take() {
                Take::Item { key, waited, more } => {
                    if more {
                        self.shared.notify.notify_one();
                    }
                    if let Some(w) = waited {
                        histogram!("steward_workqueue_queue_duration_seconds", w.as_secs_f64(), "name" => self.shared.name.clone());
                    }
                    return Some(key);
                }
                Take::ShutDown => return None,
                Take::Empty => notified.await,
            }
        }
    }

    fn take(&self) -> Take<K> {
        let mut st = self.shared.lock();
        let taken = st.take();
        gauge!("steward_workqueue_depth", st.len() as f64, "name" => self.shared.name.clone());
        taken
    }

    /// Finish processing `key`; re-queues it if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let (worked, requeued) = self.shared.lock().done(key);
        if let Some(w) = worked {
            histogram!("steward_workqueue_work_duration_seconds", w.as_secs_f64(), "name" => self.shared.name.clone());
        }
        if requeued {
            self.shared.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed. Zero delay adds immediately.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        // Send only fails when the delay task is gone, i.e. after shutdown.
        let _ = self.shared.delay_tx.send(DelayMsg::Park(key, deadline_after(delay)));
    }

    /// Add `key` after the rate limiter's delay for it.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.shared.limiter.when(&key);
        counter!("steward_workqueue_retries_total", 1, "name" => self.shared.name.clone());
        trace!(queue = %self.shared.name, ?key, delay_ms = delay.as_millis() as u64, "rate limited re-add");
        self.add_after(key, delay);
    }

    /// Reset the failure history of `key`.
    pub fn forget(&self, key: &K) { self.shared.limiter.forget(key) }

    pub fn num_requeues(&self, key: &K) -> usize { self.shared.limiter.num_requeues(key) }

    /// Keys waiting for delivery (excludes checked-out and delayed keys).
    pub fn len(&self) -> usize { self.shared.lock().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn is_shutting_down(&self) -> bool { self.shared.lock().is_shutting_down() }

    /// Reject further adds and release every blocked [`WorkQueue::get`].
    pub fn shut_down(&self) {
        let first = {
            let mut st = self.shared.lock();
            let first = !st.is_shutting_down();
            st.shut_down();
            first
        };
        self.shared.notify.notify_waiters();
        if first {
            let _ = self.shared.delay_tx.send(DelayMsg::Stop);
            debug!(queue = %self.shared.name, "work queue shut down");
        }
    }
}
