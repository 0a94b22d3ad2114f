//! Steward reconciliation engine
//!
//! Cache notifications are translated into keys by [`EventRouter`] and added
//! to a shared [`WorkQueue`](steward_queue::WorkQueue). A [`WorkerPool`] of
//! identical loops drains it, calling [`Reconciler::sync`] for one key at a
//! time per key. Failures go through the [`RetryPolicy`]; keys that exhaust
//! their retries are reported to an [`ErrorSink`] and dropped until the next
//! event. [`Controller`] wires this together and owns startup and shutdown.

#![forbid(unsafe_code)]

use std::time::Duration;

mod controller;
mod error;
mod events;
mod memory;
mod reconcile;
mod retry;
mod sink;
mod worker;

pub use controller::Controller;
pub use error::{ControllerError, SyncError};
pub use events::{translate, EventRouter};
pub use memory::MemoryClient;
pub use reconcile::{plan, Action, IngressReconciler, Reconciler, DEFAULT_MARKER};
pub use retry::{Retry, RetryPolicy};
pub use sink::{ErrorSink, LogSink, MemorySink, Report};
pub use worker::{Processed, Worker, WorkerPool};

/// Runtime knobs of one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Queue and log name.
    pub name: String,
    pub workers: usize,
    /// Failed syncs retried per key before the error is reported and dropped.
    pub max_retries: usize,
    /// Upper bound of one `sync` call.
    pub sync_timeout: Duration,
    /// How long startup waits for every cache to see its initial list.
    pub cache_sync_timeout: Duration,
    /// Re-enqueue every known key this often; `None` disables.
    pub resync_period: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "ingress-manager".to_string(),
            workers: 5,
            max_retries: 10,
            sync_timeout: Duration::from_secs(30),
            cache_sync_timeout: Duration::from_secs(60),
            resync_period: Some(Duration::from_secs(60)),
        }
    }
}
