use steward_core::Key;
use steward_queue::WorkQueue;
use tracing::warn;

use crate::{ErrorSink, SyncError};

/// What the policy did with a failed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Re-added after the queue's backoff; `attempt` counts from 1.
    Requeued { attempt: usize },
    /// Retries exhausted; reported and forgotten.
    Dropped,
}

/// Bounded retries for failed syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { max_retries: 10 } }
}

impl RetryPolicy {
    pub fn new(max_retries: usize) -> Self { Self { max_retries } }

    pub fn handle_error(&self, queue: &WorkQueue<Key>, sink: &dyn ErrorSink, key: &Key, err: SyncError) -> Retry {
        let requeues = queue.num_requeues(key);
        if requeues < self.max_retries {
            warn!(key = %key, attempt = requeues + 1, max = self.max_retries, error = %err, "sync failed; requeueing");
            queue.add_rate_limited(key.clone());
            return Retry::Requeued { attempt: requeues + 1 };
        }
        sink.report(key, &err);
        queue.forget(key);
        Retry::Dropped
    }
}
