//! Fixed pool of loops draining the work queue.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, histogram};
use steward_core::Key;
use steward_queue::WorkQueue;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::{ErrorSink, Reconciler, Retry, RetryPolicy, SyncError};

/// Outcome of handling one dequeued key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Synced,
    Failed(Retry),
}

/// Everything one worker loop needs. Shared by all loops of a pool; holds no
/// per-key state of its own.
pub struct Worker {
    queue: WorkQueue<Key>,
    reconciler: Arc<dyn Reconciler>,
    policy: RetryPolicy,
    sink: Arc<dyn ErrorSink>,
    sync_timeout: Duration,
}

impl Worker {
    pub fn new(
        queue: WorkQueue<Key>,
        reconciler: Arc<dyn Reconciler>,
        policy: RetryPolicy,
        sink: Arc<dyn ErrorSink>,
        sync_timeout: Duration,
    ) -> Self {
        Self { queue, reconciler, policy, sink, sync_timeout }
    }

    pub fn queue(&self) -> &WorkQueue<Key> { &self.queue }

    /// Take one key and process it. `None` once the queue is shut down.
    pub async fn process_next(&self) -> Option<(Key, Processed)> {
        let key = self.queue.get().await?;
        let processed = self.process(&key).await;
        Some((key, processed))
    }

    /// Sync `key`, apply the retry policy on failure, and release it with `done`.
    pub async fn process(&self, key: &Key) -> Processed {
        trace!(key = %key, "processing");
        let started = Instant::now();
        let result = self.sync(key).await;
        histogram!("steward_reconcile_duration_seconds", started.elapsed().as_secs_f64());
        let processed = match result {
            Ok(()) => {
                counter!("steward_reconcile_total", 1, "result" => "success");
                self.queue.forget(key);
                Processed::Synced
            }
            Err(err) => {
                counter!("steward_reconcile_total", 1, "result" => "error");
                Processed::Failed(self.policy.handle_error(&self.queue, self.sink.as_ref(), key, err))
            }
        };
        self.queue.done(key);
        processed
    }

    async fn sync(&self, key: &Key) -> Result<(), SyncError> {
        let call = AssertUnwindSafe(self.reconciler.sync(key)).catch_unwind();
        match tokio::time::timeout(self.sync_timeout, call).await {
            Err(_) => Err(SyncError::Timeout { key: key.clone(), after: self.sync_timeout }),
            Ok(Err(panic)) => Err(SyncError::Panicked { key: key.clone(), message: panic_message(panic.as_ref()) }),
            Ok(Ok(result)) => result,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Running worker loops.
pub struct WorkerPool {
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub fn spawn(workers: usize, worker: Arc<Worker>) -> Self {
        let mut tasks = JoinSet::new();
        for id in 0..workers.max(1) {
            let worker = Arc::clone(&worker);
            tasks.spawn(async move {
                debug!(worker = id, "worker started");
                while worker.process_next().await.is_some() {}
                debug!(worker = id, "worker stopped");
            });
        }
        Self { tasks }
    }

    pub fn len(&self) -> usize { self.tasks.len() }
    pub fn is_empty(&self) -> bool { self.tasks.is_empty() }

    /// Wait for every loop to exit. Loops exit once the queue is shut down and
    /// their in-flight key is done.
    pub async fn join(mut self) {
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "worker task failed");
            }
        }
    }
}
