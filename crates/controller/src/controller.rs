//! Run/shutdown lifecycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use steward_core::{DesiredResource, Key, Lister};
use steward_queue::{deadline_after, WorkQueue, FAR_FUTURE};
use steward_store::ReadyHandle;
use tokio::time::{timeout_at, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{ControllerConfig, ControllerError, ErrorSink, Reconciler, RetryPolicy, Worker, WorkerPool};

pub struct Controller {
    config: ControllerConfig,
    queue: WorkQueue<Key>,
    worker: Arc<Worker>,
    ready: Vec<ReadyHandle>,
    resync: Option<Arc<dyn Lister<DesiredResource>>>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        queue: WorkQueue<Key>,
        reconciler: Arc<dyn Reconciler>,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        let worker = Arc::new(Worker::new(
            queue.clone(),
            reconciler,
            RetryPolicy::new(config.max_retries),
            sink,
            config.sync_timeout,
        ));
        Self { config, queue, worker, ready: Vec::new(), resync: None }
    }

    /// Refuse to start workers until this cache is ready.
    pub fn wait_for(mut self, ready: ReadyHandle) -> Self {
        self.ready.push(ready);
        self
    }

    /// Periodically enqueue every key of `lister` (see `ControllerConfig::resync_period`).
    pub fn resync_from(mut self, lister: Arc<dyn Lister<DesiredResource>>) -> Self {
        self.resync = Some(lister);
        self
    }

    pub fn queue(&self) -> &WorkQueue<Key> { &self.queue }
    pub fn config(&self) -> &ControllerConfig { &self.config }

    /// Wait for caches, run the workers until `shutdown` resolves, then shut the
    /// queue down and wait for in-flight keys to finish.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            res = wait_for_caches(self.ready.clone(), self.config.cache_sync_timeout) => {
                if let Err(e) = res {
                    self.queue.shut_down();
                    return Err(e);
                }
            }
            _ = &mut shutdown => {
                info!(controller = %self.config.name, "shutdown requested before caches were ready");
                self.queue.shut_down();
                return Ok(());
            }
        }

        info!(controller = %self.config.name, workers = self.config.workers, "controller started");
        let pool = WorkerPool::spawn(self.config.workers, Arc::clone(&self.worker));

        tokio::select! {
            _ = &mut shutdown => info!(controller = %self.config.name, "shutdown requested"),
            _ = resync_loop(&self.queue, self.resync.clone(), self.config.resync_period) => {}
        }

        self.queue.shut_down();
        pool.join().await;
        info!(controller = %self.config.name, "controller stopped");
        Ok(())
    }
}

async fn wait_for_caches(mut ready: Vec<ReadyHandle>, waited: Duration) -> Result<(), ControllerError> {
    let deadline = deadline_after(waited);
    for handle in &mut ready {
        debug!(cache = %handle.name(), "waiting for cache");
        match timeout_at(deadline, handle.wait()).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(cache = %handle.name(), ?waited, "cache not ready");
                return Err(ControllerError::CacheNotReady { cache: handle.name().to_string(), waited });
            }
        }
    }
    Ok(())
}

async fn resync_loop(queue: &WorkQueue<Key>, source: Option<Arc<dyn Lister<DesiredResource>>>, period: Option<Duration>) {
    let (Some(source), Some(period)) = (source, period.filter(|p| !p.is_zero())) else {
        return std::future::pending().await;
    };
    let period = period.min(FAR_FUTURE);
    let mut ticker = tokio::time::interval_at(deadline_after(period), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let keys = source.keys();
        debug!(count = keys.len(), "resync");
        for key in keys {
            queue.add(key);
        }
    }
}
