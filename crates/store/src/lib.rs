//! Steward store: coalescing ingest of watch deltas into a keyed cache
//!
//! The watch layer pushes [`Delta`]s into the channel returned by
//! [`spawn_ingest`]. The ingest task coalesces them per key, applies them to
//! the [`ObjectCache`], and fans the resulting [`Change`]s out to the
//! registered [`EventHandler`] after the cache reflects them. The first
//! `Restarted` (initial list) marks the cache ready.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use metrics::{counter, gauge};
use rustc_hash::FxHashMap;
use steward_core::{Change, EventHandler, Key, Keyed, Lister};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// One message from the watch layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta<T> {
    Applied(T),
    Deleted(T),
    /// Full relist; replaces the cache contents.
    Restarted(Vec<T>),
}

/// Coalescing queue keyed by object key with FIFO order. The latest delta for
/// a key replaces earlier ones still pending.
pub struct Coalescer<T> {
    map: FxHashMap<Key, Delta<T>>,
    order: VecDeque<Key>,
    coalesced: u64,
}

impl<T: Keyed> Coalescer<T> {
    pub fn new() -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), coalesced: 0 }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn coalesced(&self) -> u64 { self.coalesced }

    /// Queue a keyed delta. `Restarted` carries no single key and is returned untouched.
    pub fn push(&mut self, d: Delta<T>) -> Option<Delta<T>> {
        let key = match &d {
            Delta::Applied(o) | Delta::Deleted(o) => o.key().clone(),
            Delta::Restarted(_) => return Some(d),
        };
        if self.map.insert(key.clone(), d).is_some() {
            self.coalesced += 1;
        } else {
            self.order.push_back(key);
        }
        None
    }

    pub fn drain_ready(&mut self) -> Vec<Delta<T>> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(d) = self.map.remove(&key) {
                out.push(d);
            }
        }
        out
    }
}

impl<T: Keyed> Default for Coalescer<T> {
    fn default() -> Self { Self::new() }
}

/// Keyed snapshot of the watched objects.
pub struct ObjectCache<T> {
    epoch: u64,
    items: FxHashMap<Key, Arc<T>>,
}

impl<T: Keyed> ObjectCache<T> {
    pub fn new() -> Self { Self { epoch: 0, items: FxHashMap::default() } }

    pub fn epoch(&self) -> u64 { self.epoch }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn get(&self, key: &Key) -> Option<Arc<T>> { self.items.get(key).cloned() }
    pub fn keys(&self) -> Vec<Key> { self.items.keys().cloned().collect() }

    /// Apply one delta and report what changed.
    pub fn apply(&mut self, delta: Delta<T>) -> Vec<Change<T>> {
        let changes = match delta {
            Delta::Applied(obj) => {
                let new = Arc::new(obj);
                match self.items.insert(new.key().clone(), Arc::clone(&new)) {
                    Some(old) => vec![Change::Updated { old, new }],
                    None => vec![Change::Added(new)],
                }
            }
            Delta::Deleted(obj) => {
                // Prefer the last cached state; an unknown object still reports its delete.
                let last = self.items.remove(obj.key()).unwrap_or_else(|| Arc::new(obj));
                vec![Change::Deleted(last)]
            }
            Delta::Restarted(list) => {
                let mut next: FxHashMap<Key, Arc<T>> = FxHashMap::default();
                let mut changes = Vec::with_capacity(list.len());
                for obj in list {
                    let new = Arc::new(obj);
                    let key = new.key().clone();
                    match self.items.remove(&key) {
                        Some(old) => changes.push(Change::Updated { old, new: Arc::clone(&new) }),
                        None => changes.push(Change::Added(Arc::clone(&new))),
                    }
                    next.insert(key, new);
                }
                for (_, gone) in self.items.drain() {
                    changes.push(Change::Deleted(gone));
                }
                self.items = next;
                changes
            }
        };
        self.epoch = self.epoch.saturating_add(1);
        changes
    }
}

impl<T: Keyed> Default for ObjectCache<T> {
    fn default() -> Self { Self::new() }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cache {0} closed before becoming ready")]
pub struct CacheClosed(pub String);

/// Readiness signal of one cache.
#[derive(Clone)]
pub struct ReadyHandle {
    name: String,
    rx: watch::Receiver<bool>,
}

impl ReadyHandle {
    pub fn name(&self) -> &str { &self.name }
    pub fn is_ready(&self) -> bool { *self.rx.borrow() }

    /// Resolve once the cache has seen its initial list.
    pub async fn wait(&mut self) -> Result<(), CacheClosed> {
        self.rx
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| CacheClosed(self.name.clone()))
    }
}

/// Shared, cloneable cache handle: [`Lister`] for readers, `apply` for the writer.
pub struct SharedCache<T> {
    name: Arc<str>,
    inner: Arc<RwLock<ObjectCache<T>>>,
    ready_tx: Arc<watch::Sender<bool>>,
}

impl<T> Clone for SharedCache<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            inner: Arc::clone(&self.inner),
            ready_tx: Arc::clone(&self.ready_tx),
        }
    }
}

impl<T: Keyed + Send + Sync> SharedCache<T> {
    pub fn new(name: &str) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            name: Arc::from(name),
            inner: Arc::new(RwLock::new(ObjectCache::new())),
            ready_tx: Arc::new(ready_tx),
        }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn ready(&self) -> ReadyHandle {
        ReadyHandle { name: self.name.to_string(), rx: self.ready_tx.subscribe() }
    }

    pub fn mark_ready(&self) {
        if !self.ready_tx.send_replace(true) {
            info!(cache = %self.name, "cache ready");
        }
    }

    pub fn epoch(&self) -> u64 { self.inner.read().unwrap_or_else(PoisonError::into_inner).epoch() }
    pub fn len(&self) -> usize { self.inner.read().unwrap_or_else(PoisonError::into_inner).len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Apply a delta under the write lock. A `Restarted` delta marks the cache ready.
    pub fn apply(&self, delta: Delta<T>) -> Vec<Change<T>> {
        let relist = matches!(delta, Delta::Restarted(_));
        let (changes, len) = {
            let mut cache = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let changes = cache.apply(delta);
            (changes, cache.len())
        };
        gauge!("steward_store_objects", len as f64, "cache" => self.name.to_string());
        if relist {
            self.mark_ready();
        }
        changes
    }
}

impl<T: Keyed + Send + Sync> Lister<T> for SharedCache<T> {
    fn get(&self, key: &Key) -> Option<Arc<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).get(key)
    }

    fn keys(&self) -> Vec<Key> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).keys()
    }
}

const FLUSH_EVERY: Duration = Duration::from_millis(8);

/// Spawn an ingest loop consuming deltas into a fresh cache and notifying
/// `handler`. Returns the delta sender and the cache for reads.
pub fn spawn_ingest<T>(
    name: &str,
    cap: usize,
    handler: Arc<dyn EventHandler<T>>,
) -> (mpsc::Sender<Delta<T>>, SharedCache<T>)
where
    T: Keyed + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Delta<T>>(cap.max(1));
    let cache = SharedCache::new(name);
    let writer = cache.clone();

    tokio::spawn(async move {
        let mut coalescer = Coalescer::new();
        let mut ticker = tokio::time::interval(FLUSH_EVERY);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(d) => {
                        if let Some(relist) = coalescer.push(d) {
                            // Pending deltas predate the relist; apply them first.
                            flush(&writer, &mut coalescer, handler.as_ref());
                            dispatch(&writer, relist, handler.as_ref());
                        }
                    }
                    None => {
                        debug!(cache = %writer.name(), "delta channel closed; draining and exiting ingest loop");
                        flush(&writer, &mut coalescer, handler.as_ref());
                        break;
                    }
                },
                _ = ticker.tick() => flush(&writer, &mut coalescer, handler.as_ref()),
            }
        }
        info!(cache = %writer.name(), coalesced = coalescer.coalesced(), "ingest loop stopped");
    });

    (tx, cache)
}

fn flush<T: Keyed + Send + Sync>(cache: &SharedCache<T>, coalescer: &mut Coalescer<T>, handler: &dyn EventHandler<T>) {
    for d in coalescer.drain_ready() {
        dispatch(cache, d, handler);
    }
}

fn dispatch<T: Keyed + Send + Sync>(cache: &SharedCache<T>, d: Delta<T>, handler: &dyn EventHandler<T>) {
    counter!("steward_store_deltas_total", 1, "cache" => cache.name().to_string());
    for change in cache.apply(d) {
        handler.dispatch(change);
    }
}
