//! Dedup bookkeeping behind the work queue. Pure and synchronous; the
//! async handle in `lib.rs` wraps it in a mutex.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::time::Instant;

use crate::QueueKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Added {
    /// Already dirty; collapsed into the pending delivery.
    Duplicate,
    /// Marked dirty while checked out; `done` will queue it.
    Deferred,
    /// Appended to the FIFO.
    Queued,
    /// Queue is shutting down.
    Rejected,
}

pub(crate) enum Take<K> {
    Item { key: K, waited: Option<std::time::Duration>, more: bool },
    Empty,
    ShutDown,
}

pub(crate) struct QueueState<K> {
    order: VecDeque<K>,
    dirty: FxHashSet<K>,
    processing: FxHashSet<K>,
    queued_at: FxHashMap<K, Instant>,
    started_at: FxHashMap<K, Instant>,
    shutting_down: bool,
}

impl<K: QueueKey> QueueState<K> {
    pub(crate) fn new() -> Self {
        Self {
            order: VecDeque::new(),
            dirty: FxHashSet::default(),
            processing: FxHashSet::default(),
            queued_at: FxHashMap::default(),
            started_at: FxHashMap::default(),
            shutting_down: false,
        }
    }

    pub(crate) fn len(&self) -> usize { self.order.len() }
    pub(crate) fn is_shutting_down(&self) -> bool { self.shutting_down }
    pub(crate) fn shut_down(&mut self) { self.shutting_down = true; }

    pub(crate) fn add(&mut self, key: K) -> Added {
        if self.shutting_down {
            return Added::Rejected;
        }
        if self.dirty.contains(&key) {
            return Added::Duplicate;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return Added::Deferred;
        }
        self.enqueue(key);
        Added::Queued
    }

    pub(crate) fn take(&mut self) -> Take<K> {
        if self.shutting_down {
            return Take::ShutDown;
        }
        let Some(key) = self.order.pop_front() else { return Take::Empty };
        let now = Instant::now();
        let waited = self.queued_at.remove(&key).map(|t| now.saturating_duration_since(t));
        self.started_at.insert(key.clone(), now);
        self.processing.insert(key.clone());
        self.dirty.remove(&key);
        Take::Item { key, waited, more: !self.order.is_empty() }
    }

    /// Returns how long the key was checked out and whether it was queued again.
    pub(crate) fn done(&mut self, key: &K) -> (Option<std::time::Duration>, bool) {
        let worked = self.started_at.remove(key).map(|t| t.elapsed());
        let requeued = self.processing.remove(key) && self.dirty.contains(key);
        if requeued {
            self.enqueue(key.clone());
        }
        (worked, requeued)
    }

    fn enqueue(&mut self, key: K) {
        self.queued_at.insert(key.clone(), Instant::now());
        self.order.push_back(key);
    }
}
