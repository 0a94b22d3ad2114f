//! Time-ordered parking area for keys that become eligible later.

use std::collections::BTreeMap;
use std::sync::Weak;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::{QueueKey, Shared};

pub(crate) enum DelayMsg<K> {
    Park(K, Instant),
    Stop,
}

/// Keys waiting for their deadline. A key parked twice keeps the earlier one.
pub(crate) struct DelayHeap<K> {
    by_time: BTreeMap<(Instant, u64), K>,
    by_key: FxHashMap<K, (Instant, u64)>,
    seq: u64,
}

impl<K: QueueKey> DelayHeap<K> {
    pub(crate) fn new() -> Self {
        Self { by_time: BTreeMap::new(), by_key: FxHashMap::default(), seq: 0 }
    }

    pub(crate) fn len(&self) -> usize { self.by_key.len() }

    pub(crate) fn park(&mut self, key: K, at: Instant) {
        if let Some(prev) = self.by_key.get(&key).copied() {
            if prev.0 <= at {
                return;
            }
            self.by_time.remove(&prev);
        }
        self.seq = self.seq.wrapping_add(1);
        let slot = (at, self.seq);
        self.by_time.insert(slot, key.clone());
        self.by_key.insert(key, slot);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.by_time.keys().next().map(|(at, _)| *at)
    }

    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        while let Some(entry) = self.by_time.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.by_key.remove(&key);
            due.push(key);
        }
        due
    }
}

/// Owns the heap; hands due keys back to the queue through `Shared::add`.
/// Holds only a weak reference so dropping every queue handle ends the task.
pub(crate) async fn run<K: QueueKey>(shared: Weak<Shared<K>>, mut rx: mpsc::UnboundedReceiver<DelayMsg<K>>) {
    let mut heap = DelayHeap::new();
    loop {
        let next = heap.next_deadline();
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(DelayMsg::Park(key, at)) => heap.park(key, at),
                Some(DelayMsg::Stop) | None => break,
            },
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                let Some(shared) = shared.upgrade() else { break };
                for key in heap.pop_due(Instant::now()) {
                    shared.add(key);
                }
            }
        }
    }
    debug!(parked = heap.len(), "delay loop stopped");
}
