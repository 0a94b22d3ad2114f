//! Translation of cache notifications into queue keys.
//!
//! This is the only place payload kinds are told apart. Desired resources map
//! to their own key; managed resources map to the key of their controller
//! owner, and only when that owner has the expected kind. Anything else is
//! dropped here and never reaches the queue.

use std::sync::Arc;

use metrics::counter;
use steward_core::{Change, DesiredResource, EventHandler, Key, ManagedResource, Notification};
use steward_queue::WorkQueue;
use tracing::trace;

/// Key to enqueue for `n`, or `None` when the event is not this controller's concern.
///
/// Updates whose old and new states are equal on the reconcile-relevant
/// fields are suppressed.
pub fn translate(n: &Notification, owner_kind: &str) -> Option<Key> {
    match n {
        Notification::Desired(Change::Added(o)) | Notification::Desired(Change::Deleted(o)) => Some(o.key.clone()),
        Notification::Desired(Change::Updated { old, new }) => {
            if old.same_for_reconcile(new) {
                None
            } else {
                Some(new.key.clone())
            }
        }
        Notification::Managed(Change::Added(o)) | Notification::Managed(Change::Deleted(o)) => o.owner_key(owner_kind),
        Notification::Managed(Change::Updated { old, new }) => {
            if old.same_for_reconcile(new) {
                None
            } else {
                new.owner_key(owner_kind).or_else(|| old.owner_key(owner_kind))
            }
        }
    }
}

fn label(n: &Notification) -> &'static str {
    match n {
        Notification::Desired(Change::Added(_)) => "desired_add",
        Notification::Desired(Change::Updated { .. }) => "desired_update",
        Notification::Desired(Change::Deleted(_)) => "desired_delete",
        Notification::Managed(Change::Added(_)) => "managed_add",
        Notification::Managed(Change::Updated { .. }) => "managed_update",
        Notification::Managed(Change::Deleted(_)) => "managed_delete",
    }
}

/// Event handler for both watched kinds, feeding one work queue.
pub struct EventRouter {
    queue: WorkQueue<Key>,
    owner_kind: String,
}

impl EventRouter {
    pub fn new(queue: WorkQueue<Key>, owner_kind: impl Into<String>) -> Self {
        Self { queue, owner_kind: owner_kind.into() }
    }

    pub fn handle(&self, n: Notification) {
        let event = label(&n);
        match translate(&n, &self.owner_kind) {
            Some(key) => {
                trace!(event, key = %key, "enqueue");
                counter!("steward_events_total", 1, "event" => event, "outcome" => "enqueued");
                self.queue.add(key);
            }
            None => {
                trace!(event, "ignored");
                counter!("steward_events_total", 1, "event" => event, "outcome" => "ignored");
            }
        }
    }
}

impl EventHandler<DesiredResource> for EventRouter {
    fn on_add(&self, obj: Arc<DesiredResource>) { self.handle(Notification::Desired(Change::Added(obj))) }
    fn on_update(&self, old: Arc<DesiredResource>, new: Arc<DesiredResource>) {
        self.handle(Notification::Desired(Change::Updated { old, new }))
    }
    fn on_delete(&self, obj: Arc<DesiredResource>) { self.handle(Notification::Desired(Change::Deleted(obj))) }
}

impl EventHandler<ManagedResource> for EventRouter {
    fn on_add(&self, obj: Arc<ManagedResource>) { self.handle(Notification::Managed(Change::Added(obj))) }
    fn on_update(&self, old: Arc<ManagedResource>, new: Arc<ManagedResource>) {
        self.handle(Notification::Managed(Change::Updated { old, new }))
    }
    fn on_delete(&self, obj: Arc<ManagedResource>) { self.handle(Notification::Managed(Change::Deleted(obj))) }
}
