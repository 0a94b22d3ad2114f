use std::sync::Arc;

use crate::{DesiredResource, ManagedResource};

/// One observed change to a cached object.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Added(Arc<T>),
    Updated { old: Arc<T>, new: Arc<T> },
    Deleted(Arc<T>),
}

/// Closed set of notification payloads the controller reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Desired(Change<DesiredResource>),
    Managed(Change<ManagedResource>),
}

/// Callback registration point of the watch layer.
///
/// Called from the cache's ingest task after the cache reflects the change.
/// Implementations must not block.
pub trait EventHandler<T>: Send + Sync {
    fn on_add(&self, obj: Arc<T>);
    fn on_update(&self, old: Arc<T>, new: Arc<T>);
    fn on_delete(&self, obj: Arc<T>);

    fn dispatch(&self, change: Change<T>) {
        match change {
            Change::Added(o) => self.on_add(o),
            Change::Updated { old, new } => self.on_update(old, new),
            Change::Deleted(o) => self.on_delete(o),
        }
    }
}
