//! Steward core types
//!
//! Leaf crate shared by the queue, the cache and the controller: the [`Key`]
//! identifying a reconcilable unit, the resource snapshots the reconciler
//! reads, the change notifications the watch layer emits, and the traits the
//! engine consumes from its external collaborators.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod client;
mod event;
mod resource;

pub use client::{ClientError, Lister, StorageClient};
pub use event::{Change, EventHandler, Notification};
pub use resource::{DesiredResource, ManagedResource, ManagedSpec, ManagedTemplate, OwnerRef};

pub mod prelude {
    pub use super::{
        Change, ClientError, DesiredResource, EventHandler, Key, Keyed, Lister, ManagedResource,
        ManagedSpec, ManagedTemplate, Notification, OwnerRef, StorageClient,
    };
}

/// Identity of one reconcilable unit: `namespace/name`.
///
/// Cluster-scoped objects use an empty namespace and render as the bare name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub namespace: String,
    pub name: String,
}

impl Key {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self { namespace: String::new(), name: name.into() }
    }

    pub fn is_namespaced(&self) -> bool { !self.namespace.is_empty() }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    #[error("empty key")]
    Empty,
    #[error("invalid key {0:?} (expect name or namespace/name)")]
    Malformed(String),
}

impl FromStr for Key {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(KeyParseError::Empty);
        }
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Key::cluster(*name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Key::new(*ns, *name)),
            _ => Err(KeyParseError::Malformed(s.to_string())),
        }
    }
}

/// Anything the cache can index by [`Key`].
pub trait Keyed {
    fn key(&self) -> &Key;
}
