use std::sync::Arc;

use crate::{Key, ManagedResource};

/// Synchronous point lookup into a locally cached view.
pub trait Lister<T>: Send + Sync {
    fn get(&self, key: &Key) -> Option<Arc<T>>;
    /// Every key currently cached, in no particular order.
    fn keys(&self) -> Vec<Key>;
}

/// Errors surfaced by a [`StorageClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("already exists: {0}")]
    AlreadyExists(Key),
    #[error("not found: {0}")]
    NotFound(Key),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend: {0}")]
    Backend(String),
}

impl ClientError {
    pub fn is_already_exists(&self) -> bool { matches!(self, Self::AlreadyExists(_)) }
    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }
}

/// Authoritative store for managed resources.
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    async fn create(&self, obj: &ManagedResource) -> Result<(), ClientError>;
    async fn delete(&self, key: &Key) -> Result<(), ClientError>;
    async fn get(&self, key: &Key) -> Result<Option<ManagedResource>, ClientError>;
}
