use std::time::Duration;

use steward_core::{ClientError, Key};
use steward_store::CacheClosed;

/// Failure of one `sync` invocation. Always local to its key's retry cycle.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("create {key}: {source}")]
    Create { key: Key, source: ClientError },
    #[error("delete {key}: {source}")]
    Delete { key: Key, source: ClientError },
    #[error("{op} {key}: storage call timed out after {after:?}")]
    CallTimeout { op: &'static str, key: Key, after: Duration },
    #[error("sync {key} timed out after {after:?}")]
    Timeout { key: Key, after: Duration },
    #[error("sync {key} panicked: {message}")]
    Panicked { key: Key, message: String },
}

impl SyncError {
    pub fn key(&self) -> &Key {
        match self {
            Self::Create { key, .. }
            | Self::Delete { key, .. }
            | Self::CallTimeout { key, .. }
            | Self::Timeout { key, .. }
            | Self::Panicked { key, .. } => key,
        }
    }
}

/// Startup and lifecycle failures of the controller.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("cache {cache} not ready after {waited:?}")]
    CacheNotReady { cache: String, waited: Duration },
    #[error(transparent)]
    CacheClosed(#[from] CacheClosed),
}
