//! Where errors go once a key has exhausted its retries.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use metrics::counter;
use steward_core::Key;
use tracing::error;

use crate::SyncError;

pub trait ErrorSink: Send + Sync {
    fn report(&self, key: &Key, err: &SyncError);
}

/// Logs and counts dropped keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, key: &Key, err: &SyncError) {
        error!(key = %key, error = %err, "giving up on key after max retries");
        counter!("steward_reconcile_dropped_total", 1);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub key: Key,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<Report>>,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize { self.reports.lock().unwrap_or_else(PoisonError::into_inner).len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl ErrorSink for MemorySink {
    fn report(&self, key: &Key, err: &SyncError) {
        let report = Report { key: key.clone(), message: err.to_string(), at: Utc::now() };
        self.reports.lock().unwrap_or_else(PoisonError::into_inner).push(report);
    }
}
