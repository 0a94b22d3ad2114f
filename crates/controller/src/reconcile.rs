//! The idempotent sync function.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use steward_core::{
    ClientError, DesiredResource, Key, Lister, ManagedResource, ManagedTemplate, StorageClient,
};
use tracing::{debug, info};

use crate::SyncError;

/// Converges the state behind one key. Must be safe to call repeatedly.
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync + 'static {
    async fn sync(&self, key: &Key) -> Result<(), SyncError>;
}

/// Correction for one key, computed from the current desired and managed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Create { object: ManagedResource },
    Delete { key: Key },
    Noop { reason: &'static str },
}

/// Decision table:
///
/// | desired present & marked | managed exists | action |
/// |---|---|---|
/// | yes | no  | create, owned by the desired resource |
/// | yes | yes | none |
/// | no  | yes | delete, if owned by `key` |
/// | no  | no  | none |
pub fn plan(
    key: &Key,
    desired: Option<&DesiredResource>,
    managed: Option<&ManagedResource>,
    marker: &str,
    template: &ManagedTemplate,
) -> Action {
    let wanted = desired.filter(|d| d.has_marker(marker));
    match (wanted, managed) {
        (Some(d), None) => Action::Create { object: template.render(d) },
        (Some(_), Some(_)) => Action::Noop { reason: "converged" },
        (None, Some(m)) if m.is_owned_by(key, &template.owner_kind) => Action::Delete { key: key.clone() },
        (None, Some(_)) => Action::Noop { reason: "managed resource has another owner" },
        (None, None) => Action::Noop { reason: "nothing desired" },
    }
}

pub const DEFAULT_MARKER: &str = "ingress/http";

/// Keeps one ingress-shaped managed resource per marked desired resource.
pub struct IngressReconciler {
    desired: Arc<dyn Lister<DesiredResource>>,
    managed: Arc<dyn Lister<ManagedResource>>,
    client: Arc<dyn StorageClient>,
    marker: String,
    template: ManagedTemplate,
    call_timeout: Duration,
}

impl IngressReconciler {
    pub fn new(
        desired: Arc<dyn Lister<DesiredResource>>,
        managed: Arc<dyn Lister<ManagedResource>>,
        client: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            desired,
            managed,
            client,
            marker: DEFAULT_MARKER.to_string(),
            template: ManagedTemplate::default(),
            call_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_template(mut self, template: ManagedTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn marker(&self) -> &str { &self.marker }
    pub fn template(&self) -> &ManagedTemplate { &self.template }

    async fn bounded<F>(&self, op: &'static str, key: &Key, call: F) -> Result<Result<(), ClientError>, SyncError>
    where
        F: Future<Output = Result<(), ClientError>>,
    {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| SyncError::CallTimeout { op, key: key.clone(), after: self.call_timeout })
    }

    async fn create(&self, key: &Key, object: &ManagedResource) -> Result<(), SyncError> {
        match self.bounded("create", key, self.client.create(object)).await? {
            Ok(()) => {
                info!(key = %key, "created managed resource");
                counter!("steward_reconcile_actions_total", 1, "action" => "create");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(key = %key, "managed resource already exists");
                Ok(())
            }
            Err(source) => Err(SyncError::Create { key: key.clone(), source }),
        }
    }

    async fn delete(&self, key: &Key) -> Result<(), SyncError> {
        match self.bounded("delete", key, self.client.delete(key)).await? {
            Ok(()) => {
                info!(key = %key, "deleted managed resource");
                counter!("steward_reconcile_actions_total", 1, "action" => "delete");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(key = %key, "managed resource already gone");
                Ok(())
            }
            Err(source) => Err(SyncError::Delete { key: key.clone(), source }),
        }
    }
}

#[async_trait::async_trait]
impl Reconciler for IngressReconciler {
    async fn sync(&self, key: &Key) -> Result<(), SyncError> {
        let desired = self.desired.get(key);
        let managed = self.managed.get(key);
        let action = plan(key, desired.as_deref(), managed.as_deref(), &self.marker, &self.template);
        debug!(key = %key, desired = desired.is_some(), managed = managed.is_some(), ?action, "sync");
        match action {
            Action::Create { object } => self.create(key, &object).await,
            Action::Delete { key } => self.delete(&key).await,
            Action::Noop { .. } => Ok(()),
        }
    }
}
