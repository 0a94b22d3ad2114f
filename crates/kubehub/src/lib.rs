//! Steward kubehub: list+watch wiring and the Ingress storage client
//!
//! Watchers convert kube objects into steward resources and push them as
//! store [`Delta`]s. [`KubeIngressClient`] is the authoritative
//! [`StorageClient`] for managed resources.

#![forbid(unsafe_code)]

use std::fmt::Debug;

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, PostParams},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client, Resource,
};
use metrics::counter;
use serde::de::DeserializeOwned;
use steward_core::{ClientError, Key, ManagedResource, StorageClient};
use steward_store::Delta;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

mod convert;

pub use convert::{desired_from_service, ingress_from_managed, managed_from_ingress};

pub async fn connect() -> Result<Client> {
    Client::try_default().await.context("building kube client from kubeconfig or in-cluster config")
}

/// Namespaced or cluster-wide API for a namespaced kind.
pub fn scoped_api<K>(client: Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// List+watch `api`, converting every object with `convert` and sending the
/// result into `delta_tx`. Watch errors are logged and retried with backoff.
/// Returns once the receiver is gone or the stream ends.
pub async fn start_watcher<K, T>(
    name: &'static str,
    api: Api<K>,
    convert: fn(&K) -> T,
    delta_tx: mpsc::Sender<Delta<T>>,
) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    T: Send + 'static,
{
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(watcher = name, "watcher started");
    while let Some(ev) = stream.next().await {
        let delta = match ev {
            Ok(Event::Applied(o)) => Delta::Applied(convert(&o)),
            Ok(Event::Deleted(o)) => Delta::Deleted(convert(&o)),
            Ok(Event::Restarted(list)) => {
                debug!(watcher = name, count = list.len(), "watch restart");
                Delta::Restarted(list.iter().map(convert).collect())
            }
            Err(e) => {
                warn!(watcher = name, error = %e, "watch error");
                counter!("steward_watch_errors_total", 1, "watcher" => name);
                continue;
            }
        };
        if delta_tx.send(delta).await.is_err() {
            debug!(watcher = name, "delta receiver closed");
            return Ok(());
        }
    }
    warn!(watcher = name, "watcher stream ended");
    Ok(())
}

/// Creates, deletes and reads Ingresses through the API server.
#[derive(Clone)]
pub struct KubeIngressClient {
    client: Client,
    params: PostParams,
}

impl KubeIngressClient {
    pub fn new(client: Client) -> Self { Self { client, params: PostParams::default() } }

    /// Identify writes with this field manager.
    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.params.field_manager = Some(manager.into());
        self
    }

    fn api(&self, key: &Key) -> Api<Ingress> {
        if key.is_namespaced() {
            Api::namespaced(self.client.clone(), &key.namespace)
        } else {
            Api::default_namespaced(self.client.clone())
        }
    }
}

fn client_error(key: &Key, e: kube::Error) -> ClientError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => ClientError::AlreadyExists(key.clone()),
        kube::Error::Api(ae) if ae.code == 409 => ClientError::Conflict(ae.message),
        kube::Error::Api(ae) if ae.code == 404 => ClientError::NotFound(key.clone()),
        other => ClientError::Backend(other.to_string()),
    }
}

#[async_trait::async_trait]
impl StorageClient for KubeIngressClient {
    async fn create(&self, obj: &ManagedResource) -> Result<(), ClientError> {
        let ing = ingress_from_managed(obj);
        self.api(&obj.key).create(&self.params, &ing).await.map_err(|e| client_error(&obj.key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), ClientError> {
        self.api(key).delete(&key.name, &DeleteParams::default()).await.map_err(|e| client_error(key, e))?;
        Ok(())
    }

    async fn get(&self, key: &Key) -> Result<Option<ManagedResource>, ClientError> {
        let found = self.api(key).get_opt(&key.name).await.map_err(|e| client_error(key, e))?;
        Ok(found.as_ref().map(managed_from_ingress))
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("ingresses \"web\" {reason}"),
            reason: reason.into(),
            code,
        })
    }

    fn key() -> Key { Key::new("default", "web") }

    #[test]
    fn already_exists_maps_to_already_exists() {
        let err = client_error(&key(), api_error(409, "AlreadyExists"));
        assert_eq!(err, ClientError::AlreadyExists(key()));
        assert!(err.is_already_exists());
    }

    #[test]
    fn other_conflicts_keep_the_server_message() {
        let err = client_error(&key(), api_error(409, "Conflict"));
        assert_eq!(err, ClientError::Conflict("ingresses \"web\" Conflict".into()));
        assert!(!err.is_already_exists());
    }

    #[test]
    fn not_found_maps_to_not_found() {
        let err = client_error(&key(), api_error(404, "NotFound"));
        assert_eq!(err, ClientError::NotFound(key()));
        assert!(err.is_not_found());
    }

    #[test]
    fn server_errors_are_backend_errors() {
        let err = client_error(&key(), api_error(500, "InternalError"));
        assert!(matches!(err, ClientError::Backend(_)));
        assert!(!err.is_not_found() && !err.is_already_exists());
    }
}
