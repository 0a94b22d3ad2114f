#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use steward_controller::{plan, Action, IngressReconciler, MemoryClient, Reconciler, SyncError};
use steward_core::{ClientError, DesiredResource, Key, ManagedResource, ManagedTemplate, OwnerRef, StorageClient};
use steward_store::{Delta, SharedCache};

struct Harness {
    desired: SharedCache<DesiredResource>,
    managed: SharedCache<ManagedResource>,
    client: Arc<MemoryClient>,
    reconciler: IngressReconciler,
}

impl Harness {
    fn new() -> Self {
        let desired = SharedCache::new("services");
        let managed = SharedCache::new("ingresses");
        let client = Arc::new(MemoryClient::with_mirror(managed.clone()));
        let reconciler = IngressReconciler::new(Arc::new(desired.clone()), Arc::new(managed.clone()), client.clone());
        Self { desired, managed, client, reconciler }
    }
}

fn key() -> Key { Key::new("default", "web") }

fn web(marked: bool) -> DesiredResource {
    let d = DesiredResource::new(key(), "uid-web");
    if marked { d.with_annotation("ingress/http", "true") } else { d }
}

#[tokio::test]
async fn scenario_a_marked_desired_gets_an_owned_managed_resource() {
    let h = Harness::new();
    h.desired.apply(Delta::Applied(web(true)));

    h.reconciler.sync(&key()).await.unwrap();

    let created = h.client.snapshot(&key()).expect("managed resource created");
    assert_eq!(created.key, key());
    assert!(created.is_owned_by(&key(), "Service"));
    assert_eq!(created.owner.as_ref().map(|o| o.uid.as_str()), Some("uid-web"));
    assert_eq!(created.spec.backend_service, "web");
    assert_eq!(h.client.creates(), 1);
}

#[tokio::test]
async fn scenario_b_removing_the_marker_deletes_the_managed_resource() {
    let h = Harness::new();
    h.desired.apply(Delta::Applied(web(true)));
    h.reconciler.sync(&key()).await.unwrap();
    assert!(h.client.snapshot(&key()).is_some());

    h.desired.apply(Delta::Applied(web(false)));
    h.reconciler.sync(&key()).await.unwrap();

    assert!(h.client.snapshot(&key()).is_none());
    assert_eq!(h.client.deletes(), 1);
}

#[tokio::test]
async fn deleted_desired_resource_removes_owned_managed_resource() {
    let h = Harness::new();
    h.desired.apply(Delta::Applied(web(true)));
    h.reconciler.sync(&key()).await.unwrap();

    h.desired.apply(Delta::Deleted(web(true)));
    h.reconciler.sync(&key()).await.unwrap();
    assert!(h.client.is_empty());
}

#[tokio::test]
async fn sync_twice_converges_without_further_mutation() {
    let h = Harness::new();
    h.desired.apply(Delta::Applied(web(true)));
    h.reconciler.sync(&key()).await.unwrap();
    let first = h.client.snapshot(&key());
    h.reconciler.sync(&key()).await.unwrap();
    assert_eq!(h.client.snapshot(&key()), first);
    assert_eq!(h.client.creates(), 1);

    h.desired.apply(Delta::Applied(web(false)));
    h.reconciler.sync(&key()).await.unwrap();
    h.reconciler.sync(&key()).await.unwrap();
    assert_eq!(h.client.deletes(), 1);
    assert!(h.client.is_empty());
}

#[tokio::test]
async fn nothing_desired_nothing_managed_is_a_noop() {
    let h = Harness::new();
    h.reconciler.sync(&key()).await.unwrap();
    h.desired.apply(Delta::Applied(web(false)));
    h.reconciler.sync(&key()).await.unwrap();
    assert_eq!(h.client.creates() + h.client.deletes(), 0);
}

#[tokio::test]
async fn stale_cache_create_conflict_counts_as_success() {
    let h = Harness::new();
    // exists in the backend, not yet observed by the managed cache
    let existing = ManagedTemplate::default().render(&web(true));
    h.client.create(&existing).await.unwrap();
    h.managed.apply(Delta::Deleted(existing));

    h.desired.apply(Delta::Applied(web(true)));
    h.reconciler.sync(&key()).await.unwrap();
    assert_eq!(h.client.creates(), 1);
}

#[tokio::test]
async fn stale_cache_delete_not_found_counts_as_success() {
    let h = Harness::new();
    let gone = ManagedTemplate::default().render(&web(true));
    h.managed.apply(Delta::Applied(gone));

    h.reconciler.sync(&key()).await.unwrap();
    assert_eq!(h.client.deletes(), 0);
}

#[tokio::test]
async fn transient_backend_errors_are_returned() {
    let h = Harness::new();
    h.desired.apply(Delta::Applied(web(true)));
    h.client.fail_next(ClientError::Backend("connection reset".into()));

    let err = h.reconciler.sync(&key()).await.unwrap_err();
    assert!(matches!(err, SyncError::Create { source: ClientError::Backend(_), .. }));
    assert_eq!(err.key(), &key());
    assert!(h.client.is_empty());

    h.reconciler.sync(&key()).await.unwrap();
    assert_eq!(h.client.creates(), 1);
}

#[tokio::test]
async fn managed_resource_with_another_owner_is_left_alone() {
    let h = Harness::new();
    let mut foreign = ManagedTemplate::default().render(&web(true));
    foreign.owner = Some(OwnerRef {
        api_version: "apps/v1".into(),
        kind: "Deployment".into(),
        name: "web".into(),
        uid: "uid-dep".into(),
        controller: true,
    });
    h.client.insert(foreign);

    h.desired.apply(Delta::Applied(web(false)));
    h.reconciler.sync(&key()).await.unwrap();
    assert!(h.client.snapshot(&key()).is_some());
    assert_eq!(h.client.deletes(), 0);
}

#[tokio::test]
async fn custom_marker_and_template_are_honoured() {
    let h = Harness::new();
    let template = ManagedTemplate { host: "web.internal".into(), backend_port: 8080, class_name: None, ..Default::default() };
    let reconciler = IngressReconciler::new(Arc::new(h.desired.clone()), Arc::new(h.managed.clone()), h.client.clone())
        .with_marker("steward.io/expose")
        .with_template(template);

    h.desired.apply(Delta::Applied(web(true)));
    reconciler.sync(&key()).await.unwrap();
    assert!(h.client.is_empty());

    h.desired.apply(Delta::Applied(web(false).with_annotation("steward.io/expose", "")));
    reconciler.sync(&key()).await.unwrap();
    let m = h.client.snapshot(&key()).unwrap();
    assert_eq!(m.spec.host, "web.internal");
    assert_eq!(m.spec.backend_port, 8080);
    assert_eq!(m.spec.class_name, None);
}

struct HangingClient;

#[async_trait::async_trait]
impl StorageClient for HangingClient {
    async fn create(&self, _obj: &ManagedResource) -> Result<(), ClientError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
    async fn delete(&self, _key: &Key) -> Result<(), ClientError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
    async fn get(&self, _key: &Key) -> Result<Option<ManagedResource>, ClientError> { Ok(None) }
}

#[tokio::test(start_paused = true)]
async fn storage_calls_are_bounded() {
    let desired = SharedCache::new("services");
    let managed: SharedCache<ManagedResource> = SharedCache::new("ingresses");
    desired.apply(Delta::Applied(web(true)));
    let reconciler = IngressReconciler::new(Arc::new(desired), Arc::new(managed), Arc::new(HangingClient))
        .with_call_timeout(Duration::from_secs(2));

    let err = reconciler.sync(&key()).await.unwrap_err();
    assert!(matches!(err, SyncError::CallTimeout { op: "create", .. }));
}

#[test]
fn decision_table() {
    let t = ManagedTemplate::default();
    let k = key();
    let owned = t.render(&web(true));

    assert!(matches!(plan(&k, Some(&web(true)), None, "ingress/http", &t), Action::Create { .. }));
    assert_eq!(plan(&k, Some(&web(true)), Some(&owned), "ingress/http", &t), Action::Noop { reason: "converged" });
    assert_eq!(plan(&k, Some(&web(false)), Some(&owned), "ingress/http", &t), Action::Delete { key: k.clone() });
    assert_eq!(plan(&k, None, Some(&owned), "ingress/http", &t), Action::Delete { key: k.clone() });
    assert_eq!(plan(&k, None, None, "ingress/http", &t), Action::Noop { reason: "nothing desired" });
    assert_eq!(plan(&k, Some(&web(false)), None, "ingress/http", &t), Action::Noop { reason: "nothing desired" });
}

#[test]
fn planned_actions_serialize_with_a_tag() {
    let t = ManagedTemplate::default();
    let v = serde_json::to_value(plan(&key(), None, None, "ingress/http", &t)).unwrap();
    assert_eq!(v, serde_json::json!({ "action": "noop", "reason": "nothing desired" }));
    let v = serde_json::to_value(plan(&key(), Some(&web(true)), None, "ingress/http", &t)).unwrap();
    assert_eq!(v["action"], "create");
    assert_eq!(v["object"]["key"]["name"], "web");
}
