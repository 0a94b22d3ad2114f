#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use steward_controller::{translate, EventRouter};
use steward_core::{Change, DesiredResource, EventHandler, Key, ManagedResource, ManagedTemplate, Notification, OwnerRef};
use steward_queue::WorkQueue;

fn key() -> Key { Key::new("default", "web") }

fn web() -> Arc<DesiredResource> {
    Arc::new(DesiredResource::new(key(), "uid-web").with_annotation("ingress/http", "true"))
}

fn owned() -> Arc<ManagedResource> { Arc::new(ManagedTemplate::default().render(&web())) }

fn foreign() -> Arc<ManagedResource> {
    let mut m = ManagedTemplate::default().render(&web());
    m.owner = Some(OwnerRef {
        api_version: "apps/v1".into(),
        kind: "Deployment".into(),
        name: "web".into(),
        uid: "uid-dep".into(),
        controller: true,
    });
    Arc::new(m)
}

#[test]
fn desired_changes_map_to_their_own_key() {
    for n in [
        Notification::Desired(Change::Added(web())),
        Notification::Desired(Change::Deleted(web())),
    ] {
        assert_eq!(translate(&n, "Service"), Some(key()));
    }
}

#[test]
fn managed_changes_map_to_the_owner_key() {
    let mut m = (*owned()).clone();
    m.key = Key::new("default", "web-ingress");
    let n = Notification::Managed(Change::Deleted(Arc::new(m)));
    assert_eq!(translate(&n, "Service"), Some(key()));
}

#[test]
fn scenario_c_foreign_owner_is_ignored() {
    let n = Notification::Managed(Change::Deleted(foreign()));
    assert_eq!(translate(&n, "Service"), None);

    let mut orphan = (*owned()).clone();
    orphan.owner = None;
    assert_eq!(translate(&Notification::Managed(Change::Added(Arc::new(orphan))), "Service"), None);

    let mut not_controller = (*owned()).clone();
    if let Some(o) = not_controller.owner.as_mut() {
        o.controller = false;
    }
    assert_eq!(translate(&Notification::Managed(Change::Added(Arc::new(not_controller))), "Service"), None);
}

#[test]
fn updates_equal_for_reconcile_are_suppressed() {
    let old = web();
    let mut bumped = (*old).clone();
    bumped.resource_version = Some("42".into());
    bumped.generation = Some(7);
    let n = Notification::Desired(Change::Updated { old: old.clone(), new: Arc::new(bumped) });
    assert_eq!(translate(&n, "Service"), None);

    let unmarked = Arc::new(DesiredResource::new(key(), "uid-web"));
    let n = Notification::Desired(Change::Updated { old, new: unmarked });
    assert_eq!(translate(&n, "Service"), Some(key()));

    let n = Notification::Managed(Change::Updated { old: owned(), new: owned() });
    assert_eq!(translate(&n, "Service"), None);
}

#[test]
fn managed_update_losing_its_owner_still_reaches_the_old_owner() {
    let mut stripped = (*owned()).clone();
    stripped.owner = None;
    let n = Notification::Managed(Change::Updated { old: owned(), new: Arc::new(stripped) });
    assert_eq!(translate(&n, "Service"), Some(key()));
}

#[tokio::test(start_paused = true)]
async fn router_feeds_the_queue_and_dedups() {
    let queue: WorkQueue<Key> = WorkQueue::with_default_rate_limiter("test");
    let router = EventRouter::new(queue.clone(), "Service");

    EventHandler::<DesiredResource>::on_add(&router, web());
    EventHandler::<ManagedResource>::on_add(&router, owned());
    EventHandler::<ManagedResource>::on_delete(&router, foreign());
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get().await, Some(key()));

    // re-added while checked out: delivered again once done
    EventHandler::<DesiredResource>::on_delete(&router, web());
    assert!(tokio::time::timeout(Duration::from_millis(50), queue.get()).await.is_err());
    queue.done(&key());
    assert_eq!(queue.get().await, Some(key()));
}
