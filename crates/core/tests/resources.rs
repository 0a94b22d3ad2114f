#![forbid(unsafe_code)]

use steward_core::{DesiredResource, Key, KeyParseError, ManagedTemplate, OwnerRef};

fn web() -> DesiredResource {
    DesiredResource::new(Key::new("default", "web"), "uid-web").with_annotation("ingress/http", "true")
}

#[test]
fn key_parses_and_renders() {
    let k: Key = "default/web".parse().unwrap();
    assert_eq!(k, Key::new("default", "web"));
    assert_eq!(k.to_string(), "default/web");

    let c: Key = "node-1".parse().unwrap();
    assert!(!c.is_namespaced());
    assert_eq!(c.to_string(), "node-1");

    assert_eq!("".parse::<Key>(), Err(KeyParseError::Empty));
    assert!(matches!("a/b/c".parse::<Key>(), Err(KeyParseError::Malformed(_))));
    assert!(matches!("/web".parse::<Key>(), Err(KeyParseError::Malformed(_))));
    assert!(matches!("default/".parse::<Key>(), Err(KeyParseError::Malformed(_))));
}

#[test]
fn key_serializes_as_struct() {
    let v = serde_json::to_value(Key::new("ns", "a")).unwrap();
    assert_eq!(v, serde_json::json!({ "namespace": "ns", "name": "a" }));
}

#[test]
fn template_renders_owned_ingress_shape() {
    let desired = web();
    let managed = ManagedTemplate::default().render(&desired);
    assert_eq!(managed.key, desired.key);
    assert_eq!(
        managed.owner,
        Some(OwnerRef {
            api_version: "v1".into(),
            kind: "Service".into(),
            name: "web".into(),
            uid: "uid-web".into(),
            controller: true,
        })
    );
    assert_eq!(managed.spec.class_name.as_deref(), Some("nginx"));
    assert_eq!(managed.spec.host, "example.com");
    assert_eq!(managed.spec.path, "/");
    assert_eq!(managed.spec.path_type, "Prefix");
    assert_eq!(managed.spec.backend_service, "web");
    assert_eq!(managed.spec.backend_port, 80);
    assert!(managed.is_owned_by(&desired.key, "Service"));
    assert!(!managed.is_owned_by(&desired.key, "Deployment"));
}

#[test]
fn owner_key_requires_controller_ref_of_expected_kind() {
    let mut managed = ManagedTemplate::default().render(&web());
    assert_eq!(managed.owner_key("Service"), Some(Key::new("default", "web")));

    if let Some(o) = managed.owner.as_mut() { o.controller = false; }
    assert_eq!(managed.owner_key("Service"), None);

    managed.owner = None;
    assert_eq!(managed.owner_key("Service"), None);
}

#[test]
fn reconcile_equality_ignores_versions() {
    let mut a = web();
    a.resource_version = Some("1".into());
    let mut b = a.clone();
    b.resource_version = Some("2".into());
    b.generation = Some(7);
    assert!(a.same_for_reconcile(&b));

    let c = a.clone().with_label("tier", "front");
    assert!(!a.same_for_reconcile(&c));

    let mut d = a.clone();
    d.annotations.clear();
    assert!(!a.same_for_reconcile(&d));
    assert!(a.has_marker("ingress/http"));
    assert!(!d.has_marker("ingress/http"));
}

#[test]
fn default_resource_has_an_empty_cluster_key() {
    let d = DesiredResource::default();
    assert_eq!(d.key, Key::default());
    assert!(!d.key.is_namespaced());
    assert_eq!(d.key.to_string(), "");

    let named = DesiredResource::new(Key::new("default", "web"), "uid-web");
    assert_eq!(named.uid, "uid-web");
    assert!(named.annotations.is_empty());
}
