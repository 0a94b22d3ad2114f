//! Mapping between kube objects and steward resources.

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use steward_core::{DesiredResource, Key, ManagedResource, ManagedSpec, OwnerRef};

fn key_of<K: ResourceExt>(obj: &K) -> Key { Key::new(obj.namespace().unwrap_or_default(), obj.name_any()) }

pub fn desired_from_service(svc: &Service) -> DesiredResource {
    DesiredResource {
        key: key_of(svc),
        uid: svc.uid().unwrap_or_default(),
        resource_version: svc.resource_version(),
        generation: svc.metadata.generation,
        labels: svc.labels().clone(),
        annotations: svc.annotations().clone(),
    }
}

/// Read back a managed resource. Only the first rule and its first path are
/// considered; that is all [`ingress_from_managed`] ever writes.
pub fn managed_from_ingress(ing: &Ingress) -> ManagedResource {
    let refs = ing.owner_references();
    let owner = refs
        .iter()
        .find(|o| o.controller == Some(true))
        .or_else(|| refs.first())
        .map(|o| OwnerRef {
            api_version: o.api_version.clone(),
            kind: o.kind.clone(),
            name: o.name.clone(),
            uid: o.uid.clone(),
            controller: o.controller.unwrap_or(false),
        });

    let spec = ing.spec.as_ref();
    let rule = spec.and_then(|s| s.rules.as_ref()).and_then(|r| r.first());
    let path = rule.and_then(|r| r.http.as_ref()).and_then(|h| h.paths.first());
    let backend = path.and_then(|p| p.backend.service.as_ref());

    ManagedResource {
        key: key_of(ing),
        owner,
        spec: ManagedSpec {
            class_name: spec.and_then(|s| s.ingress_class_name.clone()),
            host: rule.and_then(|r| r.host.clone()).unwrap_or_default(),
            path: path.and_then(|p| p.path.clone()).unwrap_or_default(),
            path_type: path.map(|p| p.path_type.clone()).unwrap_or_default(),
            backend_service: backend.map(|b| b.name.clone()).unwrap_or_default(),
            backend_port: backend.and_then(|b| b.port.as_ref()).and_then(|p| p.number).unwrap_or_default(),
        },
    }
}

fn non_empty(s: &str) -> Option<String> { (!s.is_empty()).then(|| s.to_string()) }

/// Ingress to create for `m`: one rule, one path, a service backend by port
/// number, and the controller owner reference with blocking deletion.
pub fn ingress_from_managed(m: &ManagedResource) -> Ingress {
    let owner_references = m.owner.as_ref().map(|o| {
        vec![OwnerReference {
            api_version: o.api_version.clone(),
            kind: o.kind.clone(),
            name: o.name.clone(),
            uid: o.uid.clone(),
            controller: Some(o.controller),
            block_owner_deletion: Some(true),
        }]
    });
    let path = HTTPIngressPath {
        path: non_empty(&m.spec.path),
        path_type: m.spec.path_type.clone(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: m.spec.backend_service.clone(),
                port: Some(ServiceBackendPort { number: Some(m.spec.backend_port), name: None }),
            }),
            resource: None,
        },
    };

    Ingress {
        metadata: ObjectMeta {
            name: Some(m.key.name.clone()),
            namespace: non_empty(&m.key.namespace),
            owner_references,
            ..ObjectMeta::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: m.spec.class_name.clone(),
            rules: Some(vec![IngressRule {
                host: non_empty(&m.spec.host),
                http: Some(HTTPIngressRuleValue { paths: vec![path] }),
            }]),
            ..IngressSpec::default()
        }),
        status: None,
    }
}
