//! Desired (input) and managed (derived output) resource snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Key, Keyed};

/// Watched input declaration, e.g. a Service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredResource {
    pub key: Key,
    pub uid: String,
    pub resource_version: Option<String>,
    pub generation: Option<i64>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl DesiredResource {
    pub fn new(key: Key, uid: impl Into<String>) -> Self {
        Self { key, uid: uid.into(), ..Default::default() }
    }

    pub fn with_annotation(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.annotations.insert(k.into(), v.into());
        self
    }

    pub fn with_label(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.labels.insert(k.into(), v.into());
        self
    }

    /// Presence of the marker annotation is the intent; its value is not inspected.
    pub fn has_marker(&self, marker: &str) -> bool { self.annotations.contains_key(marker) }

    /// Equality over the fields reconciliation reads. Resource version and
    /// generation bump on every write, including status-only writes, and are
    /// ignored here.
    pub fn same_for_reconcile(&self, other: &Self) -> bool {
        self.key == other.key
            && self.uid == other.uid
            && self.labels == other.labels
            && self.annotations == other.annotations
    }
}

impl Keyed for DesiredResource {
    fn key(&self) -> &Key { &self.key }
}

/// Non-owning attribution link from a managed resource back to its cause.
///
/// Owners live in the same namespace as the object that references them, so
/// only the name is carried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    pub controller: bool,
}

impl OwnerRef {
    pub fn controller_of(api_version: &str, kind: &str, owner: &DesiredResource) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: owner.key.name.clone(),
            uid: owner.uid.clone(),
            controller: true,
        }
    }
}

/// Ingress-shaped payload of a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedSpec {
    pub class_name: Option<String>,
    pub host: String,
    pub path: String,
    pub path_type: String,
    pub backend_service: String,
    pub backend_port: i32,
}

/// Derived output the reconciler creates and deletes, e.g. an Ingress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    pub key: Key,
    pub owner: Option<OwnerRef>,
    pub spec: ManagedSpec,
}

impl ManagedResource {
    /// Owner key derived from the controller owner reference, when it has the
    /// expected kind.
    pub fn owner_key(&self, owner_kind: &str) -> Option<Key> {
        let owner = self.owner.as_ref()?;
        if !owner.controller || owner.kind != owner_kind {
            return None;
        }
        Some(Key::new(self.key.namespace.clone(), owner.name.clone()))
    }

    /// True when the controller owner reference points at `key` with `owner_kind`.
    pub fn is_owned_by(&self, key: &Key, owner_kind: &str) -> bool {
        self.owner_key(owner_kind).as_ref() == Some(key)
    }

    pub fn same_for_reconcile(&self, other: &Self) -> bool {
        self.key == other.key && self.owner == other.owner && self.spec == other.spec
    }
}

impl Keyed for ManagedResource {
    fn key(&self) -> &Key { &self.key }
}

/// How a managed resource is derived from its desired resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedTemplate {
    pub owner_api_version: String,
    pub owner_kind: String,
    pub class_name: Option<String>,
    pub host: String,
    pub path: String,
    pub path_type: String,
    pub backend_port: i32,
}

impl Default for ManagedTemplate {
    fn default() -> Self {
        Self {
            owner_api_version: "v1".to_string(),
            owner_kind: "Service".to_string(),
            class_name: Some("nginx".to_string()),
            host: "example.com".to_string(),
            path: "/".to_string(),
            path_type: "Prefix".to_string(),
            backend_port: 80,
        }
    }
}

impl ManagedTemplate {
    /// Build the managed resource for `desired`: same key, controller owner
    /// reference, backend pointing at the desired resource by name.
    pub fn render(&self, desired: &DesiredResource) -> ManagedResource {
        ManagedResource {
            key: desired.key.clone(),
            owner: Some(OwnerRef::controller_of(&self.owner_api_version, &self.owner_kind, desired)),
            spec: ManagedSpec {
                class_name: self.class_name.clone(),
                host: self.host.clone(),
                path: self.path.clone(),
                path_type: self.path_type.clone(),
                backend_service: desired.key.name.clone(),
                backend_port: self.backend_port,
            },
        }
    }
}
