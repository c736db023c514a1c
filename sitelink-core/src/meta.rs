//! Object identity shared by every persisted resource.

use serde::{Deserialize, Serialize};

/// Identity and versioning metadata assigned by the object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Opaque identity assigned at creation. Empty until stored.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Incremented by the store on every accepted write.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_refs: Vec<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Stable `namespace/name` identity.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Replace any owner reference of the same kind with `owner`.
    pub fn set_owner(&mut self, owner: OwnerReference) {
        self.owner_refs.retain(|r| r.kind != owner.kind);
        self.owner_refs.push(owner);
    }
}

/// Link from a dependent object to the object that owns its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerReference {
    /// Reference to a site object.
    pub fn site(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            kind: "Site".to_string(),
            name: name.into(),
            uid: uid.into(),
        }
    }
}
