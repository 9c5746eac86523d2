//! Kind-specific object state as seen by the policy rules.
//!
//! Fields that may be absent on the wire are normalised to empty collections
//! so a malformed object yields "no findings for that field" instead of an error.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ResourceKind, ResourceVersion};

/// Fetched object state plus the version token it was read at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectSnapshot {
    pub resource_version: ResourceVersion,
    pub state: ObjectState,
}

impl ObjectSnapshot {
    pub fn new(resource_version: ResourceVersion, state: ObjectState) -> Self {
        Self { resource_version, state }
    }

    pub fn kind(&self) -> ResourceKind { self.state.kind() }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ObjectState {
    ConfigMap(ConfigMapData),
    Secret(SecretData),
    Role(RoleData),
    RoleBinding(RoleBindingData),
}

impl ObjectState {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ObjectState::ConfigMap(_) => ResourceKind::ConfigMap,
            ObjectState::Secret(_) => ResourceKind::Secret,
            ObjectState::Role(_) => ResourceKind::Role,
            ObjectState::RoleBinding(_) => ResourceKind::RoleBinding,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConfigMapData {
    pub data: BTreeMap<String, String>,
    /// Keys of `binaryData`; values are not scanned.
    #[serde(default)]
    pub binary_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SecretData {
    /// Declared `type`, e.g. `kubernetes.io/tls`. `None` means `Opaque`.
    pub secret_type: Option<String>,
    pub data: BTreeMap<String, Vec<u8>>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PolicyRule {
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default)]
    pub resource_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoleData {
    /// Rule order is preserved; findings reference rules by index.
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoleRef {
    pub api_group: String,
    /// `Role` or `ClusterRole`.
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Subject {
    /// `User`, `Group` or `ServiceAccount`.
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RoleBindingData {
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
}
