//! k8s-openapi objects → kaudit snapshots.
//!
//! Optional fields become empty collections; a missing resourceVersion becomes "".

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule as K8sPolicyRule, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kaudit_core::{
    ConfigMapData, ObjectSnapshot, ObjectState, PolicyRule, ResourceKey, ResourceKind, ResourceVersion,
    RoleBindingData, RoleData, RoleRef, SecretData, Subject,
};

fn version(meta: &ObjectMeta) -> ResourceVersion {
    ResourceVersion::new(meta.resource_version.clone().unwrap_or_default())
}

/// Key for a namespaced object; `default_ns` fills in a missing namespace.
pub fn key_for(kind: ResourceKind, meta: &ObjectMeta, default_ns: &str) -> ResourceKey {
    ResourceKey::new(
        kind,
        meta.namespace.clone().unwrap_or_else(|| default_ns.to_string()),
        meta.name.clone().unwrap_or_default(),
    )
}

pub fn configmap(cm: &ConfigMap) -> ObjectSnapshot {
    ObjectSnapshot::new(
        version(&cm.metadata),
        ObjectState::ConfigMap(ConfigMapData {
            data: cm.data.clone().unwrap_or_default(),
            binary_keys: cm.binary_data.as_ref().map(|m| m.keys().cloned().collect()).unwrap_or_default(),
        }),
    )
}

pub fn secret(s: &Secret) -> ObjectSnapshot {
    let data: BTreeMap<String, Vec<u8>> = s
        .data
        .as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default();
    ObjectSnapshot::new(
        version(&s.metadata),
        ObjectState::Secret(SecretData {
            secret_type: s.type_.clone(),
            data,
            annotations: s.metadata.annotations.clone().unwrap_or_default(),
        }),
    )
}

fn policy_rule(r: &K8sPolicyRule) -> PolicyRule {
    PolicyRule {
        api_groups: r.api_groups.clone().unwrap_or_default(),
        resources: r.resources.clone().unwrap_or_default(),
        verbs: r.verbs.clone(),
        resource_names: r.resource_names.clone().unwrap_or_default(),
    }
}

fn role_data(rules: Option<&Vec<K8sPolicyRule>>) -> RoleData {
    RoleData { rules: rules.map(|rs| rs.iter().map(policy_rule).collect()).unwrap_or_default() }
}

pub fn role(r: &Role) -> ObjectSnapshot {
    ObjectSnapshot::new(version(&r.metadata), ObjectState::Role(role_data(r.rules.as_ref())))
}

pub fn role_rules(r: &Role) -> RoleData { role_data(r.rules.as_ref()) }

/// ClusterRoles are only read as binding targets; aggregated rules are taken as stored.
pub fn cluster_role_rules(r: &ClusterRole) -> RoleData { role_data(r.rules.as_ref()) }

pub fn rolebinding(rb: &RoleBinding) -> ObjectSnapshot {
    ObjectSnapshot::new(
        version(&rb.metadata),
        ObjectState::RoleBinding(RoleBindingData {
            role_ref: RoleRef {
                api_group: rb.role_ref.api_group.clone(),
                kind: rb.role_ref.kind.clone(),
                name: rb.role_ref.name.clone(),
            },
            subjects: rb
                .subjects
                .as_ref()
                .map(|ss| {
                    ss.iter()
                        .map(|s| Subject { kind: s.kind.clone(), name: s.name.clone(), namespace: s.namespace.clone() })
                        .collect()
                })
                .unwrap_or_default(),
        }),
    )
}
