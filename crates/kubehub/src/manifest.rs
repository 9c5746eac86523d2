//! Offline manifests: YAML (multi-document) or JSON, `kind: List` flattened.
//!
//! Objects without a namespace land in `default`; objects without a
//! resourceVersion get [`LOCAL_VERSION`].

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::rbac::v1::{ClusterRole, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kaudit_core::{ObjectSnapshot, ResourceKey, ResourceKind, RoleData};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::convert;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const LOCAL_VERSION: &str = "local";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("document {doc}: invalid YAML: {source}")]
    Yaml { doc: usize, source: serde_yaml::Error },
    #[error("document {doc}: {kind} {name:?}: {source}")]
    Decode { doc: usize, kind: String, name: String, source: serde_json::Error },
}

#[derive(Debug, Default)]
pub struct Manifest {
    pub objects: Vec<(ResourceKey, ObjectSnapshot)>,
    pub cluster_roles: Vec<(String, RoleData)>,
    /// `apiVersion/kind` of documents that are not audited.
    pub skipped: Vec<String>,
}

impl Manifest {
    pub fn extend(&mut self, other: Manifest) {
        self.objects.extend(other.objects);
        self.cluster_roles.extend(other.cluster_roles);
        self.skipped.extend(other.skipped);
    }
}

/// Parse every document in `text`. JSON is valid YAML, so one path covers both.
pub fn parse(text: &str) -> Result<Manifest, ManifestError> {
    let mut out = Manifest::default();
    for (doc, de) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = serde_yaml::Value::deserialize(de).map_err(|source| ManifestError::Yaml { doc, source })?;
        if value.is_null() {
            continue;
        }
        let value = serde_json::to_value(&value).map_err(|source| ManifestError::Decode {
            doc,
            kind: "<unknown>".into(),
            name: String::new(),
            source,
        })?;
        push_value(&mut out, doc, value)?;
    }
    debug!(objects = out.objects.len(), cluster_roles = out.cluster_roles.len(), skipped = out.skipped.len(), "manifest parsed");
    Ok(out)
}

fn str_field<'a>(v: &'a serde_json::Value, field: &str) -> &'a str {
    v.get(field).and_then(|f| f.as_str()).unwrap_or_default()
}

fn push_value(out: &mut Manifest, doc: usize, value: serde_json::Value) -> Result<(), ManifestError> {
    let api_version = str_field(&value, "apiVersion").to_string();
    let kind = str_field(&value, "kind").to_string();
    match (api_version.as_str(), kind.as_str()) {
        (_, "List") | (_, "ConfigMapList") | (_, "SecretList") | (_, "RoleList") | (_, "RoleBindingList")
        | (_, "ClusterRoleList") => {
            if let Some(serde_json::Value::Array(items)) = value.get("items").cloned() {
                for item in items {
                    push_value(out, doc, item)?;
                }
            }
        }
        ("v1", "ConfigMap") => {
            let mut cm: ConfigMap = decode(doc, &kind, value)?;
            fill_version(&mut cm.metadata);
            let key = convert::key_for(ResourceKind::ConfigMap, &cm.metadata, DEFAULT_NAMESPACE);
            out.objects.push((key, convert::configmap(&cm)));
        }
        ("v1", "Secret") => {
            let mut s: Secret = decode(doc, &kind, value)?;
            fill_version(&mut s.metadata);
            merge_string_data(&mut s);
            let key = convert::key_for(ResourceKind::Secret, &s.metadata, DEFAULT_NAMESPACE);
            out.objects.push((key, convert::secret(&s)));
        }
        ("rbac.authorization.k8s.io/v1", "Role") => {
            let mut r: Role = decode(doc, &kind, value)?;
            fill_version(&mut r.metadata);
            let key = convert::key_for(ResourceKind::Role, &r.metadata, DEFAULT_NAMESPACE);
            out.objects.push((key, convert::role(&r)));
        }
        ("rbac.authorization.k8s.io/v1", "RoleBinding") => {
            let mut rb: RoleBinding = decode(doc, &kind, value)?;
            fill_version(&mut rb.metadata);
            let key = convert::key_for(ResourceKind::RoleBinding, &rb.metadata, DEFAULT_NAMESPACE);
            out.objects.push((key, convert::rolebinding(&rb)));
        }
        ("rbac.authorization.k8s.io/v1", "ClusterRole") => {
            let cr: ClusterRole = decode(doc, &kind, value)?;
            out.cluster_roles.push((cr.metadata.name.clone().unwrap_or_default(), convert::cluster_role_rules(&cr)));
        }
        _ => out.skipped.push(format!("{api_version}/{kind}")),
    }
    Ok(())
}

fn decode<K: DeserializeOwned>(doc: usize, kind: &str, value: serde_json::Value) -> Result<K, ManifestError> {
    let name = value.pointer("/metadata/name").and_then(|n| n.as_str()).unwrap_or_default().to_string();
    serde_json::from_value(value).map_err(|source| ManifestError::Decode { doc, kind: kind.to_string(), name, source })
}

fn fill_version(meta: &mut ObjectMeta) {
    if meta.resource_version.is_none() {
        meta.resource_version = Some(LOCAL_VERSION.to_string());
    }
}

/// `stringData` is write-only on the API server; fold it into `data` the same way.
fn merge_string_data(s: &mut Secret) {
    let Some(string_data) = s.string_data.take() else { return };
    let data: &mut BTreeMap<String, ByteString> = s.data.get_or_insert_with(BTreeMap::new);
    for (k, v) in string_data {
        data.insert(k, ByteString(v.into_bytes()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaudit_core::ObjectState;

    #[test]
    fn string_data_overrides_data() {
        let m = parse(
            "apiVersion: v1\nkind: Secret\nmetadata: {name: s}\ndata: {password: b2xk}\nstringData: {password: new}\n",
        )
        .expect("parse");
        let ObjectState::Secret(data) = &m.objects[0].1.state else { panic!("not a secret") };
        assert_eq!(data.data["password"], b"new".to_vec());
    }

    #[test]
    fn unknown_kinds_are_skipped() {
        let m = parse("apiVersion: apps/v1\nkind: Deployment\nmetadata: {name: d}\n").expect("parse");
        assert!(m.objects.is_empty());
        assert_eq!(m.skipped, vec!["apps/v1/Deployment".to_string()]);
    }

    #[test]
    fn missing_version_and_namespace_get_defaults() {
        let m = parse("apiVersion: v1\nkind: ConfigMap\nmetadata: {name: a}\n").expect("parse");
        assert_eq!(m.objects[0].0.namespace, DEFAULT_NAMESPACE);
        assert_eq!(m.objects.len(), 1);
        assert_eq!(m.objects[0].1.resource_version.as_str(), LOCAL_VERSION);
    }
}
