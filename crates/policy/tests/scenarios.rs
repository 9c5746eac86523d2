#![forbid(unsafe_code)]

use kaudit_core::{
    ConfigMapData, Finding, ObjectSnapshot, ObjectState, PolicyRule, ResourceKey, ResourceKind, ResourceVersion,
    RoleBindingData, RoleData, RoleRef, SecretData, Severity, Subject,
};
use kaudit_policy::{BoundRole, EvalContext, PolicyEngine};

fn engine() -> PolicyEngine { PolicyEngine::with_default_rules() }

fn key(kind: ResourceKind, name: &str) -> ResourceKey { ResourceKey::new(kind, "default", name) }

fn snap(rv: &str, state: ObjectState) -> ObjectSnapshot { ObjectSnapshot::new(ResourceVersion::new(rv), state) }

fn configmap(pairs: &[(&str, &str)]) -> ObjectState {
    ObjectState::ConfigMap(ConfigMapData {
        data: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        binary_keys: Vec::new(),
    })
}

fn role(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> RoleData {
    RoleData {
        rules: vec![PolicyRule {
            api_groups: api_groups.iter().map(|s| s.to_string()).collect(),
            resources: resources.iter().map(|s| s.to_string()).collect(),
            verbs: verbs.iter().map(|s| s.to_string()).collect(),
            resource_names: Vec::new(),
        }],
    }
}

fn ids(findings: &[Finding]) -> Vec<&str> { findings.iter().map(|f| f.rule_id.as_str()).collect() }

#[test]
fn aws_key_in_configmap_is_flagged() {
    let k = key(ResourceKind::ConfigMap, "app-config");
    let out = engine().evaluate(&k, &snap("5", configmap(&[("aws", "AKIAZ3kq9P0xWm7Lr2Tb")])), &EvalContext::default());
    assert_eq!(ids(&out), vec!["configmap.sensitive-pattern"]);
    assert_eq!(out[0].key, k);
    assert_eq!(out[0].resource_version, ResourceVersion::new("5"));
    assert!(!out[0].detail.contains("AKIAZ3kq9P0xWm7Lr2Tb"), "detail must not echo the secret");
}

#[test]
fn plain_configmap_is_clean() {
    let out = engine().evaluate(
        &key(ResourceKind::ConfigMap, "app-config"),
        &snap("1", configmap(&[("greeting", "hello world"), ("example", "sensitive")])),
        &EvalContext::default(),
    );
    assert!(out.is_empty(), "{out:?}");
}

#[test]
fn empty_configmap_is_clean() {
    let out = engine().evaluate(&key(ResourceKind::ConfigMap, "empty"), &snap("1", configmap(&[])), &EvalContext::default());
    assert!(out.is_empty());
}

#[test]
fn two_leaks_in_one_configmap_merge_into_one_finding() {
    let out = engine().evaluate(
        &key(ResourceKind::ConfigMap, "leaks"),
        &snap("2", configmap(&[("a", "AKIAZ3kq9P0xWm7Lr2Tb"), ("db_password", "postgres://admin:hunter2@db:5432/app")])),
        &EvalContext::default(),
    );
    assert_eq!(ids(&out), vec!["configmap.sensitive-pattern"]);
    assert_eq!(out[0].severity, Severity::Critical);
}

#[test]
fn wildcard_role_is_critical() {
    let out = engine().evaluate(
        &key(ResourceKind::Role, "admin"),
        &snap("3", ObjectState::Role(role(&[""], &["*"], &["*"]))),
        &EvalContext::default(),
    );
    assert!(ids(&out).contains(&"role.wildcard-all"), "{out:?}");
    let wild = out.iter().find(|f| f.rule_id == "role.wildcard-all").map(|f| f.severity);
    assert_eq!(wild, Some(Severity::Critical));
}

#[test]
fn read_only_pod_role_is_clean() {
    let out = engine().evaluate(
        &key(ResourceKind::Role, "reader"),
        &snap("3", ObjectState::Role(role(&[""], &["pods"], &["get", "list", "watch"]))),
        &EvalContext::default(),
    );
    assert!(out.is_empty(), "{out:?}");
}

#[test]
fn role_without_rules_is_clean() {
    let out = engine().evaluate(
        &key(ResourceKind::Role, "empty"),
        &snap("1", ObjectState::Role(RoleData::default())),
        &EvalContext::default(),
    );
    assert!(out.is_empty());
}

#[test]
fn ghost_role_binding_is_dangling() {
    let state = ObjectState::RoleBinding(RoleBindingData {
        role_ref: RoleRef { api_group: "rbac.authorization.k8s.io".into(), kind: "Role".into(), name: "ghost-role".into() },
        subjects: vec![Subject { kind: "User".into(), name: "test-user".into(), namespace: None }],
    });
    let out = engine().evaluate(
        &key(ResourceKind::RoleBinding, "test-rolebinding"),
        &snap("9", state),
        &EvalContext::with_bound_role(BoundRole::Missing),
    );
    assert_eq!(ids(&out), vec!["rolebinding.dangling-ref"]);
}

#[test]
fn tls_secret_missing_key_is_flagged() {
    let state = ObjectState::Secret(SecretData {
        secret_type: Some("kubernetes.io/tls".into()),
        data: [("tls.crt".to_string(), b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n".to_vec())]
            .into_iter()
            .collect(),
        annotations: Default::default(),
    });
    let out = engine().evaluate(&key(ResourceKind::Secret, "tls"), &snap("4", state), &EvalContext::default());
    assert_eq!(ids(&out), vec!["secret.type-shape"]);
}

#[test]
fn mismatched_kind_yields_nothing() {
    let out = engine().evaluate(
        &key(ResourceKind::Secret, "not-a-secret"),
        &snap("1", configmap(&[("aws", "AKIAZ3kq9P0xWm7Lr2Tb")])),
        &EvalContext::default(),
    );
    assert!(out.is_empty());
}

#[test]
fn catalog_lists_every_rule_once() {
    let catalog = engine().catalog();
    assert_eq!(catalog.len(), 13);
    let mut seen: Vec<_> = catalog.iter().map(|r| r.id).collect();
    seen.dedup();
    assert_eq!(seen.len(), 13);
}
