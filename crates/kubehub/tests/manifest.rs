#![forbid(unsafe_code)]

use std::sync::Arc;

use kaudit_core::{EnqueueReason, EventType, QueueEntry, ResourceKind};
use kaudit_kubehub::manifest;
use kaudit_policy::PolicyEngine;
use kaudit_reconcile::{ControllerConfig, MemorySink, MemoryStore, Reconciler};

const BUNDLE: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-config
  namespace: default
  resourceVersion: "7"
data:
  example: sensitive
  aws: AKIAZ3kq9P0xWm7Lr2Tb
---
apiVersion: v1
kind: Secret
metadata:
  name: test-secret
  namespace: default
type: Opaque
stringData:
  password: hunter2
---
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: test-role
  namespace: default
rules:
  - apiGroups: [""]
    resources: ["pods"]
    verbs: ["get", "watch", "list", "delete"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: test-rolebinding
  namespace: default
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: Role
  name: test-role
subjects:
  - kind: User
    name: test-user
    apiGroup: rbac.authorization.k8s.io
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: cluster-admin-ish
rules:
  - apiGroups: ["*"]
    resources: ["*"]
    verbs: ["*"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: everyone
  namespace: default
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: cluster-admin-ish
subjects:
  - kind: Group
    name: system:authenticated
    apiGroup: rbac.authorization.k8s.io
"#;

#[test]
fn bundle_parses_every_document() {
    let m = manifest::parse(BUNDLE).expect("parse bundle");
    let kinds: Vec<_> = m.objects.iter().map(|(k, _)| k.kind).collect();
    assert_eq!(
        kinds,
        vec![ResourceKind::ConfigMap, ResourceKind::Secret, ResourceKind::Role, ResourceKind::RoleBinding, ResourceKind::RoleBinding]
    );
    assert_eq!(m.cluster_roles.len(), 1);
    assert_eq!(m.objects[0].1.resource_version.as_str(), "7");
}

#[test]
fn json_list_is_flattened() {
    let json = r#"{"apiVersion":"v1","kind":"List","items":[
        {"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"a","namespace":"x"},"data":{"k":"v"}},
        {"apiVersion":"v1","kind":"Service","metadata":{"name":"svc"}}
    ]}"#;
    let m = manifest::parse(json).expect("parse list");
    assert_eq!(m.objects.len(), 1);
    assert_eq!(m.objects[0].0.namespace, "x");
    assert_eq!(m.skipped, vec!["v1/Service".to_string()]);
}

#[test]
fn broken_object_names_the_document() {
    let err = manifest::parse("apiVersion: v1\nkind: ConfigMap\nmetadata: {name: bad}\ndata: [1, 2]\n").unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("document 0"), "{msg}");
    assert!(msg.contains("bad"), "{msg}");
}

#[tokio::test]
async fn bundle_findings_match_expectations() {
    let m = manifest::parse(BUNDLE).expect("parse bundle");
    let store = Arc::new(MemoryStore::new());
    for (name, rules) in m.cluster_roles {
        store.put_cluster_role(name, rules);
    }
    for (key, snap) in m.objects {
        store.put(key, snap);
    }
    let sink = Arc::new(MemorySink::new());
    let reconciler =
        Reconciler::new(store.clone(), Arc::new(PolicyEngine::with_default_rules()), sink.clone(), &ControllerConfig::default());
    for key in store.keys() {
        reconciler.reconcile(&QueueEntry { key, reason: EnqueueReason::Event(EventType::Added) }).await;
    }

    let mut got: Vec<(String, String)> =
        sink.findings().into_iter().map(|f| (f.key.name.clone(), f.rule_id.clone())).collect();
    got.sort();
    assert_eq!(
        got,
        vec![
            ("app-config".to_string(), "configmap.sensitive-pattern".to_string()),
            ("everyone".to_string(), "rolebinding.broad-subject-excessive".to_string()),
            ("test-role".to_string(), "role.destructive-verbs".to_string()),
        ]
    );
}
