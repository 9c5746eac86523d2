//! kaudit policy engine: a registry of pure rule evaluators keyed by resource kind.
//!
//! Rules return [`Hit`]s; the engine stamps them with the object's key and
//! resource version and merges hits sharing a rule id, so one evaluation pass
//! yields at most one [`Finding`] per `(key, version, rule_id)`.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kaudit_core::{Finding, ObjectSnapshot, ObjectState, ResourceKey, ResourceKind, RoleData, Severity};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, warn};

pub mod configmap;
pub mod role;
pub mod rolebinding;
pub mod secret;
pub mod sensitive;

pub use configmap::ConfigMapSensitiveData;
pub use role::RoleExcessivePermission;
pub use rolebinding::RoleBindingMisconfiguration;
pub use secret::SecretShape;

/// One raw rule match before it is tied to an object generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub detail: String,
}

impl Hit {
    pub fn new(rule_id: &'static str, severity: Severity, detail: impl Into<String>) -> Self {
        Self { rule_id, severity, detail: detail.into() }
    }
}

/// Catalogue entry describing a rule id a family can emit.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RuleInfo {
    pub id: &'static str,
    pub kind: ResourceKind,
    pub severity: Severity,
    pub summary: &'static str,
}

/// Outcome of resolving a binding's role reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundRole {
    Resolved(RoleData),
    Missing,
}

/// Read-only facts gathered before evaluation (secondary lookups).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalContext {
    /// Only populated for RoleBindings; `None` means the lookup was not performed.
    pub bound_role: Option<BoundRole>,
}

impl EvalContext {
    pub fn with_bound_role(bound_role: BoundRole) -> Self {
        Self { bound_role: Some(bound_role) }
    }
}

/// A stateless evaluator for one resource kind. Must be safe to call concurrently.
pub trait Rule: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn catalog(&self) -> &'static [RuleInfo];

    /// Evaluate one object. States of another kind yield no hits.
    fn evaluate(&self, state: &ObjectState, ctx: &EvalContext) -> Vec<Hit>;
}

/// Registry of rules, evaluated in registration order per kind.
#[derive(Clone, Default)]
pub struct PolicyEngine {
    rules: FxHashMap<ResourceKind, Vec<Arc<dyn Rule>>>,
}

impl PolicyEngine {
    pub fn new() -> Self { Self::default() }

    /// Engine with the four built-in rule families registered.
    pub fn with_default_rules() -> Self {
        let mut engine = Self::new();
        engine.register(Arc::new(ConfigMapSensitiveData));
        engine.register(Arc::new(SecretShape));
        engine.register(Arc::new(RoleExcessivePermission));
        engine.register(Arc::new(RoleBindingMisconfiguration));
        engine
    }

    pub fn register(&mut self, rule: Arc<dyn Rule>) {
        self.rules.entry(rule.kind()).or_default().push(rule);
    }

    pub fn rule_count(&self, kind: ResourceKind) -> usize {
        self.rules.get(&kind).map(|v| v.len()).unwrap_or(0)
    }

    /// All rule ids known to the engine, ordered by kind then id.
    pub fn catalog(&self) -> Vec<RuleInfo> {
        let mut out: Vec<RuleInfo> = self.rules.values().flatten().flat_map(|r| r.catalog().iter().copied()).collect();
        out.sort_by(|a, b| a.kind.cmp(&b.kind).then(a.id.cmp(b.id)));
        out.dedup_by(|a, b| a.id == b.id);
        out
    }

    /// Run every rule registered for the snapshot's kind and return merged findings.
    pub fn evaluate(&self, key: &ResourceKey, snapshot: &ObjectSnapshot, ctx: &EvalContext) -> Vec<Finding> {
        if snapshot.kind() != key.kind {
            warn!(key = %key, snapshot_kind = %snapshot.kind(), "snapshot kind does not match key; skipping evaluation");
            return Vec::new();
        }
        let Some(rules) = self.rules.get(&key.kind) else {
            debug!(kind = %key.kind, "no rules registered");
            return Vec::new();
        };
        let mut hits = Vec::new();
        for rule in rules {
            hits.extend(rule.evaluate(&snapshot.state, ctx));
        }
        merge_hits(key, snapshot, hits)
    }
}

/// Collapse hits with the same rule id: maximum severity, details joined in order.
fn merge_hits(key: &ResourceKey, snapshot: &ObjectSnapshot, hits: Vec<Hit>) -> Vec<Finding> {
    let mut order: Vec<&'static str> = Vec::new();
    let mut merged: FxHashMap<&'static str, (Severity, Vec<String>)> = FxHashMap::default();
    for hit in hits {
        match merged.get_mut(hit.rule_id) {
            Some((sev, details)) => {
                *sev = (*sev).max(hit.severity);
                if !details.contains(&hit.detail) { details.push(hit.detail); }
            }
            None => {
                order.push(hit.rule_id);
                merged.insert(hit.rule_id, (hit.severity, vec![hit.detail]));
            }
        }
    }
    order
        .into_iter()
        .filter_map(|id| merged.remove(id).map(|(severity, details)| Finding {
            key: key.clone(),
            resource_version: snapshot.resource_version.clone(),
            rule_id: id.to_string(),
            severity,
            detail: details.join("; "),
        }))
        .collect()
}
