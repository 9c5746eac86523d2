//! Role excessive-permission rule.
//!
//! Each RBAC rule is checked against a fixed set of criteria. A rule that
//! matches several criteria contributes to one hit per criterion; the engine
//! merges hits per criterion across all rules of the Role.

use kaudit_core::{ObjectState, PolicyRule, ResourceKind, RoleData, Severity};

use crate::{EvalContext, Hit, Rule, RuleInfo};

pub const WILDCARD_ALL: &str = "role.wildcard-all";
pub const WILDCARD_VERB: &str = "role.wildcard-verb";
pub const WILDCARD_RESOURCE: &str = "role.wildcard-resource";
pub const DESTRUCTIVE_VERBS: &str = "role.destructive-verbs";
pub const SENSITIVE_WRITE: &str = "role.sensitive-write";
pub const PRIVILEGE_ESCALATION: &str = "role.privilege-escalation";

const CORE_GROUP: &str = "";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

const WRITE_VERBS: &[&str] = &["create", "update", "patch", "delete", "deletecollection", "*"];
const DESTRUCTIVE: &[&str] = &["delete", "deletecollection"];
const ESCALATION_VERBS: &[&str] = &["escalate", "bind", "impersonate"];
const SENSITIVE_RESOURCES: &[(&str, &str)] = &[
    (CORE_GROUP, "secrets"),
    (RBAC_GROUP, "roles"),
    (RBAC_GROUP, "rolebindings"),
    (RBAC_GROUP, "clusterroles"),
    (RBAC_GROUP, "clusterrolebindings"),
];
const EXEC_SUBRESOURCES: &[&str] = &["pods/exec", "pods/attach"];

const CATALOG: &[RuleInfo] = &[
    RuleInfo { id: WILDCARD_ALL, kind: ResourceKind::Role, severity: Severity::Critical, summary: "rule grants every verb on every resource" },
    RuleInfo { id: WILDCARD_VERB, kind: ResourceKind::Role, severity: Severity::High, summary: "rule grants every verb on named resources" },
    RuleInfo { id: WILDCARD_RESOURCE, kind: ResourceKind::Role, severity: Severity::High, summary: "rule grants named verbs on every resource" },
    RuleInfo { id: DESTRUCTIVE_VERBS, kind: ResourceKind::Role, severity: Severity::Medium, summary: "delete/deletecollection on wildcard resources or the core API group" },
    RuleInfo { id: SENSITIVE_WRITE, kind: ResourceKind::Role, severity: Severity::High, summary: "write access to secrets or RBAC objects" },
    RuleInfo { id: PRIVILEGE_ESCALATION, kind: ResourceKind::Role, severity: Severity::High, summary: "escalate/bind/impersonate verbs or exec/attach into pods" },
];

fn has(list: &[String], needle: &str) -> bool {
    list.iter().any(|s| s == needle)
}

fn any_of(list: &[String], needles: &[&str]) -> Vec<String> {
    list.iter().filter(|s| needles.contains(&s.as_str())).cloned().collect()
}

/// Empty `apiGroups` is malformed and matches no group.
fn group_matches(rule: &PolicyRule, group: &str) -> bool {
    has(&rule.api_groups, "*") || has(&rule.api_groups, group)
}

fn describe(idx: usize, rule: &PolicyRule) -> String {
    format!("rules[{idx}] verbs=[{}] resources=[{}]", rule.verbs.join(","), rule.resources.join(","))
}

/// Criteria hits for a single RBAC rule.
fn assess_rule(idx: usize, rule: &PolicyRule) -> Vec<Hit> {
    let mut hits = Vec::new();
    let verb_wild = has(&rule.verbs, "*");
    let res_wild = has(&rule.resources, "*");
    let at = || describe(idx, rule);

    match (verb_wild, res_wild) {
        (true, true) => hits.push(Hit::new(WILDCARD_ALL, Severity::Critical, at())),
        (true, false) if !rule.resources.is_empty() => hits.push(Hit::new(WILDCARD_VERB, Severity::High, at())),
        (false, true) if !rule.verbs.is_empty() => hits.push(Hit::new(WILDCARD_RESOURCE, Severity::High, at())),
        _ => {}
    }

    let destructive = any_of(&rule.verbs, DESTRUCTIVE);
    if !destructive.is_empty() && (res_wild || group_matches(rule, CORE_GROUP)) {
        hits.push(Hit::new(DESTRUCTIVE_VERBS, Severity::Medium, format!("{} grants {}", at(), destructive.join(","))));
    }

    let writes = any_of(&rule.verbs, WRITE_VERBS);
    if !writes.is_empty() {
        let sensitive: Vec<&str> = SENSITIVE_RESOURCES
            .iter()
            .filter(|(group, res)| has(&rule.resources, res) && group_matches(rule, group))
            .map(|(_, res)| *res)
            .collect();
        if !sensitive.is_empty() {
            hits.push(Hit::new(SENSITIVE_WRITE, Severity::High, format!("{} writes {}", at(), sensitive.join(","))));
        }
    }

    let escalation = any_of(&rule.verbs, ESCALATION_VERBS);
    let exec = verb_wild || has(&rule.verbs, "create");
    let exec_targets = any_of(&rule.resources, EXEC_SUBRESOURCES);
    if !escalation.is_empty() {
        hits.push(Hit::new(PRIVILEGE_ESCALATION, Severity::High, format!("{} grants {}", at(), escalation.join(","))));
    } else if exec && !exec_targets.is_empty() && group_matches(rule, CORE_GROUP) {
        hits.push(Hit::new(PRIVILEGE_ESCALATION, Severity::High, format!("{} can open {}", at(), exec_targets.join(","))));
    }

    hits
}

/// All criteria hits for a Role, in rule order.
pub fn assess(role: &RoleData) -> Vec<Hit> {
    role.rules.iter().enumerate().flat_map(|(idx, rule)| assess_rule(idx, rule)).collect()
}

/// Whether a Role would be flagged by this rule family at all.
pub fn is_excessive(role: &RoleData) -> bool {
    role.rules.iter().enumerate().any(|(idx, rule)| !assess_rule(idx, rule).is_empty())
}

/// Flags Roles granting wildcard, destructive, sensitive or escalating access.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleExcessivePermission;

impl Rule for RoleExcessivePermission {
    fn kind(&self) -> ResourceKind { ResourceKind::Role }

    fn catalog(&self) -> &'static [RuleInfo] { CATALOG }

    fn evaluate(&self, state: &ObjectState, _ctx: &EvalContext) -> Vec<Hit> {
        match state {
            ObjectState::Role(role) => assess(role),
            _ => Vec::new(),
        }
    }
}
