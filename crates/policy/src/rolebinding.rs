//! RoleBinding misconfiguration rule.

use kaudit_core::{ObjectState, ResourceKind, RoleBindingData, Severity, Subject};

use crate::{role, BoundRole, EvalContext, Hit, Rule, RuleInfo};

pub const DANGLING_REF: &str = "rolebinding.dangling-ref";
pub const BROAD_SUBJECT_EXCESSIVE: &str = "rolebinding.broad-subject-excessive";
pub const ANONYMOUS_SUBJECT: &str = "rolebinding.anonymous-subject";

const CATALOG: &[RuleInfo] = &[
    RuleInfo { id: DANGLING_REF, kind: ResourceKind::RoleBinding, severity: Severity::Medium, summary: "roleRef does not resolve to an existing Role or ClusterRole" },
    RuleInfo { id: BROAD_SUBJECT_EXCESSIVE, kind: ResourceKind::RoleBinding, severity: Severity::Critical, summary: "broad identity bound to a role with excessive permissions" },
    RuleInfo { id: ANONYMOUS_SUBJECT, kind: ResourceKind::RoleBinding, severity: Severity::High, summary: "anonymous or unauthenticated identity bound to a role" },
];

/// Identities that cover most or all callers.
const BROAD: &[(&str, &str)] = &[
    ("Group", "system:authenticated"),
    ("Group", "system:unauthenticated"),
    ("Group", "system:serviceaccounts"),
    ("User", "system:anonymous"),
];

const ANONYMOUS: &[(&str, &str)] = &[
    ("Group", "system:unauthenticated"),
    ("User", "system:anonymous"),
];

fn subject_in(subject: &Subject, set: &[(&str, &str)]) -> bool {
    set.iter().any(|(kind, name)| subject.kind == *kind && subject.name == *name)
}

fn subject_label(subject: &Subject) -> String {
    format!("{}:{}", subject.kind, subject.name)
}

fn role_ref_label(binding: &RoleBindingData) -> String {
    format!("{}/{}", binding.role_ref.kind, binding.role_ref.name)
}

/// Flags dangling role references and broad or anonymous subjects.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleBindingMisconfiguration;

impl Rule for RoleBindingMisconfiguration {
    fn kind(&self) -> ResourceKind { ResourceKind::RoleBinding }

    fn catalog(&self) -> &'static [RuleInfo] { CATALOG }

    fn evaluate(&self, state: &ObjectState, ctx: &EvalContext) -> Vec<Hit> {
        let ObjectState::RoleBinding(binding) = state else { return Vec::new() };
        let mut hits = Vec::new();

        match &ctx.bound_role {
            Some(BoundRole::Missing) => {
                hits.push(Hit::new(DANGLING_REF, Severity::Medium, format!("roleRef {} not found", role_ref_label(binding))));
            }
            Some(BoundRole::Resolved(bound)) if role::is_excessive(bound) => {
                for subject in binding.subjects.iter().filter(|s| subject_in(s, BROAD)) {
                    hits.push(Hit::new(
                        BROAD_SUBJECT_EXCESSIVE,
                        Severity::Critical,
                        format!("{} bound to flagged {}", subject_label(subject), role_ref_label(binding)),
                    ));
                }
            }
            _ => {}
        }

        for subject in binding.subjects.iter().filter(|s| subject_in(s, ANONYMOUS)) {
            hits.push(Hit::new(ANONYMOUS_SUBJECT, Severity::High, format!("{} bound to {}", subject_label(subject), role_ref_label(binding))));
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaudit_core::{PolicyRule, RoleData, RoleRef};

    fn binding(role: &str, subjects: &[(&str, &str)]) -> ObjectState {
        ObjectState::RoleBinding(RoleBindingData {
            role_ref: RoleRef { api_group: "rbac.authorization.k8s.io".into(), kind: "Role".into(), name: role.into() },
            subjects: subjects
                .iter()
                .map(|(k, n)| Subject { kind: k.to_string(), name: n.to_string(), namespace: None })
                .collect(),
        })
    }

    fn admin_role() -> RoleData {
        RoleData {
            rules: vec![PolicyRule {
                api_groups: vec!["*".into()],
                resources: vec!["*".into()],
                verbs: vec!["*".into()],
                resource_names: Vec::new(),
            }],
        }
    }

    #[test]
    fn ghost_role_is_dangling() {
        let hits = RoleBindingMisconfiguration.evaluate(
            &binding("ghost-role", &[("User", "alice")]),
            &EvalContext::with_bound_role(BoundRole::Missing),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, DANGLING_REF);
        assert!(hits[0].detail.contains("ghost-role"));
    }

    #[test]
    fn authenticated_group_on_admin_role() {
        let hits = RoleBindingMisconfiguration.evaluate(
            &binding("admin", &[("Group", "system:authenticated"), ("User", "bob")]),
            &EvalContext::with_bound_role(BoundRole::Resolved(admin_role())),
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, BROAD_SUBJECT_EXCESSIVE);
    }

    #[test]
    fn broad_subject_on_harmless_role_is_fine() {
        let hits = RoleBindingMisconfiguration.evaluate(
            &binding("viewer", &[("Group", "system:authenticated")]),
            &EvalContext::with_bound_role(BoundRole::Resolved(RoleData::default())),
        );
        assert!(hits.is_empty());
    }

    #[test]
    fn anonymous_fires_without_lookup() {
        let hits = RoleBindingMisconfiguration.evaluate(&binding("viewer", &[("User", "system:anonymous")]), &EvalContext::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, ANONYMOUS_SUBJECT);
    }
}
