//! ConfigMap sensitive-data rule.

use kaudit_core::{ObjectState, ResourceKind, Severity};

use crate::sensitive::{high_entropy_token, match_pattern, sensitive_key_name};
use crate::{EvalContext, Hit, Rule, RuleInfo};

pub const SENSITIVE_PATTERN: &str = "configmap.sensitive-pattern";
pub const HIGH_ENTROPY: &str = "configmap.high-entropy";

const CATALOG: &[RuleInfo] = &[
    RuleInfo {
        id: SENSITIVE_PATTERN,
        kind: ResourceKind::ConfigMap,
        severity: Severity::High,
        summary: "value matches a credential pattern (cloud keys, private keys, tokens, connection strings)",
    },
    RuleInfo {
        id: HIGH_ENTROPY,
        kind: ResourceKind::ConfigMap,
        severity: Severity::Medium,
        summary: "value contains a long random-looking token",
    },
];

/// Flags ConfigMap values that look like credentials. Values are never echoed in details.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigMapSensitiveData;

impl Rule for ConfigMapSensitiveData {
    fn kind(&self) -> ResourceKind { ResourceKind::ConfigMap }

    fn catalog(&self) -> &'static [RuleInfo] { CATALOG }

    fn evaluate(&self, state: &ObjectState, _ctx: &EvalContext) -> Vec<Hit> {
        let ObjectState::ConfigMap(cm) = state else { return Vec::new() };
        let mut hits = Vec::new();
        for (key, value) in &cm.data {
            let named = sensitive_key_name(key);
            if let Some(pattern) = match_pattern(value) {
                let severity = if named { Severity::High.raised() } else { Severity::High };
                hits.push(Hit::new(SENSITIVE_PATTERN, severity, format!("key {key:?} matches {pattern}")));
            } else if let Some(bits) = high_entropy_token(value) {
                let severity = if named { Severity::Medium.raised() } else { Severity::Medium };
                hits.push(Hit::new(HIGH_ENTROPY, severity, format!("key {key:?} holds a token with {bits:.2} bits/char")));
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaudit_core::ConfigMapData;

    fn cm(pairs: &[(&str, &str)]) -> ObjectState {
        ObjectState::ConfigMap(ConfigMapData {
            data: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            binary_keys: Vec::new(),
        })
    }

    fn eval(state: &ObjectState) -> Vec<Hit> {
        ConfigMapSensitiveData.evaluate(state, &EvalContext::default())
    }

    #[test]
    fn aws_key_under_any_key_is_flagged() {
        let hits = eval(&cm(&[("example", "AKIAZ3kq9P0xWm7Lr2Tb")]));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, SENSITIVE_PATTERN);
        assert_eq!(hits[0].severity, Severity::High);
        assert!(!hits[0].detail.contains("AKIA"), "value must not leak into detail");
    }

    #[test]
    fn hello_world_is_clean() {
        assert!(eval(&cm(&[("greeting", "hello world")])).is_empty());
    }

    #[test]
    fn literal_sensitive_keyword_alone_is_not_a_finding() {
        assert!(eval(&cm(&[("example", "sensitive")])).is_empty());
    }

    #[test]
    fn key_name_raises_but_never_fires_alone() {
        assert!(eval(&cm(&[("db_password", "changeme")])).is_empty());
        let hits = eval(&cm(&[("db_password", "postgres://app:hunter2@db/app")]));
        assert_eq!(hits[0].severity, Severity::Critical);
    }

    #[test]
    fn entropy_fires_when_no_pattern_matches() {
        let hits = eval(&cm(&[("blob", "q8Zr3LmX0vT7bN2kWp5yHc9JdF4gS6aE")]));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, HIGH_ENTROPY);
        assert_eq!(hits[0].severity, Severity::Medium);
    }

    #[test]
    fn cluster_ca_bundle_is_clean() {
        let ca = "-----BEGIN CERTIFICATE-----
MIIC/jCCAeagAwIBAgIBADANBgkqhkiG9w0BAQsFADAVMRMwEQYDVQQDEwprdWJl
cm5ldGVzMB4XDTI0MDExNTA5MTIzNFoXDTM0MDExMjA5MTIzNFowFTETMBEGA1UE
AxMKa3ViZXJuZXRlczCCASIwDQYJKoZIhvcNAQEBBQADggEPADCCAQoCggEBAL7x
-----END CERTIFICATE-----
";
        assert!(eval(&cm(&[("ca.crt", ca)])).is_empty());
    }

    #[test]
    fn other_kinds_are_ignored() {
        let state = ObjectState::Role(Default::default());
        assert!(eval(&state).is_empty());
    }
}
