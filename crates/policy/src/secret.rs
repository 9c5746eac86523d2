//! Secret type/shape rule: the declared `type` implies required keys and payload formats.

use kaudit_core::{ObjectState, ResourceKind, SecretData, Severity};

use crate::{EvalContext, Hit, Rule, RuleInfo};

pub const TYPE_SHAPE: &str = "secret.type-shape";
pub const MALFORMED_PAYLOAD: &str = "secret.malformed-payload";

const SA_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

const CATALOG: &[RuleInfo] = &[
    RuleInfo {
        id: TYPE_SHAPE,
        kind: ResourceKind::Secret,
        severity: Severity::Medium,
        summary: "secret is missing the keys its declared type requires",
    },
    RuleInfo {
        id: MALFORMED_PAYLOAD,
        kind: ResourceKind::Secret,
        severity: Severity::Low,
        summary: "typed payload is not in the expected format (PEM, docker config JSON)",
    },
];

enum Required {
    AllOf(&'static [&'static str]),
    AnyOf(&'static [&'static str]),
    Annotation(&'static str),
}

fn contract(secret_type: &str) -> Option<Required> {
    match secret_type {
        "kubernetes.io/tls" => Some(Required::AllOf(&["tls.crt", "tls.key"])),
        "kubernetes.io/dockerconfigjson" => Some(Required::AllOf(&[".dockerconfigjson"])),
        "kubernetes.io/dockercfg" => Some(Required::AllOf(&[".dockercfg"])),
        "kubernetes.io/ssh-auth" => Some(Required::AllOf(&["ssh-privatekey"])),
        "kubernetes.io/basic-auth" => Some(Required::AnyOf(&["username", "password"])),
        "bootstrap.kubernetes.io/token" => Some(Required::AllOf(&["token-id", "token-secret"])),
        "kubernetes.io/service-account-token" => Some(Required::Annotation(SA_NAME_ANNOTATION)),
        _ => None,
    }
}

fn present<'a>(secret: &'a SecretData, key: &str) -> Option<&'a [u8]> {
    secret.data.get(key).map(|v| v.as_slice()).filter(|v| !v.is_empty())
}

fn shape_violation(secret: &SecretData, ty: &str) -> Option<String> {
    match contract(ty)? {
        Required::AllOf(keys) => {
            let missing: Vec<&str> = keys.iter().copied().filter(|k| present(secret, k).is_none()).collect();
            (!missing.is_empty()).then(|| format!("type {ty} requires {}", missing.join(", ")))
        }
        Required::AnyOf(keys) => {
            (!keys.iter().any(|k| present(secret, k).is_some())).then(|| format!("type {ty} requires one of {}", keys.join(", ")))
        }
        Required::Annotation(name) => {
            (!secret.annotations.contains_key(name)).then(|| format!("type {ty} requires annotation {name}"))
        }
    }
}

fn pem_block(bytes: &[u8], label_suffix: &str) -> bool {
    let text = String::from_utf8_lossy(bytes);
    text.lines().any(|l| {
        let l = l.trim();
        l.starts_with("-----BEGIN ") && l.ends_with(&format!("{label_suffix}-----"))
    })
}

fn json_object(bytes: &[u8]) -> bool {
    matches!(serde_json::from_slice::<serde_json::Value>(bytes), Ok(serde_json::Value::Object(_)))
}

fn payload_violations(secret: &SecretData, ty: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut check = |key: &str, ok: fn(&[u8]) -> bool, expected: &str| {
        if let Some(v) = present(secret, key) {
            if !ok(v) { out.push(format!("{key} is not {expected}")); }
        }
    };
    match ty {
        "kubernetes.io/tls" => {
            check("tls.crt", |b| pem_block(b, "CERTIFICATE"), "a PEM certificate");
            check("tls.key", |b| pem_block(b, "PRIVATE KEY"), "a PEM private key");
        }
        "kubernetes.io/dockerconfigjson" => check(".dockerconfigjson", json_object, "a JSON object"),
        "kubernetes.io/dockercfg" => check(".dockercfg", json_object, "a JSON object"),
        "kubernetes.io/ssh-auth" => check("ssh-privatekey", |b| pem_block(b, "PRIVATE KEY"), "a PEM private key"),
        _ => {}
    }
    out
}

/// Validates a Secret's internal shape against its declared type.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecretShape;

impl Rule for SecretShape {
    fn kind(&self) -> ResourceKind { ResourceKind::Secret }

    fn catalog(&self) -> &'static [RuleInfo] { CATALOG }

    fn evaluate(&self, state: &ObjectState, _ctx: &EvalContext) -> Vec<Hit> {
        let ObjectState::Secret(secret) = state else { return Vec::new() };
        let Some(ty) = secret.secret_type.as_deref() else { return Vec::new() };
        let mut hits = Vec::new();
        if let Some(detail) = shape_violation(secret, ty) {
            hits.push(Hit::new(TYPE_SHAPE, Severity::Medium, detail));
        }
        for detail in payload_violations(secret, ty) {
            hits.push(Hit::new(MALFORMED_PAYLOAD, Severity::Low, detail));
        }
        hits
    }
}
