//! Sensitivity heuristics for free-form configuration values.
//!
//! Two signals: a curated set of credential-shaped patterns, and Shannon
//! entropy over token-like substrings. Key names only ever raise severity.

#![forbid(unsafe_code)]

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum token length considered by the entropy check.
pub const ENTROPY_MIN_LEN: usize = 24;
/// Bits per character at or above which a token is considered random-looking.
pub const ENTROPY_THRESHOLD: f64 = 4.0;

static PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let raw: [(&'static str, &'static str); 10] = [
        ("aws-access-key-id", r"\b(?:AKIA|ASIA)[0-9A-Za-z]{16}\b"),
        ("pem-private-key", r"-----BEGIN (?:[A-Z0-9]+ )*PRIVATE KEY(?: BLOCK)?-----"),
        ("connection-string-credentials", r"(?i)\b[a-z][a-z0-9+.\-]*://[^\s:/@]+:[^\s@/]+@"),
        ("credential-assignment", r#"(?i)\b(?:password|passwd|pwd|secret|token|api[_\-]?key|access[_\-]?key|client[_\-]?secret)\s*[=:]\s*['"]?[^\s'"$<{][^\s'"]{3,}"#),
        ("github-token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
        ("gitlab-token", r"\bglpat-[A-Za-z0-9_\-]{20,}"),
        ("slack-token", r"\bxox[abprs]-[A-Za-z0-9\-]{10,}"),
        ("sk-api-key", r"\bsk-[A-Za-z0-9_\-]{20,}"),
        ("google-api-key", r"\bAIza[0-9A-Za-z_\-]{35}"),
        ("jwt", r"\beyJ[A-Za-z0-9_\-]{8,}\.eyJ[A-Za-z0-9_\-]{8,}\.[A-Za-z0-9_\-]{8,}"),
    ];
    raw.iter()
        .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
        .collect()
});

static SENSITIVE_KEY: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(?:pass(?:word|wd)?|secret|token|api[_\-.]?key|credential|private[_\-.]?key|auth)").ok()
});

static UUID_LIKE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").ok()
});

/// Certificates and public keys: long base64 lines, but public by definition.
static PUBLIC_PEM: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?s)-----BEGIN (?:(?:TRUSTED )?CERTIFICATE|PUBLIC KEY|RSA PUBLIC KEY|X509 CRL|CERTIFICATE REQUEST)-----.*?-----END (?:(?:TRUSTED )?CERTIFICATE|PUBLIC KEY|RSA PUBLIC KEY|X509 CRL|CERTIFICATE REQUEST)-----",
    )
    .ok()
});

/// `value` with every public PEM block removed.
pub fn strip_public_pem(value: &str) -> Cow<'_, str> {
    match PUBLIC_PEM.as_ref() {
        Some(re) => re.replace_all(value, " "),
        None => Cow::Borrowed(value),
    }
}

/// Name of the first curated pattern the value matches.
pub fn match_pattern(value: &str) -> Option<&'static str> {
    PATTERNS.iter().find(|(_, re)| re.is_match(value)).map(|(name, _)| *name)
}

/// Whether a key name hints at credential content.
pub fn sensitive_key_name(key: &str) -> bool {
    SENSITIVE_KEY.as_ref().map(|re| re.is_match(key)).unwrap_or(false)
}

/// Shannon entropy in bits per character.
pub fn shannon_entropy(s: &str) -> f64 {
    let mut counts = [0u32; 256];
    let mut len = 0u32;
    for b in s.bytes() {
        counts[b as usize] += 1;
        len += 1;
    }
    if len == 0 { return 0.0; }
    let len = len as f64;
    counts
        .iter()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn token_charset(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '_' | '-')
}

fn is_candidate(token: &str) -> bool {
    if token.len() < ENTROPY_MIN_LEN || !token.chars().all(token_charset) { return false; }
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
    if !(has_digit && has_alpha) { return false; }
    // Hex digests and UUIDs are common in benign config.
    if token.chars().all(|c| c.is_ascii_hexdigit()) { return false; }
    !UUID_LIKE.as_ref().map(|re| re.is_match(token)).unwrap_or(false)
}

/// Highest-entropy token in `value` at or above the threshold, if any.
pub fn high_entropy_token(value: &str) -> Option<f64> {
    let value = strip_public_pem(value);
    value
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '"' | '\'' | '=' | ':' | '&' | '?'))
        .filter(|t| is_candidate(t))
        .map(shannon_entropy)
        .filter(|e| *e >= ENTROPY_THRESHOLD)
        .fold(None, |acc: Option<f64>, e| Some(acc.map_or(e, |a| a.max(e))))
}
