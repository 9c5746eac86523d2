//! `kauditctl check`: audit manifests offline through the same reconcile path.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use kaudit_core::{EnqueueReason, EventType, Finding, QueueEntry, Severity};
use kaudit_kubehub::manifest::{self, Manifest};
use kaudit_policy::PolicyEngine;
use kaudit_reconcile::{ControllerConfig, MemorySink, MemoryStore, Outcome, Reconciler};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
pub struct Report {
    pub objects: usize,
    pub skipped: Vec<String>,
    pub findings: Vec<Finding>,
}

impl Report {
    /// True when any finding is at or above `threshold`.
    pub fn fails(&self, threshold: Option<Severity>) -> bool {
        threshold.is_some_and(|t| self.findings.iter().any(|f| f.severity >= t))
    }
}

fn read_input(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("reading manifests from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

pub fn load(paths: &[PathBuf]) -> Result<Manifest> {
    let mut all = Manifest::default();
    for path in paths {
        let text = read_input(path)?;
        let parsed = manifest::parse(&text).with_context(|| format!("parsing {}", path.display()))?;
        debug!(path = %path.display(), objects = parsed.objects.len(), "loaded manifest");
        all.extend(parsed);
    }
    Ok(all)
}

/// Evaluate every object in `m`; role refs resolve against the same manifests.
pub async fn audit(m: Manifest, engine: Arc<PolicyEngine>) -> Report {
    let store = Arc::new(MemoryStore::new());
    for (name, rules) in m.cluster_roles {
        store.put_cluster_role(name, rules);
    }
    for (key, snapshot) in m.objects {
        store.put(key, snapshot);
    }
    let keys = store.keys();
    let objects = keys.len();
    let sink = Arc::new(MemorySink::new());
    let reconciler = Reconciler::new(store.clone(), engine, sink.clone(), &ControllerConfig::default());
    for key in keys {
        let entry = QueueEntry { key, reason: EnqueueReason::Event(EventType::Added) };
        if let Outcome::Fatal(e) = reconciler.reconcile(&entry).await {
            warn!(key = %entry.key, error = %e, "could not evaluate object");
        }
    }
    let mut findings = sink.take();
    findings.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.key.cmp(&b.key)).then_with(|| a.rule_id.cmp(&b.rule_id)));
    Report { objects, skipped: m.skipped, findings }
}

pub fn print_human(report: &Report) {
    for f in &report.findings {
        println!("{:<8} {:<34} {:<40} {}", f.severity.as_str().to_uppercase(), f.rule_id, f.key.to_string(), f.detail);
    }
    println!(
        "{} object(s) audited, {} finding(s){}",
        report.objects,
        report.findings.len(),
        if report.skipped.is_empty() { String::new() } else { format!(", {} document(s) skipped", report.skipped.len()) }
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAKY: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata: {name: leaky}\ndata: {key: AKIAZ3kq9P0xWm7Lr2Tb}\n";

    #[tokio::test]
    async fn audit_reports_and_threshold_applies() {
        let m = manifest::parse(LEAKY).expect("parse");
        let report = audit(m, Arc::new(PolicyEngine::with_default_rules())).await;
        assert_eq!(report.objects, 1);
        assert_eq!(report.findings.len(), 1);
        assert!(report.fails(Some(Severity::High)));
        assert!(!report.fails(Some(Severity::Critical)));
        assert!(!report.fails(None));
    }

    #[tokio::test]
    async fn clean_manifest_has_no_findings() {
        let m = manifest::parse("apiVersion: v1\nkind: ConfigMap\nmetadata: {name: ok}\ndata: {greeting: hello world}\n")
            .expect("parse");
        let report = audit(m, Arc::new(PolicyEngine::with_default_rules())).await;
        assert!(report.findings.is_empty());
        assert!(!report.fails(Some(Severity::Low)));
    }

    #[tokio::test]
    async fn object_repeated_across_files_counts_once() {
        let mut m = manifest::parse(LEAKY).expect("parse");
        m.extend(manifest::parse(LEAKY).expect("parse"));
        let report = audit(m, Arc::new(PolicyEngine::with_default_rules())).await;
        assert_eq!(report.objects, 1);
        assert_eq!(report.findings.len(), 1);
    }
}
