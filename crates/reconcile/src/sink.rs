//! Built-in finding sinks: structured log, JSON lines, and an in-memory collector.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use kaudit_core::{Finding, FindingSink, ResourceKey, Severity, SinkError};
use serde::Serialize;
use tracing::{info, warn};

/// Emits each finding as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait::async_trait]
impl FindingSink for LogSink {
    async fn report(&self, f: &Finding) -> Result<(), SinkError> {
        match f.severity {
            Severity::High | Severity::Critical => warn!(
                kind = %f.key.kind, ns = %f.key.namespace, name = %f.key.name, rv = %f.resource_version,
                rule = %f.rule_id, severity = %f.severity, detail = %f.detail, "finding"
            ),
            Severity::Low | Severity::Medium => info!(
                kind = %f.key.kind, ns = %f.key.namespace, name = %f.key.name, rv = %f.resource_version,
                rule = %f.rule_id, severity = %f.severity, detail = %f.detail, "finding"
            ),
        }
        Ok(())
    }

    async fn object_gone(&self, key: &ResourceKey) -> Result<(), SinkError> {
        info!(kind = %key.kind, ns = %key.namespace, name = %key.name, "object gone; prior findings retracted");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Line<'a> {
    Finding { ts: String, #[serde(flatten)] finding: &'a Finding },
    ObjectGone { ts: String, key: &'a ResourceKey },
}

/// Writes one JSON document per line to any writer (stdout by default).
pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self { Self { out: Mutex::new(out) } }

    pub fn stdout() -> Self { Self::new(Box::new(std::io::stdout())) }

    fn write(&self, line: &Line<'_>) -> Result<(), SinkError> {
        let mut buf = serde_json::to_vec(line).map_err(|e| SinkError(e.to_string()))?;
        buf.push(b'\n');
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        out.write_all(&buf).and_then(|_| out.flush()).map_err(|e| SinkError(e.to_string()))
    }
}

fn now() -> String { chrono::Utc::now().to_rfc3339() }

#[async_trait::async_trait]
impl FindingSink for JsonLinesSink {
    async fn report(&self, finding: &Finding) -> Result<(), SinkError> {
        self.write(&Line::Finding { ts: now(), finding })
    }

    async fn object_gone(&self, key: &ResourceKey) -> Result<(), SinkError> {
        self.write(&Line::ObjectGone { ts: now(), key })
    }
}

/// Collects findings in memory. Can be switched to fail every call.
#[derive(Default)]
pub struct MemorySink {
    findings: Mutex<Vec<Finding>>,
    gone: Mutex<Vec<ResourceKey>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self { Self::default() }

    pub fn set_failing(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }

    /// Every `report` call, including failed ones.
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    pub fn findings(&self) -> Vec<Finding> {
        self.findings.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn gone(&self) -> Vec<ResourceKey> {
        self.gone.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn take(&self) -> Vec<Finding> {
        std::mem::take(&mut *self.findings.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait::async_trait]
impl FindingSink for MemorySink {
    async fn report(&self, finding: &Finding) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError("memory sink set to fail".into()));
        }
        self.findings.lock().unwrap_or_else(|e| e.into_inner()).push(finding.clone());
        Ok(())
    }

    async fn object_gone(&self, key: &ResourceKey) -> Result<(), SinkError> {
        self.gone.lock().unwrap_or_else(|e| e.into_inner()).push(key.clone());
        Ok(())
    }
}
