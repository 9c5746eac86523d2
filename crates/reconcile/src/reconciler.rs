//! Fetch → compare version → evaluate → report, for one key at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kaudit_core::{
    EnqueueReason, EventType, FetchError, Finding, FindingSink, ObjectSnapshot, ObjectState, QueueEntry, ResourceKey,
    ResourceVersion, SnapshotStore,
};
use kaudit_policy::{BoundRole, EvalContext, PolicyEngine};
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::cache::VersionCache;
use crate::config::ControllerConfig;

/// Result of one reconcile invocation.
#[derive(Debug)]
pub enum Outcome {
    Success,
    RequeueAfter(Duration),
    Fatal(FetchError),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::RequeueAfter(_) => "requeue",
            Outcome::Fatal(_) => "fatal",
        }
    }
}

enum Step {
    Gone,
    Unchanged(ResourceVersion),
    Evaluated(ResourceVersion, Vec<Finding>),
}

pub struct Reconciler {
    store: Arc<dyn SnapshotStore>,
    engine: Arc<PolicyEngine>,
    sink: Arc<dyn FindingSink>,
    cache: VersionCache,
    backoff: Backoff,
    timeout: Duration,
    degraded_after: u32,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        engine: Arc<PolicyEngine>,
        sink: Arc<dyn FindingSink>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            sink,
            cache: VersionCache::new(config.cache_shards),
            backoff: Backoff::new(config.backoff_base, config.backoff_cap),
            timeout: config.reconcile_timeout,
            degraded_after: config.degraded_after,
        }
    }

    pub fn cache(&self) -> &VersionCache { &self.cache }

    pub fn backoff(&self) -> &Backoff { &self.backoff }

    pub async fn reconcile(&self, entry: &QueueEntry) -> Outcome {
        let t0 = Instant::now();
        let key = &entry.key;
        let outcome = if entry.reason == EnqueueReason::Event(EventType::Deleted) {
            debug!(key = %key, "deleted event; clearing without fetch");
            self.retract(key).await;
            Outcome::Success
        } else {
            self.run(key).await
        };
        histogram!("reconcile_ms", t0.elapsed().as_secs_f64() * 1000.0);
        counter!("reconcile_total", 1, "outcome" => outcome.label());
        outcome
    }

    async fn run(&self, key: &ResourceKey) -> Outcome {
        let step = match tokio::time::timeout(self.timeout, self.evaluate(key)).await {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };
        match step {
            Ok(Step::Gone) => {
                self.backoff.reset(key);
                self.retract(key).await;
                Outcome::Success
            }
            Ok(Step::Unchanged(rv)) => {
                self.backoff.reset(key);
                debug!(key = %key, rv = %rv, "version unchanged; skipping evaluation");
                counter!("reconcile_skipped_total", 1);
                Outcome::Success
            }
            Ok(Step::Evaluated(rv, findings)) => {
                self.backoff.reset(key);
                self.cache.record(key, rv.clone());
                debug!(key = %key, rv = %rv, findings = findings.len(), "evaluated");
                self.deliver(&findings).await;
                Outcome::Success
            }
            Err(e) if e.is_transient() => self.transient(key, e),
            Err(e) => {
                self.backoff.reset(key);
                error!(key = %key, error = %e, "reconcile failed permanently");
                Outcome::Fatal(e)
            }
        }
    }

    fn transient(&self, key: &ResourceKey, e: FetchError) -> Outcome {
        counter!("fetch_transient_total", 1);
        let (delay, failures) = self.backoff.next(key);
        if failures > self.degraded_after {
            warn!(key = %key, error = %e, failures, retry_ms = %delay.as_millis(), "degraded: transient failures past ceiling");
        } else {
            warn!(key = %key, error = %e, failures, retry_ms = %delay.as_millis(), "transient failure; requeueing");
        }
        Outcome::RequeueAfter(delay)
    }

    async fn evaluate(&self, key: &ResourceKey) -> Result<Step, FetchError> {
        let Some(snapshot) = self.store.get(key).await? else { return Ok(Step::Gone) };
        if self.cache.is_current(key, &snapshot.resource_version) {
            return Ok(Step::Unchanged(snapshot.resource_version));
        }
        let ctx = self.gather_context(key, &snapshot).await?;
        let findings = self.engine.evaluate(key, &snapshot, &ctx);
        Ok(Step::Evaluated(snapshot.resource_version, findings))
    }

    /// Secondary read-only lookups the rules need (a binding's role reference).
    pub async fn gather_context(&self, key: &ResourceKey, snapshot: &ObjectSnapshot) -> Result<EvalContext, FetchError> {
        let ObjectState::RoleBinding(binding) = &snapshot.state else { return Ok(EvalContext::default()) };
        let bound = match binding.role_ref.kind.as_str() {
            "Role" | "ClusterRole" => self.store.resolve_role_ref(&key.namespace, &binding.role_ref).await?,
            other => {
                debug!(key = %key, kind = %other, "unsupported roleRef kind");
                None
            }
        };
        Ok(EvalContext::with_bound_role(bound.map_or(BoundRole::Missing, BoundRole::Resolved)))
    }

    async fn retract(&self, key: &ResourceKey) {
        let prior = self.cache.forget(key);
        self.backoff.reset(key);
        debug!(key = %key, prior = ?prior, "object gone");
        if let Err(e) = self.sink.object_gone(key).await {
            counter!("sink_errors_total", 1);
            warn!(key = %key, error = %e, "sink rejected object-gone signal");
        }
    }

    /// Best effort: sink failures are logged and counted, never retried here.
    async fn deliver(&self, findings: &[Finding]) {
        for f in findings {
            counter!("findings_total", 1, "rule" => f.rule_id.clone());
            if let Err(e) = self.sink.report(f).await {
                counter!("sink_errors_total", 1);
                warn!(key = %f.key, rule = %f.rule_id, error = %e, "sink delivery failed");
            }
        }
        if !findings.is_empty() {
            info!(count = findings.len(), "findings reported");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::sink::MemorySink;
    use kaudit_core::{ConfigMapData, ResourceKind};

    fn cm(rv: &str, value: &str) -> ObjectSnapshot {
        ObjectSnapshot::new(
            ResourceVersion::new(rv),
            ObjectState::ConfigMap(ConfigMapData {
                data: [("example".to_string(), value.to_string())].into_iter().collect(),
                binary_keys: Vec::new(),
            }),
        )
    }

    fn entry(key: &ResourceKey, ev: EventType) -> QueueEntry {
        QueueEntry { key: key.clone(), reason: EnqueueReason::Event(ev) }
    }

    fn setup(config: ControllerConfig) -> (Arc<MemoryStore>, Arc<MemorySink>, Reconciler) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(MemorySink::new());
        let r = Reconciler::new(store.clone(), Arc::new(PolicyEngine::with_default_rules()), sink.clone(), &config);
        (store, sink, r)
    }

    #[tokio::test]
    async fn unchanged_version_skips_sink() {
        let (store, sink, r) = setup(ControllerConfig::default());
        let key = ResourceKey::new(ResourceKind::ConfigMap, "ns", "cm");
        store.put(key.clone(), cm("1", "AKIAZ3kq9P0xWm7Lr2Tb"));
        assert!(matches!(r.reconcile(&entry(&key, EventType::Added)).await, Outcome::Success));
        assert_eq!(sink.calls(), 1);
        assert!(matches!(r.reconcile(&entry(&key, EventType::Modified)).await, Outcome::Success));
        assert_eq!(sink.calls(), 1);
    }

    #[tokio::test]
    async fn not_found_clears_cache_and_signals_gone() {
        let (store, sink, r) = setup(ControllerConfig::default());
        let key = ResourceKey::new(ResourceKind::ConfigMap, "ns", "cm");
        store.put(key.clone(), cm("1", "AKIAZ3kq9P0xWm7Lr2Tb"));
        r.reconcile(&entry(&key, EventType::Added)).await;
        assert!(r.cache().get(&key).is_some());
        store.remove(&key);
        let calls = sink.calls();
        assert!(matches!(r.reconcile(&entry(&key, EventType::Modified)).await, Outcome::Success));
        assert!(r.cache().get(&key).is_none());
        assert_eq!(sink.calls(), calls);
        assert_eq!(sink.gone(), vec![key]);
    }

    #[tokio::test]
    async fn deleted_event_short_circuits_fetch() {
        let (store, _sink, r) = setup(ControllerConfig::default());
        let key = ResourceKey::new(ResourceKind::Secret, "ns", "s");
        r.cache().record(&key, ResourceVersion::new("3"));
        r.reconcile(&entry(&key, EventType::Deleted)).await;
        assert_eq!(store.fetch_count(&key), 0);
        assert!(r.cache().get(&key).is_none());
    }

    #[tokio::test]
    async fn transient_error_requeues_with_capped_delay() {
        let config = ControllerConfig { backoff_base: Duration::from_millis(10), backoff_cap: Duration::from_millis(40), ..Default::default() };
        let (store, sink, r) = setup(config);
        let key = ResourceKey::new(ResourceKind::ConfigMap, "ns", "cm");
        store.put(key.clone(), cm("1", "AKIAZ3kq9P0xWm7Lr2Tb"));
        store.fail_next(&key, 5);
        for _ in 0..5 {
            match r.reconcile(&entry(&key, EventType::Modified)).await {
                Outcome::RequeueAfter(d) => assert!(d <= Duration::from_millis(40)),
                other => panic!("expected requeue, got {other:?}"),
            }
        }
        assert_eq!(r.backoff().failures(&key), 5);
        assert!(matches!(r.reconcile(&entry(&key, EventType::Modified)).await, Outcome::Success));
        assert_eq!(r.backoff().failures(&key), 0);
        assert_eq!(sink.findings().len(), 1);
    }

    #[tokio::test]
    async fn deadline_exceeded_is_transient() {
        let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(200)));
        let sink = Arc::new(MemorySink::new());
        let config = ControllerConfig { reconcile_timeout: Duration::from_millis(20), ..Default::default() };
        let r = Reconciler::new(store.clone(), Arc::new(PolicyEngine::with_default_rules()), sink, &config);
        let key = ResourceKey::new(ResourceKind::ConfigMap, "ns", "slow");
        assert!(matches!(r.reconcile(&entry(&key, EventType::Added)).await, Outcome::RequeueAfter(_)));
    }

    #[tokio::test]
    async fn sink_failure_keeps_version_cached() {
        let (store, sink, r) = setup(ControllerConfig::default());
        let key = ResourceKey::new(ResourceKind::ConfigMap, "ns", "cm");
        store.put(key.clone(), cm("5", "AKIAZ3kq9P0xWm7Lr2Tb"));
        sink.set_failing(true);
        assert!(matches!(r.reconcile(&entry(&key, EventType::Added)).await, Outcome::Success));
        assert_eq!(r.cache().get(&key), Some(ResourceVersion::new("5")));
    }
}
