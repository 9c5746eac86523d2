//! kaudit core types: keys, snapshots, findings and the collaborator traits.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod snapshot;

pub use snapshot::{
    ConfigMapData, ObjectSnapshot, ObjectState, PolicyRule, RoleBindingData, RoleData, RoleRef,
    SecretData, Subject,
};

/// The watched object kinds. Each variant selects a rule family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    ConfigMap,
    Secret,
    Role,
    RoleBinding,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::Role,
        ResourceKind::RoleBinding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
            ResourceKind::Role => "Role",
            ResourceKind::RoleBinding => "RoleBinding",
        }
    }

    /// Stable small id, used for shard planning.
    pub fn id(&self) -> u32 {
        match self {
            ResourceKind::ConfigMap => 1,
            ResourceKind::Secret => 2,
            ResourceKind::Role => 3,
            ResourceKind::RoleBinding => 4,
        }
    }

    /// Parse a kind name case-insensitively (`configmap`, `ConfigMap`, `rolebindings`).
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let singular = lower.strip_suffix('s').unwrap_or(&lower);
        match singular {
            "configmap" | "cm" => Some(ResourceKind::ConfigMap),
            "secret" => Some(ResourceKind::Secret),
            "role" => Some(ResourceKind::Role),
            "rolebinding" => Some(ResourceKind::RoleBinding),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (Kind, Namespace, Name): identifies one watched object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Opaque token from the snapshot store; only compared for equality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
    pub fn new(v: impl Into<String>) -> Self { Self(v.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// One step up, saturating at `Critical`.
    pub fn raised(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// One violation detected in one object generation.
///
/// Two findings with the same `(key, resource_version, rule_id)` are the same occurrence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub key: ResourceKey,
    pub resource_version: ResourceVersion,
    pub rule_id: String,
    pub severity: Severity,
    pub detail: String,
}

impl Finding {
    pub fn occurrence(&self) -> (&ResourceKey, &ResourceVersion, &str) {
        (&self.key, &self.resource_version, self.rule_id.as_str())
    }
}

/// Watch event types. Advisory only: a not-found fetch is authoritative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// Notification emitted by a change event source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    pub key: ResourceKey,
    pub event: EventType,
}

/// Why a key sits in the queue. The latest reason wins when events coalesce.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnqueueReason {
    Event(EventType),
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub key: ResourceKey,
    pub reason: EnqueueReason,
}

/// Errors surfaced by a snapshot store. Not-found is `Ok(None)`, not an error.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::Timeout(_))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sink: {0}")]
pub struct SinkError(pub String);

/// Read-only view of cluster state, backed by a watch-fed cache or the API.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: &ResourceKey) -> Result<Option<ObjectSnapshot>, FetchError>;

    /// Resolve a binding's role reference. `ClusterRole` references resolve cluster-wide.
    async fn resolve_role_ref(&self, namespace: &str, role_ref: &RoleRef) -> Result<Option<RoleData>, FetchError>;
}

/// Downstream receiver of findings. Errors never fail a reconcile.
#[async_trait::async_trait]
pub trait FindingSink: Send + Sync {
    async fn report(&self, finding: &Finding) -> Result<(), SinkError>;

    /// The object behind `key` is gone; retraction policy is up to the sink.
    async fn object_gone(&self, _key: &ResourceKey) -> Result<(), SinkError> { Ok(()) }
}

pub mod prelude {
    pub use super::{
        ChangeEvent, EnqueueReason, EventType, FetchError, Finding, FindingSink, ObjectSnapshot,
        ObjectState, QueueEntry, ResourceKey, ResourceKind, ResourceVersion, Severity, SinkError,
        SnapshotStore, ShardPlanner, KeyShardPlanner,
    };
}

// ---- sharding primitives ----

/// Planner mapping a key into one of N lock shards.
pub trait ShardPlanner: Send + Sync {
    fn plan(&self, key: &ResourceKey) -> usize;
}

/// Default planner: FNV-1a over kind id, namespace and name, modulo shard count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KeyShardPlanner { buckets: usize }

impl KeyShardPlanner {
    pub fn new(buckets: usize) -> Self {
        Self { buckets: buckets.clamp(1, u16::MAX as usize) }
    }

    pub fn buckets(&self) -> usize { self.buckets }
}

impl ShardPlanner for KeyShardPlanner {
    fn plan(&self, key: &ResourceKey) -> usize {
        if self.buckets <= 1 { return 0; }
        let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
        let kind = key.kind.id().to_le_bytes();
        let parts: [&[u8]; 5] = [&kind, b"/", key.namespace.as_bytes(), b"/", key.name.as_bytes()];
        for part in parts {
            for b in part { h ^= *b as u64; h = h.wrapping_mul(0x100000001b3); }
        }
        (h % self.buckets as u64) as usize
    }
}
