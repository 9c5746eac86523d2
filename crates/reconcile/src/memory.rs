//! In-memory snapshot store: offline manifest checks and tests.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use kaudit_core::{FetchError, ObjectSnapshot, ObjectState, ResourceKey, ResourceKind, RoleData, RoleRef, SnapshotStore};
use rustc_hash::FxHashMap;

#[derive(Default)]
struct Objects {
    namespaced: FxHashMap<ResourceKey, ObjectSnapshot>,
    cluster_roles: FxHashMap<String, RoleData>,
    /// Remaining injected transient failures per key.
    failures: FxHashMap<ResourceKey, u32>,
    fetches: FxHashMap<ResourceKey, u32>,
}

#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<Objects>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Every `get` sleeps this long first.
    pub fn with_latency(latency: Duration) -> Self {
        Self { objects: RwLock::default(), latency: Some(latency) }
    }

    fn read(&self) -> RwLockReadGuard<'_, Objects> { self.objects.read().unwrap_or_else(|e| e.into_inner()) }

    fn write(&self) -> RwLockWriteGuard<'_, Objects> { self.objects.write().unwrap_or_else(|e| e.into_inner()) }

    pub fn put(&self, key: ResourceKey, snapshot: ObjectSnapshot) {
        self.write().namespaced.insert(key, snapshot);
    }

    pub fn remove(&self, key: &ResourceKey) -> Option<ObjectSnapshot> {
        self.write().namespaced.remove(key)
    }

    pub fn put_cluster_role(&self, name: impl Into<String>, role: RoleData) {
        self.write().cluster_roles.insert(name.into(), role);
    }

    /// Make the next `n` fetches of `key` fail as transient.
    pub fn fail_next(&self, key: &ResourceKey, n: u32) {
        self.write().failures.insert(key.clone(), n);
    }

    pub fn fetch_count(&self, key: &ResourceKey) -> u32 {
        self.read().fetches.get(key).copied().unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.read().namespaced.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<ObjectSnapshot>, FetchError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut g = self.write();
        *g.fetches.entry(key.clone()).or_insert(0) += 1;
        if let Some(left) = g.failures.get_mut(key) {
            if *left > 0 {
                *left -= 1;
                return Err(FetchError::Transient(format!("injected failure for {key}")));
            }
        }
        Ok(g.namespaced.get(key).cloned())
    }

    async fn resolve_role_ref(&self, namespace: &str, role_ref: &RoleRef) -> Result<Option<RoleData>, FetchError> {
        let g = self.read();
        match role_ref.kind.as_str() {
            "Role" => {
                let key = ResourceKey::new(ResourceKind::Role, namespace, role_ref.name.as_str());
                Ok(g.namespaced.get(&key).and_then(|s| match &s.state {
                    ObjectState::Role(r) => Some(r.clone()),
                    _ => None,
                }))
            }
            "ClusterRole" => Ok(g.cluster_roles.get(&role_ref.name).cloned()),
            _ => Ok(None),
        }
    }
}
