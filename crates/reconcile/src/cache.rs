//! Last-seen resource version per key, behind a sharded lock map.
//!
//! Pure optimisation: clearing it only causes redundant evaluations.

use std::sync::{Mutex, MutexGuard};

use kaudit_core::{KeyShardPlanner, ResourceKey, ResourceVersion, ShardPlanner};
use rustc_hash::FxHashMap;

type Shard = FxHashMap<ResourceKey, ResourceVersion>;

pub struct VersionCache {
    planner: KeyShardPlanner,
    shards: Vec<Mutex<Shard>>,
}

impl VersionCache {
    pub fn new(shards: usize) -> Self {
        let planner = KeyShardPlanner::new(shards);
        let shards = (0..planner.buckets()).map(|_| Mutex::new(Shard::default())).collect();
        Self { planner, shards }
    }

    fn shard(&self, key: &ResourceKey) -> MutexGuard<'_, Shard> {
        self.shards[self.planner.plan(key)].lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &ResourceKey) -> Option<ResourceVersion> {
        self.shard(key).get(key).cloned()
    }

    /// True when `version` equals the last recorded version for `key`.
    pub fn is_current(&self, key: &ResourceKey, version: &ResourceVersion) -> bool {
        self.shard(key).get(key).map(|v| v == version).unwrap_or(false)
    }

    /// Record `version`; returns the version it replaced.
    pub fn record(&self, key: &ResourceKey, version: ResourceVersion) -> Option<ResourceVersion> {
        self.shard(key).insert(key.clone(), version)
    }

    pub fn forget(&self, key: &ResourceKey) -> Option<ResourceVersion> {
        self.shard(key).remove(key)
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len()).sum()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Default for VersionCache {
    fn default() -> Self { Self::new(16) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kaudit_core::ResourceKind;

    #[test]
    fn record_compare_forget() {
        let cache = VersionCache::new(4);
        let k = ResourceKey::new(ResourceKind::Secret, "ns", "s");
        assert!(!cache.is_current(&k, &ResourceVersion::new("1")));
        assert_eq!(cache.record(&k, ResourceVersion::new("1")), None);
        assert!(cache.is_current(&k, &ResourceVersion::new("1")));
        assert!(!cache.is_current(&k, &ResourceVersion::new("2")));
        assert_eq!(cache.forget(&k), Some(ResourceVersion::new("1")));
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn clear_spans_all_shards() {
        let cache = VersionCache::new(8);
        for i in 0..64 {
            let k = ResourceKey::new(ResourceKind::ConfigMap, "ns", format!("cm-{i}"));
            cache.record(&k, ResourceVersion::new(i.to_string()));
        }
        assert_eq!(cache.len(), 64);
        cache.clear();
        assert!(cache.is_empty());
    }
}
