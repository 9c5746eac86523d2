//! Change event source: one reflector-backed watcher per kind.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::rbac::v1::{ClusterRole, Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kaudit_core::{ChangeEvent, EventType, ResourceKey, ResourceKind};
use kube::runtime::reflector::Store;
use kube::runtime::watcher::Event;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use metrics::counter;
use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{Caches, KubeStore, SyncedCache};

/// Keys a watcher has reported as present. A relist only carries survivors,
/// so anything missing from it was deleted while the watch was down.
#[derive(Debug, Default)]
pub struct SeenKeys {
    keys: FxHashSet<ResourceKey>,
}

impl SeenKeys {
    pub fn applied(&mut self, key: ResourceKey) -> Vec<(ResourceKey, EventType)> {
        self.keys.insert(key.clone());
        vec![(key, EventType::Modified)]
    }

    pub fn deleted(&mut self, key: ResourceKey) -> Vec<(ResourceKey, EventType)> {
        self.keys.remove(&key);
        vec![(key, EventType::Deleted)]
    }

    /// Listed keys come back as `Added`, vanished ones as `Deleted`.
    pub fn restarted(&mut self, listed: Vec<ResourceKey>) -> Vec<(ResourceKey, EventType)> {
        let now: FxHashSet<ResourceKey> = listed.iter().cloned().collect();
        let mut gone: Vec<ResourceKey> = self.keys.iter().filter(|k| !now.contains(*k)).cloned().collect();
        gone.sort();
        if !gone.is_empty() {
            debug!(gone = gone.len(), "objects vanished across relist");
        }
        self.keys = now;
        let mut out: Vec<_> = listed.into_iter().map(|k| (k, EventType::Added)).collect();
        out.extend(gone.into_iter().map(|k| (k, EventType::Deleted)));
        out
    }

    pub fn len(&self) -> usize { self.keys.len() }

    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
}

pub struct Watchers {
    store: Arc<KubeStore>,
    handles: Vec<JoinHandle<()>>,
}

impl Watchers {
    pub fn store(&self) -> Arc<KubeStore> { Arc::clone(&self.store) }

    pub fn abort(&self) {
        for h in &self.handles {
            h.abort();
        }
    }

    /// True once every cache has completed its initial list.
    pub fn synced(&self) -> bool {
        let c = self.store.caches();
        c.configmaps.as_ref().map_or(true, |s| s.is_synced())
            && c.secrets.as_ref().map_or(true, |s| s.is_synced())
            && c.roles.as_ref().map_or(true, |s| s.is_synced())
            && c.rolebindings.as_ref().map_or(true, |s| s.is_synced())
            && c.cluster_roles.as_ref().map_or(true, |s| s.is_synced())
    }
}

/// Start list+watch for `kinds`, optionally scoped to one namespace, and send
/// change events into `tx`. Watching RoleBindings also caches ClusterRoles so
/// cluster-scoped role refs resolve without an API round trip.
pub fn spawn_watchers(
    client: Client,
    kinds: &[ResourceKind],
    namespace: Option<&str>,
    tx: mpsc::Sender<ChangeEvent>,
) -> Watchers {
    let mut caches = Caches::default();
    let mut handles = Vec::new();
    for kind in kinds {
        match kind {
            ResourceKind::ConfigMap => {
                caches.configmaps = Some(watch_namespaced::<ConfigMap>(&client, *kind, namespace, tx.clone(), &mut handles))
            }
            ResourceKind::Secret => {
                caches.secrets = Some(watch_namespaced::<Secret>(&client, *kind, namespace, tx.clone(), &mut handles))
            }
            ResourceKind::Role => {
                caches.roles = Some(watch_namespaced::<Role>(&client, *kind, namespace, tx.clone(), &mut handles))
            }
            ResourceKind::RoleBinding => {
                caches.rolebindings =
                    Some(watch_namespaced::<RoleBinding>(&client, *kind, namespace, tx.clone(), &mut handles))
            }
        }
    }
    if kinds.contains(&ResourceKind::RoleBinding) {
        let api: Api<ClusterRole> = Api::all(client.clone());
        let (store, synced, handle) = spawn_reflector(api, "ClusterRole", None);
        handles.push(handle);
        caches.cluster_roles = Some(SyncedCache::new(store, synced));
    }
    info!(kinds = ?kinds, ns = ?namespace, watchers = handles.len(), "watchers started");
    Watchers { store: Arc::new(KubeStore::with_caches(client, caches)), handles }
}

fn watch_namespaced<K>(
    client: &Client,
    kind: ResourceKind,
    namespace: Option<&str>,
    tx: mpsc::Sender<ChangeEvent>,
    handles: &mut Vec<JoinHandle<()>>,
) -> SyncedCache<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let api: Api<K> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let (store, synced, handle) = spawn_reflector(api, kind.as_str(), Some((kind, tx)));
    handles.push(handle);
    SyncedCache::new(store, synced)
}

fn spawn_reflector<K>(
    api: Api<K>,
    label: &'static str,
    events: Option<(ResourceKind, mpsc::Sender<ChangeEvent>)>,
) -> (Store<K>, Arc<AtomicBool>, JoinHandle<()>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let (store, writer) = reflector::store::<K>();
    let synced = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&synced);
    let handle = tokio::spawn(async move {
        let mut seen = SeenKeys::default();
        let stream = reflector(writer, watcher(api, watcher::Config::default())).default_backoff();
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            let ev = match item {
                Ok(ev) => ev,
                Err(e) => {
                    counter!("watch_errors_total", 1, "kind" => label);
                    warn!(kind = label, error = %e, "watch error; backing off");
                    continue;
                }
            };
            if matches!(ev, Event::Restarted(_)) {
                flag.store(true, Ordering::Release);
            }
            let Some((kind, tx)) = &events else { continue };
            let key_of = |o: &K| ResourceKey::new(*kind, o.namespace().unwrap_or_default(), o.name_any());
            let changes = match ev {
                Event::Applied(o) => seen.applied(key_of(&o)),
                Event::Deleted(o) => seen.deleted(key_of(&o)),
                Event::Restarted(list) => {
                    debug!(kind = label, count = list.len(), "watch restart");
                    seen.restarted(list.iter().map(key_of).collect())
                }
            };
            for (key, event) in changes {
                if tx.send(ChangeEvent { key, event }).await.is_err() {
                    debug!(kind = label, "event receiver gone; watcher exiting");
                    return;
                }
            }
        }
        warn!(kind = label, "watcher stream ended");
    });
    (store, synced, handle)
}
