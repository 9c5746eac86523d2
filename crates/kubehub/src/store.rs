//! kube-rs backed snapshot store.
//!
//! Reads are served from reflector caches when a watcher feeds them, and from
//! the API server otherwise. A cache that has not completed its first list is
//! reported as a transient failure so the key is retried rather than treated
//! as deleted.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::rbac::v1::{ClusterRole, Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kaudit_core::{FetchError, ObjectSnapshot, ResourceKey, ResourceKind, RoleData, RoleRef, SnapshotStore};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::convert;

pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Map a kube client error onto the fetch taxonomy. 404 is handled by `get_opt`.
pub fn classify(err: kube::Error) -> FetchError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            400 | 401 | 403 | 422 => FetchError::Fatal(format!("{} ({}): {}", resp.reason, resp.code, resp.message)),
            _ => FetchError::Transient(format!("{} ({}): {}", resp.reason, resp.code, resp.message)),
        },
        other => FetchError::Transient(other.to_string()),
    }
}

/// A reflector store plus a flag flipped once the initial list has landed.
pub struct SyncedCache<K: Resource<DynamicType = ()> + 'static> {
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K: Resource<DynamicType = ()> + Clone + 'static> SyncedCache<K> {
    pub fn new(store: Store<K>, synced: Arc<AtomicBool>) -> Self { Self { store, synced } }

    pub fn is_synced(&self) -> bool { self.synced.load(Ordering::Acquire) }

    fn lookup(&self, namespace: Option<&str>, name: &str) -> Result<Option<Arc<K>>, FetchError> {
        if !self.is_synced() {
            return Err(FetchError::Transient(format!("{} cache not synced yet", K::kind(&()))));
        }
        let mut r = ObjectRef::new(name);
        if let Some(ns) = namespace {
            r = r.within(ns);
        }
        Ok(self.store.get(&r))
    }
}

#[derive(Default)]
pub struct Caches {
    pub configmaps: Option<SyncedCache<ConfigMap>>,
    pub secrets: Option<SyncedCache<Secret>>,
    pub roles: Option<SyncedCache<Role>>,
    pub rolebindings: Option<SyncedCache<RoleBinding>>,
    pub cluster_roles: Option<SyncedCache<ClusterRole>>,
}

pub struct KubeStore {
    client: Client,
    caches: Caches,
}

impl KubeStore {
    /// Uncached store; every read goes to the API server.
    pub fn new(client: Client) -> Self { Self { client, caches: Caches::default() } }

    pub fn with_caches(client: Client, caches: Caches) -> Self { Self { client, caches } }

    pub fn caches(&self) -> &Caches { &self.caches }

    async fn namespaced<K, T>(
        &self,
        cache: Option<&SyncedCache<K>>,
        namespace: &str,
        name: &str,
        convert: impl Fn(&K) -> T,
    ) -> Result<Option<T>, FetchError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug + 'static,
    {
        if let Some(cache) = cache {
            return Ok(cache.lookup(Some(namespace), name)?.map(|o| convert(&o)));
        }
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        fetch(&api, name, convert).await
    }

    async fn cluster_role(&self, name: &str) -> Result<Option<RoleData>, FetchError> {
        if let Some(cache) = &self.caches.cluster_roles {
            return Ok(cache.lookup(None, name)?.map(|o| convert::cluster_role_rules(&o)));
        }
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        fetch(&api, name, convert::cluster_role_rules).await
    }
}

async fn fetch<K, T>(api: &Api<K>, name: &str, convert: impl Fn(&K) -> T) -> Result<Option<T>, FetchError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await.map_err(classify)?.map(|o| convert(&o)))
}

#[async_trait::async_trait]
impl SnapshotStore for KubeStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<ObjectSnapshot>, FetchError> {
        debug!(key = %key, "snapshot read");
        let (ns, name) = (key.namespace.as_str(), key.name.as_str());
        match key.kind {
            ResourceKind::ConfigMap => self.namespaced(self.caches.configmaps.as_ref(), ns, name, convert::configmap).await,
            ResourceKind::Secret => self.namespaced(self.caches.secrets.as_ref(), ns, name, convert::secret).await,
            ResourceKind::Role => self.namespaced(self.caches.roles.as_ref(), ns, name, convert::role).await,
            ResourceKind::RoleBinding => {
                self.namespaced(self.caches.rolebindings.as_ref(), ns, name, convert::rolebinding).await
            }
        }
    }

    async fn resolve_role_ref(&self, namespace: &str, role_ref: &RoleRef) -> Result<Option<RoleData>, FetchError> {
        if !role_ref.api_group.is_empty() && role_ref.api_group != RBAC_GROUP {
            return Ok(None);
        }
        match role_ref.kind.as_str() {
            "Role" => self.namespaced(self.caches.roles.as_ref(), namespace, &role_ref.name, convert::role_rules).await,
            "ClusterRole" => self.cluster_role(&role_ref.name).await,
            _ => Ok(None),
        }
    }
}
