//! kaudit kubehub: kube-rs glue for the audit loop.
//!
//! Watchers feed [`ChangeEvent`](kaudit_core::ChangeEvent)s and reflector
//! caches; [`KubeStore`] serves snapshots from those caches (or the API
//! server); [`manifest`] parses offline YAML/JSON for `kauditctl check`.

#![forbid(unsafe_code)]

pub mod convert;
pub mod manifest;
pub mod store;
pub mod watch;

use anyhow::{Context, Result};
use kube::Client;
use tracing::info;

pub use manifest::{Manifest, ManifestError};
pub use store::{classify, KubeStore};
pub use watch::{spawn_watchers, Watchers};

/// Client from the ambient kubeconfig or in-cluster service account.
pub async fn connect() -> Result<Client> {
    let client = Client::try_default().await.context("building kube client from kubeconfig/in-cluster env")?;
    let version = client.apiserver_version().await.context("querying API server version")?;
    info!(server = %version.git_version, "connected to API server");
    Ok(client)
}
