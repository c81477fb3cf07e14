//! vsync kubehub: kube-backed object stores, watcher wiring and the dispatch loop.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;

mod dispatch;
mod store;
mod watch;

pub use dispatch::{spawn_dispatch, DispatchHandle, MAX_ATTEMPTS};
pub use store::{api_resource, from_resource, to_resource, KubeStore};
pub use watch::start_watcher;

/// Client for the host cluster, from the ambient kubeconfig or in-cluster config.
pub async fn physical_client() -> Result<Client> {
    Client::try_default().await.context("building host cluster client")
}

/// Client for the virtual cluster API server.
pub async fn virtual_client(kubeconfig: &Path) -> Result<Client> {
    let kc = Kubeconfig::read_from(kubeconfig)
        .with_context(|| format!("reading virtual cluster kubeconfig {}", kubeconfig.display()))?;
    let config = Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
        .await
        .context("loading virtual cluster kubeconfig")?;
    Client::try_from(config).context("building virtual cluster client")
}
