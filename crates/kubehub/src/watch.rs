use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::TryStreamExt;
use kube::api::Api;
use kube::core::DynamicObject;
use kube::runtime::watcher;
use kube::Client;
use metrics::counter;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vsync_core::{Domain, Identity, Resource, TrackedKind};
use vsync_store::IndexedCache;
use vsync_sync::{Event, Notification};

use crate::store::{api_resource, to_resource};

fn decode(domain: Domain, kind: TrackedKind, obj: DynamicObject) -> Option<Resource> {
    match to_resource(kind, obj) {
        Ok(r) => Some(r),
        Err(e) => {
            warn!(%domain, %kind, error = %e, "dropping undecodable object");
            None
        }
    }
}

fn applied(domain: Domain, obj: Resource, cache: &RwLock<IndexedCache>) -> Event {
    let prev = cache.write().apply(obj.clone());
    let notification = match prev {
        Some(old) => Notification::Updated { old: Some(old), new: obj },
        None => Notification::Added(obj),
    };
    Event { domain, notification }
}

/// List+watch `kind` and forward typed events, keeping `cache` in step.
///
/// A watch restart replays the full list; objects missing from it are
/// reported as deleted.
pub async fn start_watcher(
    client: Client,
    domain: Domain,
    kind: TrackedKind,
    namespace: Option<String>,
    cache: Arc<RwLock<IndexedCache>>,
    tx: mpsc::Sender<Event>,
) -> Result<()> {
    let ar = api_resource(kind);
    let api: Api<DynamicObject> = match namespace.as_deref() {
        Some(ns) => Api::namespaced_with(client, ns, &ar),
        None => Api::all_with(client, &ar),
    };

    let stream = watcher::watcher(api, watcher::Config::default());
    futures::pin_mut!(stream);
    info!(%domain, %kind, ns = ?namespace, "watcher started");
    while let Some(ev) = stream.try_next().await? {
        let mut out = Vec::new();
        match ev {
            watcher::Event::Applied(o) => {
                if let Some(obj) = decode(domain, kind, o) {
                    out.push(applied(domain, obj, &cache));
                }
            }
            watcher::Event::Deleted(o) => {
                if let Some(obj) = decode(domain, kind, o) {
                    cache.write().remove(kind, &obj.identity());
                    out.push(Event { domain, notification: Notification::Deleted(obj) });
                }
            }
            watcher::Event::Restarted(list) => {
                debug!(%domain, %kind, count = list.len(), "watch restart");
                let mut seen: HashSet<Identity> = HashSet::with_capacity(list.len());
                for o in list {
                    if let Some(obj) = decode(domain, kind, o) {
                        seen.insert(obj.identity());
                        out.push(applied(domain, obj, &cache));
                    }
                }
                let stale: Vec<Resource> = cache
                    .read()
                    .list(kind)
                    .into_iter()
                    .filter(|o| namespace.as_deref().map_or(true, |ns| o.namespace() == ns))
                    .filter(|o| !seen.contains(&o.identity()))
                    .collect();
                for obj in stale {
                    cache.write().remove(kind, &obj.identity());
                    out.push(Event { domain, notification: Notification::Deleted(obj) });
                }
            }
        }
        counter!("vsync_watch_events_total", out.len() as u64, "domain" => domain.as_str(), "kind" => kind.as_str());
        for event in out {
            if tx.send(event).await.is_err() {
                info!(%domain, %kind, "event channel closed; stopping watcher");
                return Ok(());
            }
        }
    }
    warn!(%domain, %kind, "watcher stream ended");
    Ok(())
}
