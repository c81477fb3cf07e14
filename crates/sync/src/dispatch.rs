use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};
use vsync_core::{Domain, Identity, Resource, Result, SyncConfig, TrackedKind};
use vsync_store::ObjectStore;

use crate::index::{revision_keys, virtual_index_specs};
use crate::reconciler::{KindProfile, Outcome, Reconciler, SkipReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Added,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Added(Resource),
    Updated { old: Option<Resource>, new: Resource },
    Deleted(Resource),
}

/// A typed change notification from one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub domain: Domain,
    pub notification: Notification,
}

impl Event {
    /// Decode a raw notification payload. Untracked types are rejected here.
    pub fn decode(domain: Domain, verb: Verb, raw: Value) -> Result<Self> {
        let obj = Resource::from_json(raw)?;
        let notification = match verb {
            Verb::Added => Notification::Added(obj),
            Verb::Updated => Notification::Updated { old: None, new: obj },
            Verb::Deleted => Notification::Deleted(obj),
        };
        Ok(Self { domain, notification })
    }

    pub fn updated(domain: Domain, old: Value, new: Value) -> Result<Self> {
        let old = Resource::from_json(old)?;
        let new = Resource::from_json(new)?;
        Ok(Self { domain, notification: Notification::Updated { old: Some(old), new } })
    }

    pub fn object(&self) -> &Resource {
        match &self.notification {
            Notification::Added(o) | Notification::Deleted(o) => o,
            Notification::Updated { new, .. } => new,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.notification, Notification::Deleted(_))
    }

    /// Coalescing key: one pending event per object and domain.
    pub fn key(&self) -> (Domain, TrackedKind, Identity) {
        let obj = self.object();
        (self.domain, obj.kind, obj.identity())
    }
}

/// Routes notifications from both domains to the reconciler of their kind.
pub struct Dispatcher {
    reconcilers: Vec<Reconciler>,
    target_namespace: String,
    virtual_store: Arc<dyn ObjectStore>,
    physical_store: Arc<dyn ObjectStore>,
}

impl Dispatcher {
    pub fn new(
        cfg: &SyncConfig,
        virtual_store: Arc<dyn ObjectStore>,
        physical_store: Arc<dyn ObjectStore>,
    ) -> Result<Self, regex::Error> {
        let reconcilers = KindProfile::ALL
            .into_iter()
            .map(|p| Reconciler::new(p, cfg, virtual_store.clone(), physical_store.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { reconcilers, target_namespace: cfg.target_namespace.clone(), virtual_store, physical_store })
    }

    /// Index declarations the virtual store must maintain for this dispatcher.
    pub fn index_specs(cfg: &SyncConfig) -> Result<Vec<vsync_store::IndexSpec>, regex::Error> {
        virtual_index_specs(cfg)
    }

    pub fn reconciler(&self, kind: TrackedKind) -> Option<&Reconciler> {
        self.reconcilers.iter().find(|r| r.kind() == kind)
    }

    pub async fn handle(&self, event: &Event) -> Result<Outcome> {
        let obj = event.object();
        let Some(r) = self.reconciler(obj.kind) else {
            trace!(domain = %event.domain, kind = %obj.kind, identity = %obj.identity(), "kind not reconciled");
            return Ok(Outcome::Noop);
        };
        match event.domain {
            Domain::Physical => self.handle_physical(r, event).await,
            Domain::Virtual => self.handle_virtual(r, event).await,
        }
    }

    async fn handle_physical(&self, r: &Reconciler, event: &Event) -> Result<Outcome> {
        let obj = event.object();
        let pid = obj.identity();
        let vid = match r.physical_to_virtual(obj).await {
            Ok(v) => v,
            Err(e) if e.is_deferrable() => {
                if event.is_delete() {
                    r.forget(&pid);
                    return Ok(Outcome::Skipped(SkipReason::Unresolved));
                }
                // lets sync_up report why it cannot proceed
                return r.reconcile(Some(obj), None).await;
            }
            Err(e) => return Err(e),
        };
        let current = self.virtual_store.get(obj.kind, &vid).await?;
        if event.is_delete() {
            let outcome = r.reconcile(None, current.as_ref()).await?;
            r.forget(&pid);
            return Ok(outcome);
        }
        r.reconcile(Some(obj), current.as_ref()).await
    }

    async fn handle_virtual(&self, r: &Reconciler, event: &Event) -> Result<Outcome> {
        let obj = event.object();
        let pid = match r.virtual_to_physical(&obj.identity()) {
            Ok(p) => p,
            Err(e) if e.is_deferrable() => {
                debug!(kind = %obj.kind, virtual_id = %obj.identity(), error = %e, "no physical identity");
                return Ok(Outcome::Skipped(SkipReason::Unresolved));
            }
            Err(e) => return Err(e),
        };
        let physical = self.physical_store.get(obj.kind, &pid).await?;
        let virtual_obj = if event.is_delete() { None } else { Some(obj) };
        r.reconcile(physical.as_ref(), virtual_obj).await
    }

    /// Events to re-run after `event`: a changed virtual configuration revisits
    /// the host revisions its status names, which may only now be resolvable.
    pub async fn dependents(&self, event: &Event) -> Result<Vec<Event>> {
        let obj = event.object();
        if event.domain != Domain::Virtual || obj.kind != TrackedKind::Configuration || event.is_delete() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for key in revision_keys(&self.target_namespace, obj) {
            let Some(pid) = Identity::parse_key(&key) else { continue };
            if let Some(rev) = self.physical_store.get(TrackedKind::Revision, &pid).await? {
                trace!(configuration = %obj.identity(), revision = %pid, "revisit revision");
                out.push(Event { domain: Domain::Physical, notification: Notification::Updated { old: None, new: rev } });
            }
        }
        Ok(out)
    }

    /// Replay identity resolution over existing physical objects to refill the name caches.
    pub async fn warm(&self, objects: impl IntoIterator<Item = Resource>) -> usize {
        let mut resolved = 0;
        for obj in objects {
            let Some(r) = self.reconciler(obj.kind) else { continue };
            match r.physical_to_virtual(&obj).await {
                Ok(_) => resolved += 1,
                Err(e) => debug!(kind = %obj.kind, physical = %obj.identity(), error = %e, "warm: unresolved"),
            }
        }
        resolved
    }
}
