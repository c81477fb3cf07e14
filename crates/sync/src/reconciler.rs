use std::fmt;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use metrics::counter;
use tracing::{debug, info};
use vsync_core::equality::semantic_eq;
use vsync_core::labels::{PHYSICAL_ONLY_ANNOTATIONS, PHYSICAL_ONLY_LABELS};
use vsync_core::resource::controller_ref;
use vsync_core::{Identity, Mutability, Resource, Result, SyncConfig, SyncError, TrackedKind};
use vsync_store::{NameCache, ObjectStore};
use vsync_translate::{from_annotations, revision_suffix, NamespacedTranslator, RevisionTranslator, Translate};

use crate::resolver::OwnershipResolver;

/// How a child's virtual name follows from its virtual parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    /// Same name as the parent (configurations and routes of a service).
    Parent,
    /// Parent name plus the numeric revision suffix.
    ParentWithRevision,
}

/// Static description of one reconciled kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindProfile {
    pub kind: TrackedKind,
    pub parent: Option<TrackedKind>,
    pub naming: Naming,
}

impl KindProfile {
    pub const CONFIGURATION: KindProfile =
        KindProfile { kind: TrackedKind::Configuration, parent: Some(TrackedKind::Service), naming: Naming::Parent };
    pub const ROUTE: KindProfile =
        KindProfile { kind: TrackedKind::Route, parent: Some(TrackedKind::Service), naming: Naming::Parent };
    pub const REVISION: KindProfile = KindProfile {
        kind: TrackedKind::Revision,
        parent: Some(TrackedKind::Configuration),
        naming: Naming::ParentWithRevision,
    };

    pub const ALL: [KindProfile; 3] = [Self::CONFIGURATION, Self::ROUTE, Self::REVISION];

    pub fn for_kind(kind: TrackedKind) -> Option<KindProfile> {
        Self::ALL.into_iter().find(|p| p.kind == kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither the object nor any of its owners carries the marker.
    Unmanaged,
    /// No virtual identity could be derived yet.
    Unresolved,
    /// The virtual parent is not visible yet.
    ParentMissing,
}

/// Observable transition of one reconcile step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Noop,
    Deleted,
    Created(Identity),
    SpecUpdated,
    StatusUpdated,
    Skipped(SkipReason),
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Noop => "noop",
            Outcome::Deleted => "deleted",
            Outcome::Created(_) => "created",
            Outcome::SpecUpdated => "spec_updated",
            Outcome::StatusUpdated => "status_updated",
            Outcome::Skipped(SkipReason::Unmanaged) => "skipped_unmanaged",
            Outcome::Skipped(SkipReason::Unresolved) => "skipped_unresolved",
            Outcome::Skipped(SkipReason::ParentMissing) => "skipped_parent_missing",
        }
    }

    /// True when the step wrote to a store.
    pub fn wrote(&self) -> bool {
        matches!(self, Outcome::Deleted | Outcome::Created(_) | Outcome::SpecUpdated | Outcome::StatusUpdated)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bidirectional reconciler for one kind. The physical object is the source of truth.
pub struct Reconciler {
    profile: KindProfile,
    translator: Arc<dyn Translate>,
    parents: NamespacedTranslator,
    cache: NameCache,
    resolver: OwnershipResolver,
    virtual_store: Arc<dyn ObjectStore>,
    physical_store: Arc<dyn ObjectStore>,
}

impl Reconciler {
    pub fn new(
        profile: KindProfile,
        cfg: &SyncConfig,
        virtual_store: Arc<dyn ObjectStore>,
        physical_store: Arc<dyn ObjectStore>,
    ) -> Result<Self, regex::Error> {
        let parents = NamespacedTranslator::new(cfg)?;
        let translator: Arc<dyn Translate> = match profile.naming {
            Naming::Parent => Arc::new(parents.clone()),
            Naming::ParentWithRevision => Arc::new(RevisionTranslator::new(cfg)?),
        };
        let resolver = OwnershipResolver::new(physical_store.clone(), virtual_store.clone(), parents.clone());
        Ok(Self {
            profile,
            translator,
            parents,
            cache: NameCache::new(cfg.cache_shards),
            resolver,
            virtual_store,
            physical_store,
        })
    }

    pub fn profile(&self) -> KindProfile {
        self.profile
    }

    pub fn kind(&self) -> TrackedKind {
        self.profile.kind
    }

    pub fn cache(&self) -> &NameCache {
        &self.cache
    }

    pub fn resolver(&self) -> &OwnershipResolver {
        &self.resolver
    }

    pub fn physical_store(&self) -> &Arc<dyn ObjectStore> {
        &self.physical_store
    }

    pub fn virtual_store(&self) -> &Arc<dyn ObjectStore> {
        &self.virtual_store
    }

    /// Physical identity for a virtual one; generated names are found through the cache.
    pub fn virtual_to_physical(&self, virtual_id: &Identity) -> Result<Identity> {
        if let Some(p) = self.cache.find_physical(virtual_id) {
            return Ok(p);
        }
        self.translator.virtual_to_physical(virtual_id)
    }

    /// Virtual identity of a physical object.
    ///
    /// Tried in order: recorded annotations, name parsing, the name cache, the
    /// configuration index (revisions only) and finally the managed owner.
    pub async fn physical_to_virtual(&self, physical: &Resource) -> Result<Identity> {
        let pid = physical.identity();
        if self.profile.naming == Naming::Parent {
            if let Some(v) = from_annotations(physical) {
                // host-chosen names cannot be derived back from the virtual identity
                if self.translator.virtual_to_physical(&v).ok().as_ref() != Some(&pid) {
                    self.cache.record(pid, v.clone());
                }
                return Ok(v);
            }
        }
        let parse_err = match self.translator.physical_to_virtual(&pid) {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if let Some(v) = self.cache.lookup(&pid) {
            return Ok(v);
        }
        if self.profile.naming == Naming::ParentWithRevision {
            if let Ok(config) = self.resolver.configuration_for_revision(physical).await {
                let physical_config = self.parents.physical_name(config.name(), config.namespace());
                let v = self.derive(&config, &physical_config, physical)?;
                debug!(physical = %pid, virtual_id = %v, "resolved through configuration index");
                self.cache.record(pid, v.clone());
                return Ok(v);
            }
        }
        match self.resolve_by_owner(physical).await {
            Ok(v) => {
                debug!(physical = %pid, virtual_id = %v, "resolved through owner");
                self.cache.record(pid, v.clone());
                Ok(v)
            }
            Err(e) => {
                debug!(physical = %pid, parse_error = %parse_err, error = %e, "virtual identity unresolved");
                Err(e)
            }
        }
    }

    async fn resolve_by_owner(&self, physical: &Resource) -> Result<Identity> {
        let managed = self.resolver.find_parent(physical).await?;
        if Some(managed.kind) != self.profile.parent {
            return Err(SyncError::not_found(
                self.profile.parent.map(|k| k.as_str()).unwrap_or("parent"),
                physical.identity(),
            ));
        }
        let vparent = self.resolver.virtual_parent(managed.kind, &managed.parent.identity()).await?;
        self.derive(&vparent, managed.parent.name(), physical)
    }

    fn derive(&self, vparent: &Resource, physical_parent: &str, physical: &Resource) -> Result<Identity> {
        let name = match self.profile.naming {
            Naming::Parent => vparent.name().to_string(),
            Naming::ParentWithRevision => {
                format!("{}{}", vparent.name(), revision_suffix(physical.name(), physical_parent)?)
            }
        };
        Ok(Identity::new(vparent.namespace(), name))
    }

    /// Drop the cached identity of a deleted physical object.
    pub fn forget(&self, physical: &Identity) -> Option<Identity> {
        self.cache.remove(physical)
    }

    /// Physical is gone: remove the virtual copy.
    pub async fn sync_down(&self, virtual_obj: &Resource) -> Result<Outcome> {
        match self.virtual_store.delete(virtual_obj).await {
            Ok(()) => {
                info!(kind = %self.kind(), virtual_id = %virtual_obj.identity(), "deleted virtual object");
                Ok(self.count(Outcome::Deleted))
            }
            Err(e) if e.is_not_found() => Ok(self.count(Outcome::Noop)),
            Err(e) => Err(e),
        }
    }

    /// Physical exists without a virtual copy: create it.
    pub async fn sync_up(&self, physical: &Resource) -> Result<Outcome> {
        if !self.resolver.is_managed(physical).await {
            debug!(kind = %self.kind(), physical = %physical.identity(), "skip unmanaged object");
            return Ok(self.count(Outcome::Skipped(SkipReason::Unmanaged)));
        }
        let vid = match self.physical_to_virtual(physical).await {
            Ok(v) => v,
            Err(e) if e.is_deferrable() => return Ok(self.count(Outcome::Skipped(SkipReason::Unresolved))),
            Err(e) => return Err(e),
        };
        let mut obj = physical.clone();
        obj.set_identity(&vid);
        obj.strip_store_fields();
        obj.remove_labels(PHYSICAL_ONLY_LABELS);
        obj.remove_annotations(PHYSICAL_ONLY_ANNOTATIONS);
        obj.metadata.owner_references = None;
        if let Some(parent_kind) = self.profile.parent {
            let Some((vparent, original)) = self.virtual_parent(physical, parent_kind).await else {
                debug!(kind = %self.kind(), physical = %physical.identity(), %parent_kind, "virtual parent not visible yet");
                return Ok(self.count(Outcome::Skipped(SkipReason::ParentMissing)));
            };
            if vparent.namespace() != vid.namespace {
                debug!(virtual_id = %vid, parent = %vparent.identity(), "virtual parent lives in another namespace");
                return Ok(self.count(Outcome::Skipped(SkipReason::ParentMissing)));
            }
            let mut owner = controller_ref(&vparent);
            if let Some(original) = original {
                owner.controller = original.controller;
                owner.block_owner_deletion = original.block_owner_deletion;
            }
            obj.metadata.owner_references = Some(vec![owner]);
        }
        match self.virtual_store.create(&obj).await {
            Ok(()) => {
                info!(kind = %self.kind(), physical = %physical.identity(), virtual_id = %vid, "created virtual object");
                Ok(self.count(Outcome::Created(vid)))
            }
            Err(e) if e.is_already_exists() => Ok(self.count(Outcome::Noop)),
            Err(e) => Err(e),
        }
    }

    async fn virtual_parent(&self, physical: &Resource, parent_kind: TrackedKind) -> Option<(Resource, Option<OwnerReference>)> {
        if let Some((parent, owner)) = self.resolver.virtual_parent_by_ref(physical, parent_kind).await {
            return Some((parent, Some(owner)));
        }
        if self.profile.naming != Naming::ParentWithRevision {
            return None;
        }
        let config = self.resolver.configuration_for_revision(physical).await.ok()?;
        let original = physical
            .owner_references()
            .iter()
            .find(|o| TrackedKind::from_type(&o.api_version, &o.kind) == Some(parent_kind))
            .cloned();
        Some((config, original))
    }

    /// Both exist: copy spec (mutable kinds) or else status from physical to virtual.
    pub async fn sync(&self, physical: &Resource, virtual_obj: &Resource) -> Result<Outcome> {
        let mutable = self.kind().mutability() == Mutability::Mutable;
        if mutable && !semantic_eq(&physical.spec, &virtual_obj.spec) {
            let mut next = virtual_obj.clone();
            next.spec = physical.spec.clone();
            self.virtual_store.update(&next).await?;
            info!(kind = %self.kind(), virtual_id = %virtual_obj.identity(), "updated virtual spec");
            return Ok(self.count(Outcome::SpecUpdated));
        }
        if !semantic_eq(&physical.status, &virtual_obj.status) {
            let mut next = virtual_obj.clone();
            next.status = physical.status.clone();
            self.virtual_store.update_status(&next).await?;
            debug!(kind = %self.kind(), virtual_id = %virtual_obj.identity(), "updated virtual status");
            return Ok(self.count(Outcome::StatusUpdated));
        }
        Ok(self.count(Outcome::Noop))
    }

    pub async fn reconcile(&self, physical: Option<&Resource>, virtual_obj: Option<&Resource>) -> Result<Outcome> {
        match (physical, virtual_obj) {
            (Some(p), Some(v)) => self.sync(p, v).await,
            (Some(p), None) => self.sync_up(p).await,
            (None, Some(v)) => self.sync_down(v).await,
            (None, None) => Ok(Outcome::Noop),
        }
    }

    fn count(&self, outcome: Outcome) -> Outcome {
        counter!("vsync_sync_total", 1u64, "kind" => self.kind().as_str(), "outcome" => outcome.as_str());
        outcome
    }
}
