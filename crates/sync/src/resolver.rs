//! Parent discovery across domains, for objects whose names cannot be translated.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;
use vsync_core::labels::MARKER_LABEL;
use vsync_core::{Identity, Resource, Result, SyncError, TrackedKind};
use vsync_store::ObjectStore;
use vsync_translate::{NamespacedTranslator, Translate};

use crate::index::{INDEX_BY_CONFIGURATION, INDEX_BY_PHYSICAL_NAME};

/// A physical owner that carries the management marker.
#[derive(Debug, Clone)]
pub struct ManagedParent {
    pub kind: TrackedKind,
    pub parent: Resource,
    pub owner: OwnerReference,
}

pub struct OwnershipResolver {
    physical: Arc<dyn ObjectStore>,
    virtual_store: Arc<dyn ObjectStore>,
    parents: NamespacedTranslator,
}

impl OwnershipResolver {
    pub fn new(physical: Arc<dyn ObjectStore>, virtual_store: Arc<dyn ObjectStore>, parents: NamespacedTranslator) -> Self {
        Self { physical, virtual_store, parents }
    }

    pub fn is_marked(&self, obj: &Resource) -> bool {
        obj.label(MARKER_LABEL) == Some(self.parents.suffix())
    }

    /// Marked itself, or owned by a marked parent.
    pub async fn is_managed(&self, obj: &Resource) -> bool {
        self.is_marked(obj) || self.find_parent(obj).await.is_ok()
    }

    /// Walk the owner references of a physical child and return the first managed owner.
    ///
    /// `UnmanagedObject` when owners exist but none is marked, `NotFound` when
    /// no owner could be fetched. Read failures skip the reference.
    pub async fn find_parent(&self, child: &Resource) -> Result<ManagedParent> {
        let mut fetched = false;
        for owner in child.owner_references() {
            let Some(kind) = TrackedKind::from_type(&owner.api_version, &owner.kind) else {
                debug!(child = %child.identity(), owner_kind = %owner.kind, api_version = %owner.api_version, "skip untracked owner kind");
                continue;
            };
            let id = Identity::new(child.namespace(), owner.name.clone());
            let parent = match self.physical.get(kind, &id).await {
                Ok(Some(p)) => p,
                Ok(None) => {
                    debug!(child = %child.identity(), owner = %id, %kind, "owner not found");
                    continue;
                }
                Err(e) => {
                    debug!(child = %child.identity(), owner = %id, %kind, error = %e, "owner lookup failed");
                    continue;
                }
            };
            fetched = true;
            if self.is_marked(&parent) {
                return Ok(ManagedParent { kind, parent, owner: owner.clone() });
            }
        }
        if fetched {
            Err(SyncError::UnmanagedObject { identity: child.identity() })
        } else {
            Err(SyncError::not_found("owner", child.identity()))
        }
    }

    /// Virtual counterpart of a physical parent: indexed physical name first, then name parsing.
    pub async fn virtual_parent(&self, kind: TrackedKind, physical: &Identity) -> Result<Resource> {
        match self.virtual_store.list_by_index(kind, INDEX_BY_PHYSICAL_NAME, &physical.key()).await {
            Ok(mut hits) if hits.len() == 1 => return Ok(hits.remove(0)),
            Ok(hits) if hits.len() > 1 => {
                debug!(%kind, physical = %physical, count = hits.len(), "ambiguous physical name index hit")
            }
            Ok(_) => {}
            Err(e) => debug!(%kind, physical = %physical, error = %e, "physical name index lookup failed"),
        }
        let vid = self.parents.physical_to_virtual(physical)?;
        match self.virtual_store.get(kind, &vid).await {
            Ok(Some(p)) => Ok(p),
            Ok(None) => Err(SyncError::not_found(kind, vid)),
            Err(e) => {
                debug!(%kind, virtual_id = %vid, error = %e, "virtual parent lookup failed");
                Err(SyncError::not_found(kind, vid))
            }
        }
    }

    /// Virtual parent named by the child's owner reference of kind `kind`, with that reference.
    pub async fn virtual_parent_by_ref(&self, child: &Resource, kind: TrackedKind) -> Option<(Resource, OwnerReference)> {
        for owner in child.owner_references() {
            if TrackedKind::from_type(&owner.api_version, &owner.kind) != Some(kind) {
                continue;
            }
            let physical = Identity::new(child.namespace(), owner.name.clone());
            if let Ok(parent) = self.virtual_parent(kind, &physical).await {
                return Some((parent, owner.clone()));
            }
        }
        None
    }

    /// The virtual configuration whose latest revision is this physical revision.
    ///
    /// Requires exactly one indexed configuration, and that its recorded
    /// latest created or ready revision name is the child's name.
    pub async fn configuration_for_revision(&self, revision: &Resource) -> Result<Resource> {
        let key = revision.identity().key();
        let hits = match self.virtual_store.list_by_index(TrackedKind::Configuration, INDEX_BY_CONFIGURATION, &key).await {
            Ok(hits) => hits,
            Err(e) => {
                debug!(revision = %key, error = %e, "configuration index lookup failed");
                Vec::new()
            }
        };
        let [config] = hits.as_slice() else {
            debug!(revision = %key, count = hits.len(), "no unique configuration for revision");
            return Err(SyncError::not_found(TrackedKind::Configuration, revision.identity()));
        };
        let name = revision.name();
        let current = config.status_str("latestCreatedRevisionName") == Some(name)
            || config.status_str("latestReadyRevisionName") == Some(name);
        if !current {
            return Err(SyncError::not_found(TrackedKind::Configuration, revision.identity()));
        }
        Ok(config.clone())
    }

    pub fn parents(&self) -> &NamespacedTranslator {
        &self.parents
    }
}
