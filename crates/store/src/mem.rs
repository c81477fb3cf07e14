use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use parking_lot::{Mutex, RwLock};
use vsync_core::{Domain, Identity, Resource, Result, StoreOp, SyncError, TrackedKind};

use crate::{IndexSpec, IndexedCache, ObjectStore};

/// One successful write, as recorded by [`MemStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOp {
    pub op: StoreOp,
    pub kind: TrackedKind,
    pub identity: Identity,
}

/// In-memory `ObjectStore` with a write log and one-shot failure injection.
pub struct MemStore {
    domain: Domain,
    objects: RwLock<IndexedCache>,
    writes: Mutex<Vec<WriteOp>>,
    fail_next: Mutex<Option<StoreOp>>,
    counter: AtomicU64,
}

impl MemStore {
    pub fn new(domain: Domain, specs: Vec<IndexSpec>) -> Self {
        Self {
            domain,
            objects: RwLock::new(IndexedCache::new(specs)),
            writes: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            counter: AtomicU64::new(1),
        }
    }

    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    fn stamp(&self, obj: &mut Resource) {
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("{}-uid-{}", self.domain, self.next()));
        }
        obj.metadata.resource_version = Some(self.next().to_string());
    }

    /// Put an object in place without recording a write (test setup, watch replay).
    pub fn insert(&self, mut obj: Resource) -> Resource {
        self.stamp(&mut obj);
        self.objects.write().apply(obj.clone());
        obj
    }

    /// Drop an object without recording a write.
    pub fn evict(&self, kind: TrackedKind, id: &Identity) -> Option<Resource> {
        self.objects.write().remove(kind, id)
    }

    pub fn object(&self, kind: TrackedKind, id: &Identity) -> Option<Resource> {
        self.objects.read().get(kind, id).cloned()
    }

    pub fn list(&self, kind: TrackedKind) -> Vec<Resource> {
        self.objects.read().list(kind)
    }

    pub fn writes(&self) -> Vec<WriteOp> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Make the next call of `op` fail with `StoreOperationFailed`.
    pub fn fail_next(&self, op: StoreOp) {
        *self.fail_next.lock() = Some(op);
    }

    fn check(&self, op: StoreOp, kind: TrackedKind, id: &Identity) -> Result<()> {
        let mut slot = self.fail_next.lock();
        if *slot == Some(op) {
            *slot = None;
            return Err(SyncError::store(op, kind, id.clone(), anyhow!("injected {} failure", op)));
        }
        Ok(())
    }

    fn log(&self, op: StoreOp, kind: TrackedKind, identity: Identity) {
        self.writes.lock().push(WriteOp { op, kind, identity });
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemStore {
    fn domain(&self) -> Domain {
        self.domain
    }

    async fn get(&self, kind: TrackedKind, id: &Identity) -> Result<Option<Resource>> {
        self.check(StoreOp::Get, kind, id)?;
        Ok(self.object(kind, id))
    }

    async fn create(&self, obj: &Resource) -> Result<()> {
        let id = obj.identity();
        self.check(StoreOp::Create, obj.kind, &id)?;
        let mut objects = self.objects.write();
        if objects.get(obj.kind, &id).is_some() {
            return Err(SyncError::already_exists(obj.kind, id));
        }
        let mut new = obj.clone();
        new.metadata.uid = None;
        self.stamp(&mut new);
        objects.apply(new);
        drop(objects);
        self.log(StoreOp::Create, obj.kind, id);
        Ok(())
    }

    async fn update(&self, obj: &Resource) -> Result<()> {
        let id = obj.identity();
        self.check(StoreOp::Update, obj.kind, &id)?;
        let mut objects = self.objects.write();
        let Some(current) = objects.get(obj.kind, &id).cloned() else {
            return Err(SyncError::not_found(obj.kind, id));
        };
        let mut new = obj.clone();
        new.status = current.status;
        new.metadata.uid = current.metadata.uid;
        self.stamp(&mut new);
        objects.apply(new);
        drop(objects);
        self.log(StoreOp::Update, obj.kind, id);
        Ok(())
    }

    async fn update_status(&self, obj: &Resource) -> Result<()> {
        let id = obj.identity();
        self.check(StoreOp::UpdateStatus, obj.kind, &id)?;
        let mut objects = self.objects.write();
        let Some(mut current) = objects.get(obj.kind, &id).cloned() else {
            return Err(SyncError::not_found(obj.kind, id));
        };
        current.status = obj.status.clone();
        self.stamp(&mut current);
        objects.apply(current);
        drop(objects);
        self.log(StoreOp::UpdateStatus, obj.kind, id);
        Ok(())
    }

    async fn delete(&self, obj: &Resource) -> Result<()> {
        let id = obj.identity();
        self.check(StoreOp::Delete, obj.kind, &id)?;
        if self.objects.write().remove(obj.kind, &id).is_none() {
            return Err(SyncError::not_found(obj.kind, id));
        }
        self.log(StoreOp::Delete, obj.kind, id);
        Ok(())
    }

    async fn list_by_index(&self, kind: TrackedKind, index: &str, key: &str) -> Result<Vec<Resource>> {
        self.check(StoreOp::List, kind, &Identity::default())?;
        Ok(self.objects.read().list_by_index(kind, index, key))
    }
}
