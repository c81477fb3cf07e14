//! vsync store: the object-store seam plus the in-memory pieces around it
//! (index cache, name cache, notification coalescer).

#![forbid(unsafe_code)]

use vsync_core::{Domain, Identity, Resource, Result, TrackedKind};

mod cache;
mod coalesce;
mod index;
mod mem;

pub use cache::NameCache;
pub use coalesce::Coalescer;
pub use index::{IndexKeys, IndexSpec, IndexedCache};
pub use mem::{MemStore, WriteOp};

/// CRUD and indexed queries against one domain's object store.
///
/// `get` returns `Ok(None)` for a missing object; every other failure is a
/// `SyncError::StoreOperationFailed`. `delete` of a missing object returns
/// `SyncError::NotFound`.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    fn domain(&self) -> Domain;

    async fn get(&self, kind: TrackedKind, id: &Identity) -> Result<Option<Resource>>;
    async fn create(&self, obj: &Resource) -> Result<()>;
    /// Replace metadata and spec; status is left as stored.
    async fn update(&self, obj: &Resource) -> Result<()>;
    /// Replace status only.
    async fn update_status(&self, obj: &Resource) -> Result<()>;
    async fn delete(&self, obj: &Resource) -> Result<()>;
    async fn list_by_index(&self, kind: TrackedKind, index: &str, key: &str) -> Result<Vec<Resource>>;
}
