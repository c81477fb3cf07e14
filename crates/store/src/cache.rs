use std::hash::{Hash, Hasher};

use metrics::counter;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use tracing::debug;
use vsync_core::Identity;

type Shard = RwLock<FxHashMap<Identity, Identity>>;

/// Physical -> virtual identities that cannot be derived from names alone.
///
/// Forward entries are sharded by physical identity and a reverse index by
/// virtual identity. Writers take the forward shard lock before the reverse
/// one, so both views change together.
pub struct NameCache {
    forward: Box<[Shard]>,
    reverse: Box<[Shard]>,
}

fn shards(n: usize) -> Box<[Shard]> {
    (0..n).map(|_| RwLock::new(FxHashMap::default())).collect()
}

impl NameCache {
    pub fn new(shards_hint: usize) -> Self {
        let n = shards_hint.clamp(1, u16::MAX as usize);
        Self { forward: shards(n), reverse: shards(n) }
    }

    fn slot(&self, key: &Identity) -> usize {
        let mut h = FxHasher::default();
        key.hash(&mut h);
        (h.finish() % self.forward.len() as u64) as usize
    }

    pub fn lookup(&self, physical: &Identity) -> Option<Identity> {
        self.forward[self.slot(physical)].read().get(physical).cloned()
    }

    /// Remember a proven mapping. Returns `true` when the cache changed.
    pub fn record(&self, physical: Identity, virtual_id: Identity) -> bool {
        let mut shard = self.forward[self.slot(&physical)].write();
        if shard.get(&physical) == Some(&virtual_id) {
            return false;
        }
        debug!(physical = %physical, virtual_id = %virtual_id, "name cache record");
        counter!("vsync_namecache_records_total", 1u64);
        if let Some(old) = shard.insert(physical.clone(), virtual_id.clone()) {
            self.unlink(&old, &physical);
        }
        self.reverse[self.slot(&virtual_id)].write().insert(virtual_id, physical);
        true
    }

    fn unlink(&self, virtual_id: &Identity, physical: &Identity) {
        let mut rev = self.reverse[self.slot(virtual_id)].write();
        if rev.get(virtual_id) == Some(physical) {
            rev.remove(virtual_id);
        }
    }

    /// Drop the mapping of a deleted physical object; missing keys are fine.
    pub fn remove(&self, physical: &Identity) -> Option<Identity> {
        let mut shard = self.forward[self.slot(physical)].write();
        let old = shard.remove(physical)?;
        self.unlink(&old, physical);
        Some(old)
    }

    /// Reverse lookup of the most recently recorded physical identity.
    pub fn find_physical(&self, virtual_id: &Identity) -> Option<Identity> {
        self.reverse[self.slot(virtual_id)].read().get(virtual_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.forward.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NameCache {
    fn default() -> Self {
        Self::new(16)
    }
}
