use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use vsync_core::{Identity, Resource, TrackedKind};

/// Keys an object is indexed under; most relations produce one or two.
pub type IndexKeys = SmallVec<[String; 2]>;

type KeyFn = dyn Fn(&Resource) -> IndexKeys + Send + Sync;

/// A named reverse-lookup relation over one kind.
#[derive(Clone)]
pub struct IndexSpec {
    pub name: &'static str,
    pub kind: TrackedKind,
    keys: Arc<KeyFn>,
}

impl IndexSpec {
    pub fn new(name: &'static str, kind: TrackedKind, keys: impl Fn(&Resource) -> IndexKeys + Send + Sync + 'static) -> Self {
        Self { name, kind, keys: Arc::new(keys) }
    }

    pub fn keys_for(&self, obj: &Resource) -> IndexKeys {
        (self.keys)(obj)
    }
}

impl std::fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSpec").field("name", &self.name).field("kind", &self.kind).finish()
    }
}

type ObjKey = (TrackedKind, Identity);

/// Objects of one domain plus index postings, recomputed on every apply/remove.
#[derive(Debug, Default)]
pub struct IndexedCache {
    specs: Vec<IndexSpec>,
    objects: FxHashMap<ObjKey, Resource>,
    postings: FxHashMap<(TrackedKind, &'static str, String), BTreeSet<Identity>>,
    keys_of: FxHashMap<ObjKey, Vec<(&'static str, String)>>,
}

impl IndexedCache {
    pub fn new(specs: Vec<IndexSpec>) -> Self {
        Self { specs, ..Self::default() }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, kind: TrackedKind, id: &Identity) -> Option<&Resource> {
        self.objects.get(&(kind, id.clone()))
    }

    pub fn list(&self, kind: TrackedKind) -> Vec<Resource> {
        let mut out: Vec<Resource> = self.objects.iter().filter(|((k, _), _)| *k == kind).map(|(_, o)| o.clone()).collect();
        out.sort_by_key(Resource::identity);
        out
    }

    /// Insert or replace an object, returning the previous version.
    pub fn apply(&mut self, obj: Resource) -> Option<Resource> {
        let key = (obj.kind, obj.identity());
        self.unindex(&key);
        let mut keys = Vec::new();
        for spec in self.specs.iter().filter(|s| s.kind == obj.kind) {
            for k in spec.keys_for(&obj) {
                self.postings.entry((obj.kind, spec.name, k.clone())).or_default().insert(key.1.clone());
                keys.push((spec.name, k));
            }
        }
        if !keys.is_empty() {
            self.keys_of.insert(key.clone(), keys);
        }
        self.objects.insert(key, obj)
    }

    pub fn remove(&mut self, kind: TrackedKind, id: &Identity) -> Option<Resource> {
        let key = (kind, id.clone());
        self.unindex(&key);
        self.objects.remove(&key)
    }

    fn unindex(&mut self, key: &ObjKey) {
        let Some(old) = self.keys_of.remove(key) else { return };
        for (index, k) in old {
            let posting = (key.0, index, k);
            if let Some(set) = self.postings.get_mut(&posting) {
                set.remove(&key.1);
                if set.is_empty() {
                    self.postings.remove(&posting);
                }
            }
        }
    }

    /// Objects of `kind` whose `index` produced `key`, ordered by identity.
    pub fn list_by_index(&self, kind: TrackedKind, index: &str, key: &str) -> Vec<Resource> {
        let Some(spec) = self.specs.iter().find(|s| s.kind == kind && s.name == index) else {
            return Vec::new();
        };
        let Some(ids) = self.postings.get(&(kind, spec.name, key.to_string())) else { return Vec::new() };
        ids.iter().filter_map(|id| self.objects.get(&(kind, id.clone())).cloned()).collect()
    }
}
