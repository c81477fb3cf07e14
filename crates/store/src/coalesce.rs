use std::collections::VecDeque;
use std::hash::Hash;

use metrics::counter;
use rustc_hash::FxHashMap;

/// Coalescing queue keyed by object with FIFO order and fixed capacity.
///
/// A newer item for a queued key replaces the older one in place; when the
/// queue is full the oldest key is dropped.
pub struct Coalescer<K, V> {
    map: FxHashMap<K, V>,
    order: VecDeque<K>,
    cap: usize,
    dropped: u64,
}

impl<K: Hash + Eq + Clone, V> Coalescer<K, V> {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), dropped: 0 }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn dropped(&self) -> u64 { self.dropped }

    pub fn push(&mut self, key: K, item: V) {
        if !self.map.contains_key(&key) {
            if self.order.len() >= self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                    self.dropped += 1;
                    counter!("vsync_coalescer_dropped_total", 1u64);
                }
            }
            self.order.push_back(key.clone());
        }
        self.map.insert(key, item);
    }

    /// Queue `item` only if nothing newer is pending for `key`. Used for retries.
    pub fn push_if_absent(&mut self, key: K, item: V) -> bool {
        if self.map.contains_key(&key) {
            return false;
        }
        self.push(key, item);
        true
    }

    /// Drain all currently coalesced items in arrival order.
    pub fn drain_ready(&mut self) -> Vec<V> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(key) = self.order.pop_front() {
            if let Some(item) = self.map.remove(&key) {
                out.push(item);
            }
        }
        out
    }
}
