//! Eviction Policy Module
//!
//! The store notifies the configured policy of every read, write and
//! delete, and asks it for victims when the byte budget is exceeded. The
//! three policies are a sum type with a small dispatch rather than a trait
//! object per operation, keeping the hot path free of dynamic calls.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::cache::entry::CacheEntry;
use crate::cache::lfu::FrequencyHeap;
use crate::cache::lru::RecencyList;

// == Policy Kind ==
/// Configured policy selector; the config file value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Lru,
    Lfu,
    Random,
}

impl Default for PolicyKind {
    fn default() -> Self {
        PolicyKind::Lru
    }
}

// == Eviction Policy ==
/// Auxiliary order over the live key set. Hooks run inside the same
/// critical section as the store mutation that triggered them, so after
/// any operation the tracked key set equals the store's key set.
#[derive(Debug)]
pub enum EvictionPolicy {
    Lru(RecencyList),
    Lfu(FrequencyHeap),
    Random(RandomSet),
}

impl EvictionPolicy {
    pub fn new(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Lru => EvictionPolicy::Lru(RecencyList::new()),
            PolicyKind::Lfu => EvictionPolicy::Lfu(FrequencyHeap::new()),
            PolicyKind::Random => EvictionPolicy::Random(RandomSet::new()),
        }
    }

    // == Hooks ==
    /// Read reference.
    pub fn on_get(&mut self, key: &[u8], use_count: u64) {
        match self {
            EvictionPolicy::Lru(list) => list.touch(key),
            EvictionPolicy::Lfu(heap) => heap.update(key, use_count),
            EvictionPolicy::Random(set) => set.insert(key),
        }
    }

    /// Write reference.
    pub fn on_set(&mut self, key: &[u8], use_count: u64) {
        match self {
            EvictionPolicy::Lru(list) => list.touch(key),
            EvictionPolicy::Lfu(heap) => heap.update(key, use_count),
            EvictionPolicy::Random(set) => set.insert(key),
        }
    }

    pub fn on_delete(&mut self, key: &[u8]) {
        match self {
            EvictionPolicy::Lru(list) => list.remove(key),
            EvictionPolicy::Lfu(heap) => heap.remove(key),
            EvictionPolicy::Random(set) => set.remove(key),
        }
    }

    pub fn on_clear(&mut self) {
        match self {
            EvictionPolicy::Lru(list) => list.clear(),
            EvictionPolicy::Lfu(heap) => heap.clear(),
            EvictionPolicy::Random(set) => set.clear(),
        }
    }

    // == Victim Selection ==
    /// Ordered victim list whose removal brings the projected byte count
    /// back under `max_bytes`. Empty when already within budget. The live
    /// order is never disturbed by this query.
    pub fn victims(
        &self,
        entries: &HashMap<Vec<u8>, CacheEntry>,
        size_bytes: u64,
        max_bytes: u64,
    ) -> Vec<Vec<u8>> {
        if size_bytes <= max_bytes {
            return Vec::new();
        }

        match self {
            EvictionPolicy::Lru(list) => {
                collect_victims(list.keys_lru_first(), entries, size_bytes, max_bytes)
            }
            EvictionPolicy::Lfu(heap) => {
                // pop a copy of the heap, least-used first
                let mut copy: BinaryHeap<Reverse<(u64, &[u8])>> = heap
                    .iter_counts()
                    .map(|(key, count)| Reverse((count, key)))
                    .collect();

                let mut victims = Vec::new();
                let mut remaining = size_bytes;
                while remaining > max_bytes {
                    let Some(Reverse((_, key))) = copy.pop() else {
                        break;
                    };
                    if let Some(entry) = entries.get(key) {
                        remaining = remaining.saturating_sub(entry.value.len() as u64);
                    }
                    victims.push(key.to_vec());
                }
                victims
            }
            EvictionPolicy::Random(set) => {
                let mut keys: Vec<&[u8]> = set.iter().collect();
                keys.shuffle(&mut SmallRng::from_entropy());
                collect_victims(keys.into_iter(), entries, size_bytes, max_bytes)
            }
        }
    }

    /// Every tracked key, for coherence checks against the store.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        match self {
            EvictionPolicy::Lru(list) => list.keys(),
            EvictionPolicy::Lfu(heap) => heap.keys(),
            EvictionPolicy::Random(set) => set.iter().map(<[u8]>::to_vec).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EvictionPolicy::Lru(list) => list.len(),
            EvictionPolicy::Lfu(heap) => heap.len(),
            EvictionPolicy::Random(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collect_victims<'a>(
    order: impl Iterator<Item = &'a [u8]>,
    entries: &HashMap<Vec<u8>, CacheEntry>,
    size_bytes: u64,
    max_bytes: u64,
) -> Vec<Vec<u8>> {
    let mut victims = Vec::new();
    let mut remaining = size_bytes;
    for key in order {
        if remaining <= max_bytes {
            break;
        }
        if let Some(entry) = entries.get(key) {
            remaining = remaining.saturating_sub(entry.value.len() as u64);
        }
        victims.push(key.to_vec());
    }
    victims
}

// == Random Set ==
/// Membership index for the random policy: a vector for shuffling plus a
/// key→position map for O(1) removal by swap.
#[derive(Debug, Default)]
pub struct RandomSet {
    members: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, usize>,
}

impl RandomSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &[u8]) {
        if !self.index.contains_key(key) {
            self.index.insert(key.to_vec(), self.members.len());
            self.members.push(key.to_vec());
        }
    }

    pub fn remove(&mut self, key: &[u8]) {
        if let Some(pos) = self.index.remove(key) {
            self.members.swap_remove(pos);
            if pos < self.members.len() {
                self.index.insert(self.members[pos].clone(), pos);
            }
        }
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.members.iter().map(Vec::as_slice)
    }
}
