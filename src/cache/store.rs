//! Cache Store Module
//!
//! Byte-bounded key/value engine: a key→entry map with TTL expiry,
//! aggregate byte accounting, and an eviction index kept coherent with the
//! key set by running the policy hooks inside every mutation.

use std::collections::HashMap;
use std::time::Duration;

use crate::cache::{CacheEntry, CacheStats, EvictionPolicy, PolicyKind};

// == Cache Store ==
/// Main cache engine. Keys are raw byte strings, unique byte-for-byte.
///
/// `max_bytes` is a soft target: `set` never evicts synchronously, the
/// maintenance task reclaims space on its next wakeup. Callers observing
/// `size_bytes() > max_bytes()` between those points see expected
/// overshoot.
#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<Vec<u8>, CacheEntry>,
    /// Auxiliary order over the live keys
    policy: EvictionPolicy,
    stats: CacheStats,
    max_bytes: u64,
    /// Sum of value lengths over resident entries
    size_bytes: u64,
}

impl CacheStore {
    // == Constructor ==
    pub fn new(max_bytes: u64, policy: PolicyKind) -> Self {
        Self {
            entries: HashMap::new(),
            policy: EvictionPolicy::new(policy),
            stats: CacheStats::new(),
            max_bytes,
            size_bytes: 0,
        }
    }

    // == Get ==
    /// Returns the value if present and not expired.
    ///
    /// A read that observes an elapsed TTL removes the entry and reports a
    /// miss, indistinguishable from a never-inserted key. A hit bumps the
    /// access metadata and notifies the policy.
    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let Some(entry) = self.entries.get_mut(key) else {
            self.stats.record_miss();
            return None;
        };

        if entry.is_expired() {
            self.remove_entry(key);
            self.stats.record_expired();
            self.stats.record_miss();
            return None;
        }

        entry.touch();
        let use_count = entry.use_count;
        let value = entry.value.clone();
        self.policy.on_get(key, use_count);
        self.stats.record_hit();
        Some(value)
    }

    // == Set ==
    /// Inserts or replaces. A zero/absent TTL means the entry never
    /// expires. Replacing adjusts the byte count by the length delta and
    /// resets the entry metadata.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Option<Duration>) {
        if let Some(existing) = self.entries.get(&key) {
            self.size_bytes -= existing.value.len() as u64;
        }

        self.size_bytes += value.len() as u64;
        let entry = CacheEntry::new(value, ttl);
        let use_count = entry.use_count;
        self.entries.insert(key.clone(), entry);
        self.policy.on_set(&key, use_count);
    }

    // == Delete ==
    /// Removes an entry; returns whether it existed.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        self.remove_entry(key)
    }

    // == Clear ==
    /// Empties the store and zeros the aggregate counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.policy.on_clear();
        self.size_bytes = 0;
    }

    // == Accessors ==
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_over_capacity(&self) -> bool {
        self.size_bytes > self.max_bytes
    }

    /// Snapshot of the current key set.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.keys().cloned().collect()
    }

    /// Read-only shallow copy of the live entries.
    pub fn snapshot_entries(&self) -> HashMap<Vec<u8>, CacheEntry> {
        self.entries.clone()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Key set tracked by the eviction index; equals `keys()` after every
    /// mutation.
    pub fn policy_keys(&self) -> Vec<Vec<u8>> {
        self.policy.keys()
    }

    // == Maintenance ==
    /// Removes every entry whose TTL has elapsed. Returns how many were
    /// purged.
    pub fn purge_expired(&mut self) -> usize {
        let expired: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
            self.stats.record_expired();
        }

        expired.len()
    }

    /// Asks the policy for victims and deletes them until the byte count
    /// is back under the budget. Returns how many entries were evicted.
    pub fn evict_to_capacity(&mut self) -> usize {
        let victims = self
            .policy
            .victims(&self.entries, self.size_bytes, self.max_bytes);

        let mut evicted = 0;
        for key in victims {
            if self.remove_entry(&key) {
                self.stats.record_eviction();
                evicted += 1;
            }
        }
        evicted
    }

    fn remove_entry(&mut self, key: &[u8]) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.size_bytes -= entry.value.len() as u64;
                self.policy.on_delete(key);
                true
            }
            None => false,
        }
    }
}
