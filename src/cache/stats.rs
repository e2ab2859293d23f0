//! Cache Statistics Module
//!
//! Tracks keyspace hits/misses and the outcomes of maintenance passes.

use serde::Serialize;

// == Cache Stats ==
/// Counters the cache core increments; read by INFO and the metrics
/// endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Successful reads
    pub hits: u64,
    /// Reads of absent or expired keys
    pub misses: u64,
    /// Entries removed by the eviction policy
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expired: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// hits / (hits + misses), or 0.0 before any reads.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expired(&mut self) {
        self.expired += 1;
    }
}
