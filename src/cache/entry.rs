//! Cache Entry Module
//!
//! Defines the structure of a stored record with TTL and access metadata.

use std::time::{Duration, Instant};

// == Cache Entry ==
/// A single stored record.
///
/// Timestamps are monotonic instants: they never cross the process
/// boundary, and wall-clock adjustments must not expire entries early.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored bytes; their length counts toward the capacity bound
    pub value: Vec<u8>,
    /// Expiry instant; None never expires
    pub expires_at: Option<Instant>,
    pub created_at: Instant,
    pub last_used: Instant,
    /// Incremented on every successful read
    pub use_count: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a fresh entry. A `ttl` of None means the entry never
    /// expires; replacing an existing key goes through here too, so
    /// `created_at` and `use_count` reset on overwrite.
    pub fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
            created_at: now,
            last_used: now,
            use_count: 1,
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current instant reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() >= expires_at,
            None => false,
        }
    }

    // == Touch ==
    /// Records a successful read.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
        self.use_count += 1;
    }
}
