//! Consistent Hash Ring Module
//!
//! Maps keys to node ids over a ring of 32-bit hashes. Each node
//! contributes a configured number of virtual placements so load spreads
//! evenly and membership changes remap only the keys that belonged to the
//! affected node.

use std::collections::{HashMap, HashSet};

use sha1::{Digest, Sha1};

// == Hash Ring ==
/// Sorted set of 32-bit placement hashes mapping to node ids.
///
/// Not safe for concurrent mutation; callers serialize updates against
/// reads through the cluster lock.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Placement hash → owning node id
    nodes: HashMap<u32, String>,
    /// Placement hashes in strictly ascending order
    sorted_hashes: Vec<u32>,
    virtual_nodes: usize,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            sorted_hashes: Vec::new(),
            virtual_nodes,
        }
    }

    // == Membership ==
    /// Inserts the node's virtual placements, named `<id>:<i>`.
    /// Hash collisions resolve last-write-wins in the placement map.
    pub fn add_node(&mut self, id: &str) {
        for i in 0..self.virtual_nodes {
            let hash = Self::hash_key(&format!("{id}:{i}"));
            self.nodes.insert(hash, id.to_string());
            self.sorted_hashes.push(hash);
        }
        self.sorted_hashes.sort_unstable();
        self.sorted_hashes.dedup();
    }

    /// Removes the node's virtual placements.
    pub fn remove_node(&mut self, id: &str) {
        for i in 0..self.virtual_nodes {
            let hash = Self::hash_key(&format!("{id}:{i}"));
            self.nodes.remove(&hash);
            if let Ok(idx) = self.sorted_hashes.binary_search(&hash) {
                self.sorted_hashes.remove(idx);
            }
        }
    }

    // == Lookup ==
    /// The node owning the first placement at or after the key's hash,
    /// wrapping to the start of the ring. None on an empty ring.
    pub fn get_node(&self, key: &str) -> Option<&str> {
        if self.sorted_hashes.is_empty() {
            return None;
        }

        let hash = Self::hash_key(key);
        let mut idx = self.sorted_hashes.partition_point(|&h| h < hash);
        if idx == self.sorted_hashes.len() {
            idx = 0;
        }

        self.nodes
            .get(&self.sorted_hashes[idx])
            .map(String::as_str)
    }

    /// Walks clockwise from the key's position collecting up to `count`
    /// distinct node ids; fewer when the ring holds fewer distinct nodes.
    /// The walk is stable: the same key always yields the same prefix.
    pub fn get_nodes(&self, key: &str, count: usize) -> Vec<String> {
        if self.sorted_hashes.is_empty() || count == 0 {
            return Vec::new();
        }

        let hash = Self::hash_key(key);
        let start = self.sorted_hashes.partition_point(|&h| h < hash);

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for step in 0..self.sorted_hashes.len() {
            let idx = (start + step) % self.sorted_hashes.len();
            let id = &self.nodes[&self.sorted_hashes[idx]];
            if seen.insert(id.clone()) {
                result.push(id.clone());
                if result.len() == count {
                    break;
                }
            }
        }
        result
    }

    /// Distinct node ids currently placed on the ring.
    pub fn node_ids(&self) -> Vec<String> {
        let unique: HashSet<&String> = self.nodes.values().collect();
        unique.into_iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_hashes.is_empty()
    }

    // == Hashing ==
    /// First four bytes of SHA-1 over the key, big-endian. 32 bits keeps
    /// the search cheap; collision risk stays negligible up to thousands
    /// of physical nodes at the default placement count.
    fn hash_key(key: &str) -> u32 {
        let digest = Sha1::digest(key.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}
