//! Property-Based Tests for the Cache Module
//!
//! Uses proptest to exercise random operation sequences against the store
//! and check the accounting and coherence invariants that must survive any
//! interleaving.

use proptest::prelude::*;

use crate::cache::{CacheStore, PolicyKind};

const TEST_MAX_BYTES: u64 = 4096;

// == Strategies ==
/// Short keys over a four-byte alphabet: lots of collisions between
/// operations, and half the alphabet is not valid UTF-8.
fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::sample::select(vec![b'a', b'b', 0xfe, 0xff]), 1..3)
}

fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

fn policy_strategy() -> impl Strategy<Value = PolicyKind> {
    prop_oneof![
        Just(PolicyKind::Lru),
        Just(PolicyKind::Lfu),
        Just(PolicyKind::Random),
    ]
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Delete { key: Vec<u8> },
    Clear,
    Evict,
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        4 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        3 => key_strategy().prop_map(|key| CacheOp::Get { key }),
        2 => key_strategy().prop_map(|key| CacheOp::Delete { key }),
        1 => Just(CacheOp::Clear),
        1 => Just(CacheOp::Evict),
    ]
}

fn apply(store: &mut CacheStore, op: CacheOp) {
    match op {
        CacheOp::Set { key, value } => store.set(key, value, None),
        CacheOp::Get { key } => {
            let _ = store.get(&key);
        }
        CacheOp::Delete { key } => {
            let _ = store.delete(&key);
        }
        CacheOp::Clear => store.clear(),
        CacheOp::Evict => {
            let _ = store.evict_to_capacity();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // After any operation sequence, the aggregate byte counter equals the
    // sum of resident value lengths.
    #[test]
    fn prop_byte_accounting(
        kind in policy_strategy(),
        ops in prop::collection::vec(cache_op_strategy(), 1..60),
    ) {
        let mut store = CacheStore::new(TEST_MAX_BYTES, kind);
        for op in ops {
            apply(&mut store, op);
        }

        let actual: u64 = store
            .snapshot_entries()
            .values()
            .map(|entry| entry.value.len() as u64)
            .sum();
        prop_assert_eq!(store.size_bytes(), actual);
        prop_assert_eq!(store.count(), store.snapshot_entries().len());
    }

    // After any operation sequence, the eviction index tracks exactly the
    // store's key set, for every policy.
    #[test]
    fn prop_policy_coherence(
        kind in policy_strategy(),
        ops in prop::collection::vec(cache_op_strategy(), 1..60),
    ) {
        let mut store = CacheStore::new(TEST_MAX_BYTES, kind);
        for op in ops {
            apply(&mut store, op);
        }

        let mut expected = store.keys();
        expected.sort();
        let mut tracked = store.policy_keys();
        tracked.sort();
        prop_assert_eq!(tracked, expected);
    }

    // Hit and miss counters reflect exactly the read outcomes.
    #[test]
    fn prop_statistics_accuracy(
        ops in prop::collection::vec(cache_op_strategy(), 1..60),
    ) {
        let mut store = CacheStore::new(TEST_MAX_BYTES, PolicyKind::Lru);
        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;

        for op in ops {
            if let CacheOp::Get { key } = &op {
                match store.get(key) {
                    Some(_) => expected_hits += 1,
                    None => expected_misses += 1,
                }
            } else {
                apply(&mut store, op);
            }
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
    }

    // Storing then reading a value returns exactly the stored bytes.
    #[test]
    fn prop_roundtrip_storage(key in key_strategy(), value in value_strategy()) {
        let mut store = CacheStore::new(TEST_MAX_BYTES, PolicyKind::Lru);
        store.set(key.clone(), value.clone(), None);
        prop_assert_eq!(store.get(&key), Some(value));
    }

    // Eviction always lands the store back within its budget.
    #[test]
    fn prop_eviction_respects_budget(
        kind in policy_strategy(),
        values in prop::collection::vec((key_strategy(), value_strategy()), 1..40),
    ) {
        let mut store = CacheStore::new(256, kind);
        for (key, value) in values {
            store.set(key, value, None);
        }

        store.evict_to_capacity();
        prop_assert!(store.size_bytes() <= 256);
    }
}
