//! PartitionMap (C2): deterministic (db, table, key) → partition-id →
//! partition-hash → shard-id. Pure functions, independent of cluster state
//! except for the shard count they're handed.

use crate::key::hash::hash_seeded;

/// Absolute value of a hash's signed interpretation, modulo `modulus`.
/// `i64::MIN` has no positive absolute value, so it maps to 0 like the
/// rest of that residue class would.
fn abs_mod(hash: u64, modulus: u32) -> u32 {
    if modulus == 0 {
        return 0;
    }
    let signed = hash as i64;
    let abs = signed.unsigned_abs();
    (abs % modulus as u64) as u32
}

/// `partition_id(db, table, encoded_key, partition_number)`.
pub fn partition_id(db: &str, table: &str, key_hash: u64, partition_number: u32) -> u32 {
    let inner = hash_seeded(key_hash, table.as_bytes());
    let outer = hash_seeded(inner, db.as_bytes());
    abs_mod(outer, partition_number)
}

/// `partition_hash(db, table, partition_id)`.
pub fn partition_hash(db: &str, table: &str, partition_id: u32) -> u64 {
    let inner = hash_seeded(partition_id as u64, db.as_bytes());
    hash_seeded(inner, table.as_bytes())
}

/// `shard_id(partition_hash, shard_number)`. `None` if `shard_number` is
/// absent or zero.
pub fn shard_id(partition_hash: u64, shard_number: Option<u32>) -> Option<u32> {
    match shard_number {
        Some(0) | None => None,
        Some(n) => Some(abs_mod(partition_hash, n)),
    }
}

/// `src_shard_id = partition_hash mod source_dc.shard_number`, used for
/// cross-DC catch-up routing.
pub fn src_shard_id(partition_hash: u64, source_shard_number: Option<u32>) -> Option<u32> {
    shard_id(partition_hash, source_shard_number)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partition_id_is_deterministic_and_bounded() {
        for i in 0..1000u64 {
            let key_hash = hash_seeded(i, b"some-key");
            let id = partition_id("t", "u", key_hash, 10);
            assert!(id < 10);
            assert_eq!(id, partition_id("t", "u", key_hash, 10));
        }
    }

    #[test]
    fn shard_id_none_when_shard_number_absent_or_zero() {
        let hash = partition_hash("t", "u", 3);
        assert_eq!(shard_id(hash, None), None);
        assert_eq!(shard_id(hash, Some(0)), None);
    }

    #[test]
    fn shard_id_bounded_by_shard_number() {
        for partition in 0..10u32 {
            let hash = partition_hash("t", "u", partition);
            let shard = shard_id(hash, Some(3)).unwrap();
            assert!(shard < 3);
        }
    }

    // End-to-end placement scenario: partition_number=10,
    // shard_number=3, node 1 owns leader-shards {0..4}, follower-shards
    // {5..9}.
    #[test]
    fn placement_scenario_matches_shard_math() {
        for i in 0..1000u64 {
            let key_hash = hash_seeded(i, b"key");
            let pid = partition_id("t", "u", key_hash, 10);
            let phash = partition_hash("t", "u", pid);
            let shard = shard_id(phash, Some(3)).unwrap();
            assert_eq!(shard, (phash as i64).unsigned_abs() as u32 % 3);
        }
    }
}
