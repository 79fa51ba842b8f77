//! MetaInfoStore (C4): persistent per-partition `{partition-hash →
//! (base-version, delta-versions)}` mapping, held in an internal engine
//! instance.

use std::sync::Arc;

use chrono::Utc;
use laser_config::util::hash_u64_pair;
use rand::Rng;

use crate::engine::memory::MemoryEngine;
use crate::engine::{StorageEngine, Value};

/// Role a partition plays, used only to pick the right "empty" version
/// seed: a leader's empty state is the literal `"default"`;
/// a follower's must never collide with that, so a catch-up is always
/// triggered on first mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

pub const DEFAULT_BASE_VERSION: &str = "default";

/// A version string that cannot equal `"default"`, for an empty follower.
pub fn empty_follower_version() -> String {
    let now = Utc::now().format("%Y%m%d%H%M%S");
    let secs = Utc::now().timestamp() as u64;
    let rand: u32 = rand::rng().random();
    let hash = hash_u64_pair(secs, rand as u64);
    format!("{now}_{hash}")
}

pub fn initial_version(role: Role) -> String {
    match role {
        Role::Leader => DEFAULT_BASE_VERSION.to_string(),
        Role::Follower => empty_follower_version(),
    }
}

fn delta_key(partition_hash: u64) -> Vec<u8> {
    format!("{partition_hash}:delta").into_bytes()
}

fn base_key(partition_hash: u64) -> Vec<u8> {
    partition_hash.to_string().into_bytes()
}

pub struct MetaInfoStore {
    engine: Arc<dyn StorageEngine>,
}

impl MetaInfoStore {
    pub fn new() -> Self {
        Self {
            engine: Arc::new(MemoryEngine::new()),
        }
    }

    pub fn get_version(&self, partition_hash: u64) -> Option<String> {
        match self.engine.get(&base_key(partition_hash)).ok()? {
            Some(Value::Raw(bytes)) => String::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn set_version(&self, partition_hash: u64, version: &str) {
        let _ = self
            .engine
            .set(&base_key(partition_hash), version.as_bytes().to_vec());
    }

    pub fn get_delta_versions(&self, partition_hash: u64) -> Vec<String> {
        match self.engine.get(&delta_key(partition_hash)) {
            Ok(Some(Value::Raw(bytes))) => String::from_utf8(bytes)
                .map(|s| {
                    s.split(',')
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn set_delta_versions(&self, partition_hash: u64, versions: &[String]) {
        let joined = versions.join(",");
        let _ = self
            .engine
            .set(&delta_key(partition_hash), joined.into_bytes());
    }

    pub fn delete_partition(&self, partition_hash: u64) {
        let _ = self.engine.delkey(&base_key(partition_hash));
        let _ = self.engine.delkey(&delta_key(partition_hash));
    }
}

impl Default for MetaInfoStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn leader_empty_version_is_default() {
        assert_eq!(initial_version(Role::Leader), DEFAULT_BASE_VERSION);
    }

    #[test]
    fn follower_empty_version_never_equals_default() {
        for _ in 0..100 {
            assert_ne!(empty_follower_version(), DEFAULT_BASE_VERSION);
        }
    }

    #[test]
    fn version_round_trips() {
        let store = MetaInfoStore::new();
        assert_eq!(store.get_version(1), None);
        store.set_version(1, "v1");
        assert_eq!(store.get_version(1), Some("v1".to_string()));
    }

    #[test]
    fn delta_versions_round_trip_ordered() {
        let store = MetaInfoStore::new();
        assert_eq!(store.get_delta_versions(1), Vec::<String>::new());
        store.set_delta_versions(1, &["d1".to_string(), "d2".to_string()]);
        assert_eq!(store.get_delta_versions(1), vec!["d1", "d2"]);
    }

    #[test]
    fn delete_partition_clears_both_keys() {
        let store = MetaInfoStore::new();
        store.set_version(1, "v1");
        store.set_delta_versions(1, &["d1".to_string()]);
        store.delete_partition(1);
        assert_eq!(store.get_version(1), None);
        assert_eq!(store.get_delta_versions(1), Vec::<String>::new());
    }
}
