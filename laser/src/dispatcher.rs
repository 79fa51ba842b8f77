//! RequestDispatcher / LaserService (C9): the single- and multi-key
//! request pipeline that sits between the wire protocol (out of scope)
//! and a partition's engine.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ConfigStore;
use crate::engine::{StorageEngine, Value};
use crate::error::{Error, Result};
use crate::key;
use crate::partition_map;
use crate::partition_table::PartitionTable;
use crate::traffic_limiter::TrafficLimiter;

/// Aggregate status of a multi-key batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Ok,
    PartFailed,
    Error,
}

pub struct Dispatcher<'a> {
    partitions: Arc<PartitionTable>,
    config: &'a ConfigStore,
    limiter: TrafficLimiter,
}

impl<'a> Dispatcher<'a> {
    pub fn new(partitions: Arc<PartitionTable>, config: &'a ConfigStore) -> Self {
        Self {
            partitions,
            config,
            limiter: TrafficLimiter::new(),
        }
    }

    fn partition_number(&self, db: &str, table: &str) -> Result<u32> {
        self.config
            .table_schema(db, table)
            .map(|schema| schema.partition_number)
            .ok_or(Error::NoPartition)
    }

    fn engine_for_key(&self, db: &str, table: &str, key: &[u8], partition_number: u32) -> Result<Arc<dyn StorageEngine>> {
        self.partitions
            .get_partition_engine(db, table, &[key], partition_number)
            .ok_or(Error::NoPartition)
    }

    fn partition_hash_for_key(&self, db: &str, table: &str, key: &[u8], partition_number: u32) -> u64 {
        let key_hash = key::key_hash([key]);
        let partition_id = partition_map::partition_id(db, table, key_hash, partition_number);
        partition_map::partition_hash(db, table, partition_id)
    }

    /// Single-key pipeline: partition lookup, traffic-restriction check,
    /// engine call (error translation is the engine trait's own
    /// `Result<_, Error>` surface).
    fn single<T>(
        &self,
        db: &str,
        table: &str,
        operation: &str,
        key: &[u8],
        f: impl FnOnce(&dyn StorageEngine) -> Result<T>,
    ) -> Result<T> {
        let partition_number = self.partition_number(db, table)?;
        let engine = self.engine_for_key(db, table, key, partition_number)?;
        if !self.limiter.check_single(self.config, db, table, operation) {
            return Err(Error::RateLimited);
        }
        f(engine.as_ref())
    }

    pub fn get(&self, db: &str, table: &str, key: &[u8]) -> Result<Option<Value>> {
        self.single(db, table, "get", key, |e| e.get(key))
    }

    pub fn set(&self, db: &str, table: &str, key: &[u8], data: Vec<u8>) -> Result<()> {
        self.single(db, table, "sset", key, |e| e.set(key, data))
    }

    pub fn delkey(&self, db: &str, table: &str, key: &[u8]) -> Result<()> {
        self.single(db, table, "delkey", key, |e| e.delkey(key))
    }

    pub fn expire(&self, db: &str, table: &str, key: &[u8], ttl_ms: u64) -> Result<()> {
        self.single(db, table, "expire", key, |e| e.expire(key, ttl_ms))
    }

    pub fn incr(&self, db: &str, table: &str, key: &[u8]) -> Result<i64> {
        self.single(db, table, "incr", key, |e| e.incrby(key, 1))
    }

    pub fn decr(&self, db: &str, table: &str, key: &[u8]) -> Result<i64> {
        self.single(db, table, "decr", key, |e| e.decrby(key, 1))
    }

    pub fn hget(&self, db: &str, table: &str, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        self.single(db, table, "hget", key, |e| e.hget(key, field))
    }

    pub fn hset(&self, db: &str, table: &str, key: &[u8], field: &[u8], value: Vec<u8>) -> Result<()> {
        self.single(db, table, "hset", key, |e| e.hset(key, field, value))
    }

    pub fn sadd(&self, db: &str, table: &str, key: &[u8], member: Vec<u8>) -> Result<()> {
        self.single(db, table, "sadd", key, |e| e.sadd(key, member))
    }

    pub fn zadd(&self, db: &str, table: &str, key: &[u8], member: Vec<u8>, score: i64) -> Result<()> {
        self.single(db, table, "zadd", key, |e| e.zadd(key, member, score))
    }

    /// Multi-key pipeline: group keys by destination engine, execute each
    /// group as a batch, reassemble in input order, and aggregate status
    /// (`KEY_EXPIRE` and success both count as non-failure).
    fn multi<T>(
        &self,
        db: &str,
        table: &str,
        operation: &str,
        keys: &[&[u8]],
        f: impl Fn(&dyn StorageEngine, &[u8]) -> Result<T>,
    ) -> (BatchStatus, Vec<Result<T>>) {
        if !self.limiter.check_multi(self.config, db, table, operation) {
            return (
                BatchStatus::Error,
                keys.iter().map(|_| Err(Error::RateLimited)).collect(),
            );
        }

        let partition_number = match self.partition_number(db, table) {
            Ok(n) => n,
            Err(err) => return (BatchStatus::Error, keys.iter().map(|_| Err(err)).collect()),
        };

        let mut groups: HashMap<u64, Vec<usize>> = HashMap::new();
        for (idx, key) in keys.iter().enumerate() {
            let partition_hash = self.partition_hash_for_key(db, table, key, partition_number);
            groups.entry(partition_hash).or_default().push(idx);
        }

        let mut results: Vec<Option<Result<T>>> = (0..keys.len()).map(|_| None).collect();
        let mut any_ok = false;
        let mut any_failed = false;

        for (partition_hash, indices) in groups {
            let engine = self.partitions.handler_for(partition_hash).map(|h| h.engine());
            match engine {
                Some(engine) => {
                    for idx in indices {
                        let result = f(engine.as_ref(), keys[idx]);
                        let is_failure = result.as_ref().err().map(|e| e.counts_as_failure()).unwrap_or(false);
                        if is_failure {
                            any_failed = true;
                        } else {
                            any_ok = true;
                        }
                        results[idx] = Some(result);
                    }
                }
                None => {
                    for idx in indices {
                        any_failed = true;
                        results[idx] = Some(Err(Error::NoPartition));
                    }
                }
            }
        }

        let status = match (any_ok, any_failed) {
            (_, false) => BatchStatus::Ok,
            (true, true) => BatchStatus::PartFailed,
            (false, true) => BatchStatus::Error,
        };

        (status, results.into_iter().map(|r| r.expect("every index visited exactly once")).collect())
    }

    pub fn mget(&self, db: &str, table: &str, keys: &[&[u8]]) -> (BatchStatus, Vec<Result<Option<Value>>>) {
        self.multi(db, table, "mget", keys, |e, k| e.get(k))
    }

    pub fn mset(&self, db: &str, table: &str, entries: &[(&[u8], Vec<u8>)]) -> (BatchStatus, Vec<Result<()>>) {
        let values: HashMap<&[u8], Vec<u8>> = entries.iter().map(|(k, v)| (*k, v.clone())).collect();
        let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| *k).collect();
        self.multi(db, table, "mset", &keys, move |e, k| {
            e.set(k, values.get(k).cloned().unwrap_or_default())
        })
    }

    pub fn mdel(&self, db: &str, table: &str, keys: &[&[u8]]) -> (BatchStatus, Vec<Result<()>>) {
        self.multi(db, table, "mdel", keys, |e, k| e.delkey(k))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::Layout;
    use crate::meta_info::Role;
    use crate::partition_table::MountSpec;
    use tempfile::tempdir;

    fn schema_json() -> String {
        serde_json::json!({
            "databases": [{
                "name": "t",
                "tables": [{"name": "u", "partition_number": 4}]
            }]
        })
        .to_string()
    }

    fn setup() -> (ConfigStore, Arc<PartitionTable>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let table = Arc::new(PartitionTable::new(layout));
        let config = ConfigStore::default();
        config.update_schema(&schema_json());

        for partition_id in 0..4 {
            let partition_hash = partition_map::partition_hash("t", "u", partition_id);
            table.update_partitions(
                vec![MountSpec {
                    db: "t".into(),
                    table: "u".into(),
                    partition_id,
                    partition_hash,
                    dc: "dc1".into(),
                    role: Role::Leader,
                }],
                vec![],
            );
        }
        (config, table, dir)
    }

    #[test]
    fn single_key_round_trip() {
        let (config, table, _dir) = setup();
        let dispatcher = Dispatcher::new(table, &config);
        dispatcher.set("t", "u", b"alice", b"v1".to_vec()).unwrap();
        assert_eq!(
            dispatcher.get("t", "u", b"alice").unwrap(),
            Some(Value::Raw(b"v1".to_vec()))
        );
    }

    #[test]
    fn get_on_unknown_database_fails_no_partition() {
        let (config, table, _dir) = setup();
        let dispatcher = Dispatcher::new(table, &config);
        assert_eq!(dispatcher.get("nope", "u", b"alice").unwrap_err(), Error::NoPartition);
    }

    #[test]
    fn mset_then_mget_preserves_order_and_reports_ok() {
        let (config, table, _dir) = setup();
        let dispatcher = Dispatcher::new(table, &config);

        let entries: Vec<(&[u8], Vec<u8>)> = vec![
            (b"a".as_ref(), b"1".to_vec()),
            (b"b".as_ref(), b"2".to_vec()),
            (b"c".as_ref(), b"3".to_vec()),
        ];
        let (status, results) = dispatcher.mset("t", "u", &entries);
        assert_eq!(status, BatchStatus::Ok);
        assert!(results.iter().all(|r| r.is_ok()));

        let keys: Vec<&[u8]> = vec![b"a", b"b", b"c"];
        let (status, results) = dispatcher.mget("t", "u", &keys);
        assert_eq!(status, BatchStatus::Ok);
        assert_eq!(results[0].as_ref().unwrap(), &Some(Value::Raw(b"1".to_vec())));
        assert_eq!(results[1].as_ref().unwrap(), &Some(Value::Raw(b"2".to_vec())));
        assert_eq!(results[2].as_ref().unwrap(), &Some(Value::Raw(b"3".to_vec())));
    }

    #[test]
    fn mget_reports_error_when_table_unknown() {
        let (config, table, _dir) = setup();
        let dispatcher = Dispatcher::new(table, &config);
        let keys: Vec<&[u8]> = vec![b"a", b"b"];
        let (status, results) = dispatcher.mget("nope", "u", &keys);
        assert_eq!(status, BatchStatus::Error);
        assert!(results.iter().all(|r| r.is_err()));
    }
}
