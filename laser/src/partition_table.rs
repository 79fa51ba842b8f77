//! PartitionTable / DatabaseManager (C8): owns every partition mounted on
//! this node, reacts to config changes, and routes requests to a
//! partition's engine.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::info;

use crate::config::ConfigStore;
use crate::engine::{Property, StorageEngine};
use crate::ingest::{PartitionHandler, PartitionIdentity, ReplicationPeers};
use crate::key;
use crate::layout::Layout;
use crate::meta_info::{MetaInfoStore, Role};
use crate::partition_map;

/// A table's set of mounted partitions, grouped so a config-driven
/// operation like `trigger_base` can fan out to every partition of one
/// table without the caller enumerating partition hashes itself.
#[derive(Default)]
pub struct TableMonitor {
    partition_hashes: Mutex<Vec<u64>>,
}

impl TableMonitor {
    fn add(&self, partition_hash: u64) {
        let mut hashes = self.partition_hashes.lock();
        if !hashes.contains(&partition_hash) {
            hashes.push(partition_hash);
        }
    }

    fn remove(&self, partition_hash: u64) {
        self.partition_hashes.lock().retain(|h| *h != partition_hash);
    }

    fn partition_hashes(&self) -> Vec<u64> {
        self.partition_hashes.lock().clone()
    }
}

/// One partition's placement instructions, as resolved by config.
pub struct MountSpec {
    pub db: String,
    pub table: String,
    pub partition_id: u32,
    pub partition_hash: u64,
    pub dc: String,
    pub role: Role,
}

pub struct PartitionTable {
    partitions: DashMap<u64, Arc<PartitionHandler>>,
    table_monitors: DashMap<(String, String), Arc<TableMonitor>>,
    unavailable_shards: Mutex<HashSet<u32>>,
    meta_info: Arc<MetaInfoStore>,
    layout: Arc<Layout>,
    ready: Notify,
    service_addr: Mutex<Option<SocketAddr>>,
    monitor_enabled: AtomicBool,
    finish_wait: Mutex<Duration>,
    replication_peers: Mutex<Option<Arc<ReplicationPeers>>>,
}

impl PartitionTable {
    pub fn new(layout: Arc<Layout>) -> Self {
        Self {
            partitions: DashMap::new(),
            table_monitors: DashMap::new(),
            unavailable_shards: Mutex::new(HashSet::new()),
            meta_info: Arc::new(MetaInfoStore::new()),
            layout,
            ready: Notify::new(),
            service_addr: Mutex::new(None),
            monitor_enabled: AtomicBool::new(true),
            finish_wait: Mutex::new(crate::ingest::DEFAULT_FINISH_WAIT),
            replication_peers: Mutex::new(None),
        }
    }

    /// Overrides the wait each partition observes between the last reader
    /// releasing an engine and closing it, normally sourced from
    /// `finish_rocksdb_processing_operation_time_ms` in the static config.
    pub fn set_finish_wait(&self, finish_wait: Duration) {
        *self.finish_wait.lock() = finish_wait;
    }

    /// Configures the discovery/RPC collaborators every partition mounted
    /// from this point on will use for follower catch-up. Applied to
    /// already-mounted partitions too, so it can be set once the serving
    /// layer knows its advertise host even if partitions mounted earlier.
    pub fn set_replication_peers(&self, peers: Arc<ReplicationPeers>) {
        *self.replication_peers.lock() = Some(peers.clone());
        for entry in self.partitions.iter() {
            entry.value().set_replication_peers(peers.clone());
        }
    }

    fn table_monitor(&self, db: &str, table: &str) -> Arc<TableMonitor> {
        self.table_monitors
            .entry((db.to_string(), table.to_string()))
            .or_insert_with(|| Arc::new(TableMonitor::default()))
            .clone()
    }

    /// Releases `update_partitions`' deferred shard advertisement. Called
    /// once the serving layer has bound its actual listening address
    /// (start-up coordination).
    pub fn set_service_server(&self, addr: SocketAddr) {
        *self.service_addr.lock() = Some(addr);
        self.ready.notify_waiters();
        info!(%addr, "service server bound, shard advertisement unblocked");
    }

    /// Resolves once `set_service_server` has been called, for callers
    /// that must defer shard advertisement until the listen address is
    /// known (start-up coordination).
    pub async fn wait_until_ready(&self) {
        if self.service_addr.lock().is_some() {
            return;
        }
        self.ready.notified().await;
    }

    pub fn update_partitions(&self, mounts: Vec<MountSpec>, unmounts: Vec<u64>) {
        for mount in mounts {
            let monitor = self.table_monitor(&mount.db, &mount.table);
            let handler = Arc::new(PartitionHandler::with_finish_wait(
                PartitionIdentity {
                    db: mount.db,
                    table: mount.table,
                    partition_id: mount.partition_id,
                    partition_hash: mount.partition_hash,
                    dc: mount.dc,
                },
                mount.role,
                self.meta_info.clone(),
                self.layout.clone(),
                *self.finish_wait.lock(),
            ));
            handler.install_version_callback();
            if let Some(peers) = self.replication_peers.lock().clone() {
                handler.set_replication_peers(peers);
            }
            monitor.add(mount.partition_hash);
            self.partitions.insert(mount.partition_hash, handler);
        }

        for partition_hash in unmounts {
            if let Some((_, handler)) = self.partitions.remove(&partition_hash) {
                for entry in self.table_monitors.iter() {
                    if entry
                        .value()
                        .partition_hashes()
                        .contains(&handler.identity.partition_hash)
                    {
                        entry.value().remove(partition_hash);
                    }
                }
            }
        }
    }

    /// `get_partition_engine(db, table, key)`.
    pub fn get_partition_engine(
        &self,
        db: &str,
        table: &str,
        primary_keys: &[&[u8]],
        partition_number: u32,
    ) -> Option<Arc<dyn StorageEngine>> {
        let key_hash = key::key_hash(primary_keys.iter().copied());
        let partition_id = partition_map::partition_id(db, table, key_hash, partition_number);
        let partition_hash = partition_map::partition_hash(db, table, partition_id);
        self.partitions.get(&partition_hash).map(|h| h.engine())
    }

    pub fn handler_for(&self, partition_hash: u64) -> Option<Arc<PartitionHandler>> {
        self.partitions.get(&partition_hash).map(|h| h.clone())
    }

    pub fn trigger_base(&self, db: &str, table: &str, version: &str) {
        for partition_hash in self.table_monitor(db, table).partition_hashes() {
            if let Some(handler) = self.partitions.get(&partition_hash) {
                handler.load_base(version);
            }
        }
    }

    pub fn trigger_delta(&self, db: &str, table: &str, base_version: &str, deltas: &[String]) {
        for partition_hash in self.table_monitor(db, table).partition_hashes() {
            if let Some(handler) = self.partitions.get(&partition_hash) {
                handler.load_delta(base_version, deltas);
            }
        }
    }

    /// Forces a new replication of each partition's current base version
    /// from the leader (spec §4.10 `POST /update/base_replication`), rather
    /// than waiting for the engine to notice a newer one on its own.
    pub fn trigger_base_data_replication(&self, db: &str, table: &str) -> Vec<u64> {
        let mut triggered = Vec::new();
        for partition_hash in self.table_monitor(db, table).partition_hashes() {
            if let Some(handler) = self.partitions.get(&partition_hash) {
                let version = handler.base_version();
                if handler.clone().trigger_replication(0, version) {
                    triggered.push(partition_hash);
                }
            }
        }
        triggered
    }

    pub fn set_unavailable_shards(&self, shards: Vec<u32>) {
        *self.unavailable_shards.lock() = shards.into_iter().collect();
    }

    pub fn unavailable_shards(&self) -> HashSet<u32> {
        self.unavailable_shards.lock().clone()
    }

    pub fn monitor_switch(&self, enabled: bool) {
        self.monitor_enabled.store(enabled, Ordering::Release);
    }

    pub fn monitor_enabled(&self) -> bool {
        self.monitor_enabled.load(Ordering::Acquire)
    }

    /// Removes partitions this node no longer mounts, returning the
    /// removed partition-hash list.
    pub fn clean_unused_partitions(&self, keep: &HashSet<u64>) -> Vec<u64> {
        let to_remove: Vec<u64> = self
            .partitions
            .iter()
            .map(|entry| *entry.key())
            .filter(|hash| !keep.contains(hash))
            .collect();

        for partition_hash in &to_remove {
            self.partitions.remove(partition_hash);
            self.meta_info.delete_partition(*partition_hash);
        }
        to_remove
    }

    pub fn mounted_partitions(&self) -> Vec<u64> {
        self.partitions.iter().map(|e| *e.key()).collect()
    }

    /// `get_table_meta_info(db, table)`: aggregate sizes, read/write qps
    /// and bytes across every partition of one table.
    pub fn get_table_meta_info(&self, db: &str, table: &str) -> TableMetaInfo {
        let mut info = TableMetaInfo {
            database: db.to_string(),
            table: table.to_string(),
            partition_count: 0,
            size_bytes: 0,
            read_qps: 0,
            write_qps: 0,
            read_bytes: 0,
            write_bytes: 0,
        };

        for partition_hash in self.table_monitor(db, table).partition_hashes() {
            if let Some(handler) = self.partitions.get(&partition_hash) {
                let engine = handler.engine();
                info.size_bytes += engine.get_property(Property::SizeBytes);
                info.read_qps += engine.get_property(Property::ReadQps);
                info.write_qps += engine.get_property(Property::WriteQps);
                info.read_bytes += engine.get_property(Property::ReadBytes);
                info.write_bytes += engine.get_property(Property::WriteBytes);
                info.partition_count += 1;
            }
        }
        info
    }

    /// `get_shard_meta_info()`: aggregate sizes per shard this node
    /// serves, using each partition's own DC to resolve its shard count.
    pub fn get_shard_meta_info(&self, config: &ConfigStore) -> Vec<ShardMetaInfo> {
        let mut by_shard: HashMap<u32, ShardMetaInfo> = HashMap::new();

        for entry in self.partitions.iter() {
            let handler = entry.value();
            let shard_number = config.shard_number(&handler.identity.dc);
            let Some(shard_id) = partition_map::shard_id(handler.identity.partition_hash, shard_number) else {
                continue;
            };
            let engine = handler.engine();
            let meta = by_shard.entry(shard_id).or_insert_with(|| ShardMetaInfo {
                shard_id,
                partition_count: 0,
                size_bytes: 0,
            });
            meta.partition_count += 1;
            meta.size_bytes += engine.get_property(Property::SizeBytes);
        }

        let mut shards: Vec<ShardMetaInfo> = by_shard.into_values().collect();
        shards.sort_by_key(|s| s.shard_id);
        shards
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TableMetaInfo {
    pub database: String,
    pub table: String,
    pub partition_count: usize,
    pub size_bytes: u64,
    pub read_qps: u64,
    pub write_qps: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ShardMetaInfo {
    pub shard_id: u32,
    pub partition_count: usize,
    pub size_bytes: u64,
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn table(dir: &tempfile::TempDir) -> PartitionTable {
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        PartitionTable::new(layout)
    }

    #[test]
    fn mount_then_resolve_engine() {
        let dir = tempdir().unwrap();
        let table = table(&dir);
        let key_hash = key::key_hash(["alice".as_bytes()]);
        let partition_id = partition_map::partition_id("t", "u", key_hash, 10);
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

        let engine = table.get_partition_engine("t", "u", &[b"alice"], 10);
        assert!(engine.is_some());
    }

    #[test]
    fn unmount_removes_from_table_monitor() {
        let dir = tempdir().unwrap();
        let table = table(&dir);
        let partition_hash = partition_map::partition_hash("t", "u", 0);

        table.update_partitions(
            vec![MountSpec {
                db: "t".into(),
                table: "u".into(),
                partition_id: 0,
                partition_hash,
                dc: "dc1".into(),
                role: Role::Leader,
            }],
            vec![],
        );
        assert_eq!(table.mounted_partitions().len(), 1);

        table.update_partitions(vec![], vec![partition_hash]);
        assert_eq!(table.mounted_partitions().len(), 0);
    }

    #[test]
    fn clean_unused_partitions_keeps_only_listed() {
        let dir = tempdir().unwrap();
        let table = table(&dir);
        let partition_hash = partition_map::partition_hash("t", "u", 0);
        table.update_partitions(
            vec![MountSpec {
                db: "t".into(),
                table: "u".into(),
                partition_id: 0,
                partition_hash,
                dc: "dc1".into(),
                role: Role::Leader,
            }],
            vec![],
        );

        let removed = table.clean_unused_partitions(&HashSet::new());
        assert_eq!(removed, vec![partition_hash]);
        assert!(table.mounted_partitions().is_empty());
    }

    #[test]
    fn table_meta_info_counts_mounted_partitions() {
        let dir = tempdir().unwrap();
        let table = table(&dir);
        for partition_id in 0..3 {
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

        let info = table.get_table_meta_info("t", "u");
        assert_eq!(info.partition_count, 3);
    }

    #[test]
    fn shard_meta_info_groups_by_shard() {
        let dir = tempdir().unwrap();
        let table = table(&dir);
        let config = ConfigStore::default();
        config.update_cluster(
            &serde_json::json!({
                "data_centers": [{"name": "dc1", "shard_number": 3}],
                "groups": []
            })
            .to_string(),
        );

        for partition_id in 0..10 {
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

        let shards = table.get_shard_meta_info(&config);
        let total: usize = shards.iter().map(|s| s.partition_count).sum();
        assert_eq!(total, 10);
        assert!(shards.iter().all(|s| s.shard_id < 3));
    }

    struct LoopbackDiscovery {
        addr: SocketAddr,
    }

    #[async_trait::async_trait]
    impl crate::net::ServiceDiscovery for LoopbackDiscovery {
        async fn find_by_shard(&self, _service: &str, _shard_id: u32, _shard_type: crate::net::ShardType) -> Vec<SocketAddr> {
            vec![self.addr]
        }
        async fn find_by_partition(&self, _service: &str, _partition_hash: u64, _shard_type: crate::net::ShardType) -> Vec<SocketAddr> {
            Vec::new()
        }
    }

    struct EmptySendTransport {
        source_dir: std::path::PathBuf,
    }

    #[async_trait::async_trait]
    impl crate::net::RpcTransport for EmptySendTransport {
        async fn call(
            &self,
            _addr: SocketAddr,
            _operation: &str,
            payload: Vec<u8>,
            _timeout: Duration,
        ) -> crate::error::Result<Vec<u8>> {
            let request: crate::replication::ReplicateWdtRequest = serde_json::from_slice(&payload).unwrap();
            let source_dir = self.source_dir.clone();
            tokio::spawn(async move {
                let _ = crate::replication::send(&request.connect_url, &source_dir, Duration::from_secs(5)).await;
            });
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn manual_trigger_runs_replication_against_configured_peers() {
        let dir = tempdir().unwrap();
        let table = Arc::new(table(&dir));

        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.sst"), b"data").unwrap();
        let addr: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        table.set_replication_peers(Arc::new(ReplicationPeers {
            discovery: Arc::new(LoopbackDiscovery { addr }),
            transport: Arc::new(EmptySendTransport {
                source_dir: source.path().to_path_buf(),
            }),
            advertise_host: "127.0.0.1".to_string(),
            replicator_service_name: "laser-replicator".to_string(),
            node_hash: 1,
            rpc_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(5),
        }));

        let partition_hash = partition_map::partition_hash("t", "u", 0);
        table.update_partitions(
            vec![MountSpec {
                db: "t".into(),
                table: "u".into(),
                partition_id: 0,
                partition_hash,
                dc: "dc1".into(),
                role: Role::Follower,
            }],
            vec![],
        );

        let triggered = table.trigger_base_data_replication("t", "u");
        assert_eq!(triggered, vec![partition_hash]);

        let handler = table.handler_for(partition_hash).unwrap();
        for _ in 0..200 {
            if !handler.is_replicating() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!handler.is_replicating());
    }
}
