//! IngestController / PartitionHandler (C6): per-partition state machine
//! driving dual-source (base + delta) ingest and follower catch-up
//! (spec §4.5).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{self, ConfigStore};
use crate::engine::memory::MemoryEngine;
use crate::engine::StorageEngine;
use crate::layout::Layout;
use crate::meta_info::{self, MetaInfoStore, Role};
use crate::metrics;
use crate::net::{RpcTransport, ServiceDiscovery, ShardType};
use crate::partition_map;
use crate::replication::{self, ReplicateWdtRequest};

/// Bounded FIFO capacity for pending load requests (spec §4.5, §9).
pub const LOAD_QUEUE_CAPACITY: usize = 10;

/// Default wait after the last reader releases an engine before `close()`,
/// letting any operation that already dereferenced the `Arc` finish its
/// queued work (spec §4.5, §9 "Safe engine swap").
pub const DEFAULT_FINISH_WAIT: Duration = Duration::from_millis(5);

const ENGINE_SWAP_SPIN_ATTEMPTS: usize = 500;
const ENGINE_SWAP_SPIN_DELAY: Duration = Duration::from_millis(1);

/// Retire an engine that has just been replaced in `Inner`. Spins until the
/// only strong reference left is the one owned by this function, sleeps
/// `finish_wait` to let any operation that raced the swap finish against the
/// old engine, closes it, then spins until the last weak reference (held by
/// an in-flight reader that has not yet returned) drops so the caller can
/// safely reclaim the on-disk directory.
fn safe_shutdown(engine: Arc<dyn StorageEngine>, finish_wait: Duration) {
    for _ in 0..ENGINE_SWAP_SPIN_ATTEMPTS {
        if Arc::strong_count(&engine) <= 1 {
            break;
        }
        std::thread::sleep(ENGINE_SWAP_SPIN_DELAY);
    }

    std::thread::sleep(finish_wait);
    engine.close();

    let weak: Weak<dyn StorageEngine> = Arc::downgrade(&engine);
    drop(engine);
    for _ in 0..ENGINE_SWAP_SPIN_ATTEMPTS {
        if weak.upgrade().is_none() {
            return;
        }
        std::thread::sleep(ENGINE_SWAP_SPIN_DELAY);
    }
    warn!("engine outlived safe shutdown spin, a reader is still holding it");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionLoadStatus {
    BaseLoaded,
    BaseLoading,
    DeltaLoaded,
    DeltaLoading,
}

impl PartitionLoadStatus {
    fn can_swap_engine(self) -> bool {
        matches!(self, Self::BaseLoaded | Self::DeltaLoaded)
    }
}

#[derive(Debug, Clone)]
enum LoadRequest {
    Base(String),
    Delta(String, Vec<String>),
}

pub struct PartitionIdentity {
    pub db: String,
    pub table: String,
    pub partition_id: u32,
    pub partition_hash: u64,
    pub dc: String,
}

/// Server-side collaborators needed to actually run follower catch-up: the
/// same discovery/call abstractions `ClientRouter` uses on the client side,
/// injected here so this module never has to know how either capability is
/// implemented (spec §4.5, §4.6, §6.1).
pub struct ReplicationPeers {
    pub discovery: Arc<dyn ServiceDiscovery>,
    pub transport: Arc<dyn RpcTransport>,
    pub advertise_host: String,
    pub replicator_service_name: String,
    pub node_hash: i64,
    /// How long to wait for the leader to accept the `replicate_wdt` call.
    pub rpc_timeout: Duration,
    /// How long to wait for the file transfer itself, once started
    /// (`max_server_wait_time_ms + abort_timeout_ms`, spec §4.6).
    pub transfer_timeout: Duration,
}

struct Inner {
    status: PartitionLoadStatus,
    base_version: String,
    delta_versions: Vec<String>,
    engine: Arc<dyn StorageEngine>,
}

/// Owns one mounted partition's lifecycle. Engine replacement is only
/// permitted while `status` is `BaseLoaded` or `DeltaLoaded` (spec §3.4
/// invariant).
pub struct PartitionHandler {
    pub identity: PartitionIdentity,
    pub role: Mutex<meta_info::Role>,
    inner: Mutex<Inner>,
    load_queue: Mutex<VecDeque<LoadRequest>>,
    /// "Exactly-once in flight" replication gate: two plain atomics, never
    /// a mutex-guarded bool, since the completion callback may fire on the
    /// same thread that set the flag (spec §9).
    replicating: AtomicBool,
    has_delayed_retry: AtomicBool,
    peers: Mutex<Option<Arc<ReplicationPeers>>>,
    meta_info: Arc<MetaInfoStore>,
    layout: Arc<Layout>,
    finish_wait: Duration,
    /// Tuning profile version last applied to the live engine; `0` means
    /// none has been applied yet. Compared against `ConfigStore` on every
    /// reconfiguration tick.
    tuning_version: AtomicU32,
}

impl PartitionHandler {
    pub fn new(identity: PartitionIdentity, role: Role, meta_info: Arc<MetaInfoStore>, layout: Arc<Layout>) -> Self {
        Self::with_finish_wait(identity, role, meta_info, layout, DEFAULT_FINISH_WAIT)
    }

    pub fn with_finish_wait(
        identity: PartitionIdentity,
        role: Role,
        meta_info: Arc<MetaInfoStore>,
        layout: Arc<Layout>,
        finish_wait: Duration,
    ) -> Self {
        let base_version = meta_info
            .get_version(identity.partition_hash)
            .unwrap_or_else(|| meta_info::initial_version(role));
        let delta_versions = meta_info.get_delta_versions(identity.partition_hash);

        Self {
            identity,
            role: Mutex::new(role),
            inner: Mutex::new(Inner {
                status: if delta_versions.is_empty() {
                    PartitionLoadStatus::BaseLoaded
                } else {
                    PartitionLoadStatus::DeltaLoaded
                },
                base_version,
                delta_versions,
                engine: Arc::new(MemoryEngine::new()),
            }),
            load_queue: Mutex::new(VecDeque::new()),
            replicating: AtomicBool::new(false),
            has_delayed_retry: AtomicBool::new(false),
            peers: Mutex::new(None),
            meta_info,
            layout,
            finish_wait,
            tuning_version: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> PartitionLoadStatus {
        self.inner.lock().status
    }

    pub fn base_version(&self) -> String {
        self.inner.lock().base_version.clone()
    }

    pub fn delta_versions(&self) -> Vec<String> {
        self.inner.lock().delta_versions.clone()
    }

    /// Current engine handle, for dispatch. Callers hold this `Arc` only
    /// for the duration of one operation so a swap can proceed once the
    /// strong count drops back to the one held by `inner`.
    pub fn engine(&self) -> Arc<dyn StorageEngine> {
        self.inner.lock().engine.clone()
    }

    fn enqueue(&self, request: LoadRequest) {
        let mut queue = self.load_queue.lock();
        if queue.len() >= LOAD_QUEUE_CAPACITY {
            warn!(
                partition_hash = self.identity.partition_hash,
                "load queue full, dropping request"
            );
            return;
        }
        queue.push_back(request);
    }

    fn drain_queue(self: &Arc<Self>) {
        loop {
            let next = self.load_queue.lock().pop_front();
            match next {
                Some(LoadRequest::Base(version)) => self.load_base(&version),
                Some(LoadRequest::Delta(base_version, deltas)) => {
                    self.load_delta(&base_version, &deltas)
                }
                None => break,
            }
        }
    }

    /// `load_base(version)` (spec §4.5).
    pub fn load_base(self: &Arc<Self>, version: &str) {
        {
            let inner = self.inner.lock();
            if inner.base_version == version {
                drop(inner);
                self.drain_queue();
                return;
            }
            if !inner.status.can_swap_engine() {
                drop(inner);
                self.enqueue(LoadRequest::Base(version.to_string()));
                return;
            }
        }

        self.inner.lock().status = PartitionLoadStatus::BaseLoading;

        let source_file = self.layout.source_base_file_path(
            &self.identity.db,
            &self.identity.table,
            self.identity.partition_id,
            version,
        );
        if !source_file.exists() {
            warn!(?source_file, "base source file absent, aborting ingest");
            self.inner.lock().status = PartitionLoadStatus::BaseLoaded;
            self.drain_queue();
            return;
        }

        let data_dir = self.layout.database_data_dir(
            &self.identity.db,
            &self.identity.table,
            self.identity.partition_id,
            version,
        );

        let new_engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
        if !data_dir.exists() {
            if let Err(err) = new_engine.ingest_base_sst(&source_file) {
                warn!(%err, "base ingest failed");
                self.inner.lock().status = PartitionLoadStatus::BaseLoaded;
                self.drain_queue();
                return;
            }
        }

        let old_engine = {
            let mut inner = self.inner.lock();
            let old_engine = std::mem::replace(&mut inner.engine, new_engine);
            inner.base_version = version.to_string();
            inner.delta_versions.clear();
            inner.status = PartitionLoadStatus::BaseLoaded;
            old_engine
        };
        safe_shutdown(old_engine, self.finish_wait);
        self.install_version_callback();

        self.meta_info.set_version(self.identity.partition_hash, version);
        self.meta_info.set_delta_versions(self.identity.partition_hash, &[]);

        info!(partition_hash = self.identity.partition_hash, version, "base loaded");
        metrics::base_load();
        self.drain_queue();
    }

    /// `load_delta(base_version, delta_versions)` (spec §4.5).
    pub fn load_delta(self: &Arc<Self>, base_version: &str, delta_versions: &[String]) {
        {
            let inner = self.inner.lock();
            if !inner.status.can_swap_engine() {
                drop(inner);
                self.enqueue(LoadRequest::Delta(
                    base_version.to_string(),
                    delta_versions.to_vec(),
                ));
                return;
            }
            if inner.base_version != base_version {
                drop(inner);
                self.drain_queue();
                return;
            }
        }

        self.inner.lock().status = PartitionLoadStatus::DeltaLoading;

        let engine = self.engine();
        let mut applied = Vec::new();
        for version in delta_versions {
            if self.inner.lock().delta_versions.contains(version) {
                continue;
            }
            let delta_file = self.layout.source_delta_file_path(
                &self.identity.db,
                &self.identity.table,
                base_version,
                self.identity.partition_id,
                version,
            );
            if !delta_file.exists() {
                continue;
            }
            let scratch = self.layout.temp_db_path(
                &self.identity.db,
                &self.identity.table,
                self.identity.partition_id,
                base_version,
                version,
            );
            let result = engine.ingest_delta_sst(&delta_file, &scratch);
            let _ = std::fs::remove_dir_all(&scratch);
            if result.is_ok() {
                applied.push(version.clone());
            }
        }

        {
            let mut inner = self.inner.lock();
            inner.delta_versions.extend(applied);
            inner.status = PartitionLoadStatus::DeltaLoaded;
        }
        self.meta_info
            .set_delta_versions(self.identity.partition_hash, &self.delta_versions());

        info!(
            partition_hash = self.identity.partition_hash,
            deltas = ?self.delta_versions(),
            "delta loaded"
        );
        metrics::delta_load();
        self.drain_queue();
    }

    /// Reopens the engine in place when the table's tuning profile has
    /// moved to a new version, reusing the same `base_version` and
    /// `delta_versions` (spec §4.5 "Live-reconfiguration of engine
    /// tuning"). A no-op while a load is in flight; the next tick catches
    /// up once the partition returns to `BaseLoaded`/`DeltaLoaded`. The
    /// reference engine ignores the tuning options themselves, since
    /// applying them is the opaque real engine's responsibility; this
    /// exercises the reopen/swap sequence around that boundary.
    pub fn reconcile_tuning(self: &Arc<Self>, config: &ConfigStore) {
        let Some(schema) = config.table_schema(&self.identity.db, &self.identity.table) else {
            return;
        };
        let Some(profile) = config.tuning_for_table(&schema.tuning_profile) else {
            return;
        };
        if self.tuning_version.load(Ordering::Acquire) == profile.version {
            return;
        }

        let old_engine = {
            let mut inner = self.inner.lock();
            if !inner.status.can_swap_engine() {
                return;
            }
            let new_engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
            std::mem::replace(&mut inner.engine, new_engine)
        };
        safe_shutdown(old_engine, self.finish_wait);
        self.install_version_callback();

        self.tuning_version.store(profile.version, Ordering::Release);
        metrics::tuning_reopen();
        info!(
            partition_hash = self.identity.partition_hash,
            version = profile.version,
            "engine reopened with new tuning profile"
        );
    }

    /// Entered when the engine's `on_version_update` callback fires for a
    /// FOLLOWER partition. Returns `false` without acting if replication is
    /// already in flight (spec §4.5 "Leader-follower catch-up", §9
    /// "exactly-once in flight").
    pub fn begin_catch_up(&self) -> bool {
        if *self.role.lock() != Role::Follower {
            return false;
        }
        let started = self
            .replicating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            metrics::replication_attempt();
        }
        started
    }

    /// Called from the replication completion callback, regardless of
    /// outcome. Both flags are cleared here, never held across awaits
    /// elsewhere (spec §9).
    pub fn end_catch_up(&self, succeeded: bool) {
        self.replicating.store(false, Ordering::Release);
        if succeeded {
            metrics::replication_success();
        } else {
            self.has_delayed_retry.store(true, Ordering::Release);
            metrics::replication_failure();
        }
    }

    pub fn take_delayed_retry(&self) -> bool {
        self.has_delayed_retry
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_replicating(&self) -> bool {
        self.replicating.load(Ordering::Acquire)
    }

    pub fn set_role(&self, role: Role) {
        *self.role.lock() = role;
    }

    /// Configures the discovery/RPC collaborators catch-up needs to reach
    /// the leader. Without this set, a version-update callback still flips
    /// the `replicating` flag but has nothing to do, logs, and clears it.
    pub fn set_replication_peers(&self, peers: Arc<ReplicationPeers>) {
        *self.peers.lock() = Some(peers);
    }

    /// Registers the current engine's `on_version_update` callback. Must
    /// be called once the handler is held behind an `Arc` (construction
    /// itself only has `Self`) and again every time the engine is swapped,
    /// since swapping installs a fresh engine instance with no callback of
    /// its own.
    pub fn install_version_callback(self: &Arc<Self>) {
        let engine = self.inner.lock().engine.clone();
        let weak = Arc::downgrade(self);
        engine.on_version_update(Box::new(move |db_hash, version| {
            if let Some(handler) = weak.upgrade() {
                handler.on_engine_version_update(db_hash, version);
            }
        }));
    }

    fn on_engine_version_update(self: &Arc<Self>, db_hash: i64, version: String) {
        self.trigger_replication(db_hash, version);
    }

    /// Starts follower catch-up for `version` if one isn't already in
    /// flight, running it on a spawned task. Returns whether it started.
    /// Shared by the engine's version-update callback and the manual
    /// `POST /update/base_replication` control-plane endpoint, which forces
    /// a re-pull of the current base version (spec §4.10).
    pub fn trigger_replication(self: &Arc<Self>, db_hash: i64, version: String) -> bool {
        if !self.begin_catch_up() {
            return false;
        }
        let handler = self.clone();
        tokio::spawn(async move {
            handler.run_catch_up(db_hash, version).await;
        });
        true
    }

    /// The full leader-follower catch-up sequence (spec §4.5 "Leader-follower
    /// catch-up"): bind a receiver, ask the leader to push to it, wait for
    /// the transfer, then swap the on-disk directory and engine in. Always
    /// ends by clearing the `replicating` flag via `end_catch_up`.
    async fn run_catch_up(self: Arc<Self>, db_hash: i64, version: String) {
        let Some(peers) = self.peers.lock().clone() else {
            warn!(
                partition_hash = self.identity.partition_hash,
                "catch-up triggered with no replication peers configured"
            );
            self.end_catch_up(false);
            return;
        };

        let started_base_version = self.base_version();

        let replicating_dir = self.layout.database_data_replicating_dir(
            &self.identity.db,
            &self.identity.table,
            self.identity.partition_id,
            &version,
        );
        let _ = std::fs::remove_dir_all(&replicating_dir);

        let receiver = match replication::Receiver::bind(&replicating_dir, &peers.advertise_host).await {
            Ok(receiver) => receiver,
            Err(err) => {
                warn!(%err, "failed to bind replication receiver");
                self.end_catch_up(false);
                return;
            }
        };
        let connect_url = receiver.connect_url().to_string();

        let source_shard_number = config::store().shard_number(&self.identity.dc);
        let Some(src_shard_id) = partition_map::src_shard_id(self.identity.partition_hash, source_shard_number) else {
            warn!(dc = %self.identity.dc, "no shard number configured for dc, cannot locate leader");
            replication::log_abort(&connect_url, "no source shard number");
            self.end_catch_up(false);
            return;
        };

        let addrs = peers
            .discovery
            .find_by_shard(&peers.replicator_service_name, src_shard_id, ShardType::Leader)
            .await;
        let Some(leader_addr) = addrs.first().copied() else {
            warn!(src_shard_id, "no leader found via service discovery");
            replication::log_abort(&connect_url, "no leader discovered");
            self.end_catch_up(false);
            return;
        };

        let request = ReplicateWdtRequest {
            connect_url: connect_url.clone(),
            db_hash,
            version: version.clone(),
            node_hash: peers.node_hash,
        };
        let payload = serde_json::to_vec(&request).unwrap_or_default();
        if let Err(err) = peers
            .transport
            .call(leader_addr, "replicate_wdt", payload, peers.rpc_timeout)
            .await
        {
            warn!(%err, "replicate_wdt RPC failed");
            replication::log_abort(&connect_url, "rpc failed");
            self.end_catch_up(false);
            return;
        }

        let completion = receiver.receive(&self.identity.db, &version, peers.transfer_timeout).await;
        if let Some(err) = completion.error {
            warn!(err, "replication transfer failed");
            replication::log_abort(&connect_url, "transfer failed");
            self.end_catch_up(false);
            return;
        }

        if self.base_version() != started_base_version {
            info!(
                partition_hash = self.identity.partition_hash,
                "base version changed during catch-up, discarding replicated data"
            );
            let _ = std::fs::remove_dir_all(&replicating_dir);
            self.end_catch_up(true);
            return;
        }

        let data_dir = self.layout.database_data_dir(
            &self.identity.db,
            &self.identity.table,
            self.identity.partition_id,
            &version,
        );
        let deleting_dir = self.layout.database_data_deleting_dir(
            &self.identity.db,
            &self.identity.table,
            self.identity.partition_id,
            &version,
        );

        let new_engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
        let old_engine = {
            let mut inner = self.inner.lock();
            let old_engine = std::mem::replace(&mut inner.engine, new_engine);
            inner.base_version = version.clone();
            inner.delta_versions.clear();
            old_engine
        };
        safe_shutdown(old_engine, self.finish_wait);

        let _ = std::fs::remove_dir_all(&deleting_dir);
        if data_dir.exists() {
            let _ = std::fs::rename(&data_dir, &deleting_dir);
        }
        if let Some(parent) = data_dir.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = std::fs::rename(&replicating_dir, &data_dir);

        self.install_version_callback();

        self.meta_info.set_version(self.identity.partition_hash, &version);
        self.meta_info.set_delta_versions(self.identity.partition_hash, &[]);

        let cleanup_dir = deleting_dir.clone();
        tokio::spawn(async move {
            let _ = tokio::fs::remove_dir_all(&cleanup_dir).await;
        });

        info!(
            partition_hash = self.identity.partition_hash,
            version, "follower catch-up complete"
        );
        self.end_catch_up(true);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn handler(layout: Arc<Layout>) -> Arc<PartitionHandler> {
        Arc::new(PartitionHandler::new(
            PartitionIdentity {
                db: "t".into(),
                table: "u".into(),
                partition_id: 1,
                partition_hash: 42,
                dc: "dc1".into(),
            },
            Role::Leader,
            Arc::new(MetaInfoStore::new()),
            layout,
        ))
    }

    #[test]
    fn starts_base_loaded_with_default_version() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let handler = handler(layout);
        assert_eq!(handler.status(), PartitionLoadStatus::BaseLoaded);
        assert_eq!(handler.base_version(), "default");
    }

    #[test]
    fn load_base_with_missing_source_aborts_back_to_loaded() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let handler = handler(layout);
        handler.load_base("v1");
        assert_eq!(handler.status(), PartitionLoadStatus::BaseLoaded);
        assert_eq!(handler.base_version(), "default");
    }

    #[test]
    fn load_base_new_version_safely_swaps_engine() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        for version in ["v1", "v2"] {
            let source = layout.source_base_file_path("t", "u", 1, version);
            std::fs::create_dir_all(source.parent().unwrap()).unwrap();
            std::fs::write(&source, b"sst").unwrap();
        }

        let handler = Arc::new(PartitionHandler::with_finish_wait(
            PartitionIdentity {
                db: "t".into(),
                table: "u".into(),
                partition_id: 1,
                partition_hash: 42,
                dc: "dc1".into(),
            },
            Role::Leader,
            Arc::new(MetaInfoStore::new()),
            layout,
            Duration::from_millis(1),
        ));
        handler.load_base("v1");
        let first = Arc::as_ptr(&handler.engine());
        handler.load_base("v2");
        let second = Arc::as_ptr(&handler.engine());
        assert_ne!(first, second);
        assert_eq!(handler.base_version(), "v2");
    }

    #[test]
    fn load_base_ingests_when_source_present() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let source = layout.source_base_file_path("t", "u", 1, "v1");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"sst").unwrap();

        let handler = handler(layout);
        handler.load_base("v1");
        assert_eq!(handler.base_version(), "v1");
        assert_eq!(handler.status(), PartitionLoadStatus::BaseLoaded);
        assert!(handler.delta_versions().is_empty());
    }

    #[test]
    fn repeated_load_base_same_version_is_noop() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let source = layout.source_base_file_path("t", "u", 1, "v1");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(&source, b"sst").unwrap();

        let handler = handler(layout);
        handler.load_base("v1");
        let engine_before = Arc::as_ptr(&handler.engine());
        handler.load_base("v1");
        let engine_after = Arc::as_ptr(&handler.engine());
        assert_eq!(engine_before, engine_after);
    }

    #[test]
    fn delta_with_mismatched_base_is_dropped() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let handler = handler(layout);
        handler.load_delta("not-the-base", &["d1".to_string()]);
        assert!(handler.delta_versions().is_empty());
        assert_eq!(handler.status(), PartitionLoadStatus::BaseLoaded);
    }

    #[test]
    fn load_delta_applies_present_versions_only() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let delta_file = layout.source_delta_file_path("t", "u", "default", 1, "d1");
        std::fs::create_dir_all(delta_file.parent().unwrap()).unwrap();
        std::fs::write(&delta_file, b"delta").unwrap();

        let handler = handler(layout);
        handler.load_delta("default", &["d1".to_string(), "d2".to_string()]);
        assert_eq!(handler.delta_versions(), vec!["d1"]);
        assert_eq!(handler.status(), PartitionLoadStatus::DeltaLoaded);
    }

    #[test]
    fn reconcile_tuning_reopens_engine_on_version_bump() {
        use crate::config::ConfigStore;

        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let handler = handler(layout);

        let config = ConfigStore::default();
        config.update_schema(
            &serde_json::json!({
                "databases": [{
                    "name": "t",
                    "tables": [{"name": "u", "partition_number": 10, "tuning_profile": "hot"}]
                }]
            })
            .to_string(),
        );
        config.update_table_config(
            &serde_json::json!({"profiles": {"hot": {"version": 1}}}).to_string(),
        );

        let before = Arc::as_ptr(&handler.engine());
        handler.reconcile_tuning(&config);
        let after_first = Arc::as_ptr(&handler.engine());
        assert_eq!(before, after_first, "same version is a no-op");

        config.update_table_config(
            &serde_json::json!({"profiles": {"hot": {"version": 2}}}).to_string(),
        );
        handler.reconcile_tuning(&config);
        let after_second = Arc::as_ptr(&handler.engine());
        assert_ne!(after_first, after_second);
    }

    #[test]
    fn catch_up_flag_prevents_reentry() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let handler = handler(layout);
        handler.set_role(Role::Follower);
        assert!(handler.begin_catch_up());
        assert!(!handler.begin_catch_up());
        handler.end_catch_up(true);
        assert!(handler.begin_catch_up());
    }

    use std::net::SocketAddr;

    struct LeaderDiscovery {
        addr: SocketAddr,
    }

    #[async_trait::async_trait]
    impl ServiceDiscovery for LeaderDiscovery {
        async fn find_by_shard(&self, _service: &str, _shard_id: u32, _shard_type: crate::net::ShardType) -> Vec<SocketAddr> {
            vec![self.addr]
        }
        async fn find_by_partition(&self, _service: &str, _partition_hash: u64, _shard_type: crate::net::ShardType) -> Vec<SocketAddr> {
            Vec::new()
        }
    }

    /// Replies to `replicate_wdt` by spawning a sender that streams
    /// `source_dir`'s contents to whatever `connect_url` the request names.
    struct SendingTransport {
        source_dir: std::path::PathBuf,
    }

    #[async_trait::async_trait]
    impl RpcTransport for SendingTransport {
        async fn call(
            &self,
            _addr: SocketAddr,
            _operation: &str,
            payload: Vec<u8>,
            _timeout: Duration,
        ) -> crate::error::Result<Vec<u8>> {
            let request: ReplicateWdtRequest = serde_json::from_slice(&payload).unwrap();
            let source_dir = self.source_dir.clone();
            tokio::spawn(async move {
                let _ = replication::send(&request.connect_url, &source_dir, Duration::from_secs(5)).await;
            });
            Ok(Vec::new())
        }
    }

    fn test_peers(source_dir: &std::path::Path) -> Arc<ReplicationPeers> {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        Arc::new(ReplicationPeers {
            discovery: Arc::new(LeaderDiscovery { addr }),
            transport: Arc::new(SendingTransport {
                source_dir: source_dir.to_path_buf(),
            }),
            advertise_host: "127.0.0.1".to_string(),
            replicator_service_name: "laser-replicator".to_string(),
            node_hash: 7,
            rpc_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test]
    async fn follower_catch_up_pulls_data_from_leader() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let handler = Arc::new(PartitionHandler::with_finish_wait(
            PartitionIdentity {
                db: "t".into(),
                table: "u".into(),
                partition_id: 1,
                partition_hash: 42,
                dc: "dc1".into(),
            },
            Role::Follower,
            Arc::new(MetaInfoStore::new()),
            layout,
            Duration::from_millis(1),
        ));

        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.sst"), b"data").unwrap();
        handler.set_replication_peers(test_peers(source.path()));

        config::store().update_cluster(
            &serde_json::json!({
                "data_centers": [{"name": "dc1", "shard_number": 3}],
                "groups": []
            })
            .to_string(),
        );

        assert!(handler.begin_catch_up());
        handler.clone().run_catch_up(99, "v2".to_string()).await;

        assert_eq!(handler.base_version(), "v2");
        assert!(!handler.is_replicating());
    }

    #[tokio::test]
    async fn catch_up_with_no_peers_configured_aborts_cleanly() {
        let dir = tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let handler = Arc::new(PartitionHandler::with_finish_wait(
            PartitionIdentity {
                db: "t".into(),
                table: "u".into(),
                partition_id: 1,
                partition_hash: 42,
                dc: "dc1".into(),
            },
            Role::Follower,
            Arc::new(MetaInfoStore::new()),
            layout,
            Duration::from_millis(1),
        ));

        assert!(handler.begin_catch_up());
        handler.clone().run_catch_up(1, "v2".to_string()).await;

        assert!(!handler.is_replicating());
        assert_eq!(handler.base_version(), "default");
        assert!(handler.take_delayed_retry());
    }
}
