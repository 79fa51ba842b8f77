use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Static, node-local settings read once at start-up: filesystem roots,
/// cluster identity, registry names, and the handful of timing knobs that
/// govern replication and engine reconfiguration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct General {
    /// Filesystem root for on-disk data (`data/`, `source_data/`, `temp/`,
    /// `meta_info/`).
    ///
    /// _Default:_ `/var/lib/laser`
    #[serde(default = "General::data_dir")]
    pub data_dir: String,

    /// Base path on the distributed filesystem where base/delta SST files
    /// are published by the offline batch pipeline.
    ///
    /// _Default:_ `/laser`
    #[serde(default = "General::laser_hdfs_data_dir")]
    pub laser_hdfs_data_dir: String,

    /// Registry name this node serves requests under.
    ///
    /// _Default:_ `laser`
    #[serde(default = "General::service_name")]
    pub service_name: String,

    /// Registry name this node accepts replication traffic under.
    ///
    /// _Default:_ `laser_replicator`
    #[serde(default = "General::replicator_service_name")]
    pub replicator_service_name: String,

    /// Replica group this node belongs to.
    ///
    /// _Default:_ `default`
    #[serde(default = "General::group_name")]
    pub group_name: String,

    /// Node identifier, unique within `group_name`.
    ///
    /// _Default:_ `0`
    #[serde(default)]
    pub node_id: u32,

    /// Data center this node runs in; used for shard-count lookups and
    /// edge-node traffic splitting.
    ///
    /// _Default:_ `default`
    #[serde(default = "General::dc")]
    pub dc: String,

    /// Client-facing RPC port.
    ///
    /// _Default:_ `6300`
    #[serde(default = "General::port")]
    pub port: u16,

    /// HTTP control-plane port.
    ///
    /// _Default:_ `6301`
    #[serde(default = "General::http_port")]
    pub http_port: u16,

    /// Port accepting replication streams from peers.
    ///
    /// _Default:_ `6302`
    #[serde(default = "General::replicator_port")]
    pub replicator_port: u16,

    /// Worker pool size for base/delta ingestion.
    ///
    /// _Default:_ `4`
    #[serde(default = "General::loader_thread_nums")]
    pub loader_thread_nums: u32,

    /// Idle time, in milliseconds, a replication stream may sit before it's
    /// considered abandoned and torn down.
    ///
    /// _Default:_ `60000`
    #[serde(default = "General::wdt_replicator_abort_timeout_ms")]
    pub wdt_replicator_abort_timeout_ms: u64,

    /// Delay, in milliseconds, before retrying a replication attempt that
    /// errored.
    ///
    /// _Default:_ `5000`
    #[serde(default = "General::wdt_replicator_error_delay_ms")]
    pub wdt_replicator_error_delay_ms: u64,

    /// Longest a follower will wait, in milliseconds, for a leader to start
    /// streaming before giving up on one attempt.
    ///
    /// _Default:_ `30000`
    #[serde(default = "General::wdt_replicator_max_server_wait_time_ms")]
    pub wdt_replicator_max_server_wait_time_ms: u64,

    /// How often, in milliseconds, a mounted partition checks whether its
    /// tuning profile version has advanced and the engine needs reopening.
    ///
    /// _Default:_ `10000`
    #[serde(default = "General::rocksdb_options_check_interval_ms")]
    pub rocksdb_options_check_interval_ms: u64,

    /// Grace period, in milliseconds, before a superseded engine instance's
    /// directory is removed from disk.
    ///
    /// _Default:_ `60000`
    #[serde(default = "General::rocksdb_engine_destory_wait_interval_ms")]
    pub rocksdb_engine_destory_wait_interval_ms: u64,

    /// How long, in milliseconds, to wait for in-flight operations against
    /// an engine instance to drain before closing it.
    ///
    /// _Default:_ `5000`
    #[serde(default = "General::finish_rocksdb_processing_operation_time_ms")]
    pub finish_rocksdb_processing_operation_time_ms: u64,

    /// Client-side connection-pool thread count.
    ///
    /// _Default:_ `4`
    #[serde(default = "General::laser_client_thread_nums")]
    pub laser_client_thread_nums: u32,

    /// Maximum open connections a client keeps per server.
    ///
    /// _Default:_ `2`
    #[serde(default = "General::laser_client_max_conn_per_server")]
    pub laser_client_max_conn_per_server: u32,

    /// Retries on a connection-level RPC failure.
    ///
    /// _Default:_ `2`
    #[serde(default = "General::thrift_connection_retry")]
    pub thrift_connection_retry: u32,

    /// Retries on an RPC timeout.
    ///
    /// _Default:_ `1`
    #[serde(default = "General::thrift_timeout_retry")]
    pub thrift_timeout_retry: u32,
}

impl General {
    fn env_or_default<T>(name: &str, default: T) -> T
    where
        T: std::str::FromStr,
    {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn data_dir() -> String {
        Self::env_or_default("LASER_DATA_DIR", "/var/lib/laser".to_string())
    }

    fn laser_hdfs_data_dir() -> String {
        Self::env_or_default("LASER_HDFS_DATA_DIR", "/laser".to_string())
    }

    fn service_name() -> String {
        Self::env_or_default("LASER_SERVICE_NAME", "laser".to_string())
    }

    fn replicator_service_name() -> String {
        Self::env_or_default("LASER_REPLICATOR_SERVICE_NAME", "laser_replicator".to_string())
    }

    fn group_name() -> String {
        Self::env_or_default("LASER_GROUP_NAME", "default".to_string())
    }

    fn dc() -> String {
        Self::env_or_default("LASER_DC", "default".to_string())
    }

    fn port() -> u16 {
        Self::env_or_default("LASER_PORT", 6300)
    }

    fn http_port() -> u16 {
        Self::env_or_default("LASER_HTTP_PORT", 6301)
    }

    fn replicator_port() -> u16 {
        Self::env_or_default("LASER_REPLICATOR_PORT", 6302)
    }

    fn loader_thread_nums() -> u32 {
        Self::env_or_default("LASER_LOADER_THREAD_NUMS", 4)
    }

    fn wdt_replicator_abort_timeout_ms() -> u64 {
        Self::env_or_default(
            "LASER_WDT_REPLICATOR_ABORT_TIMEOUT_MS",
            Duration::from_secs(60).as_millis() as u64,
        )
    }

    fn wdt_replicator_error_delay_ms() -> u64 {
        Self::env_or_default(
            "LASER_WDT_REPLICATOR_ERROR_DELAY_MS",
            Duration::from_secs(5).as_millis() as u64,
        )
    }

    fn wdt_replicator_max_server_wait_time_ms() -> u64 {
        Self::env_or_default(
            "LASER_WDT_REPLICATOR_MAX_SERVER_WAIT_TIME_MS",
            Duration::from_secs(30).as_millis() as u64,
        )
    }

    fn rocksdb_options_check_interval_ms() -> u64 {
        Self::env_or_default(
            "LASER_ROCKSDB_OPTIONS_CHECK_INTERVAL_MS",
            Duration::from_secs(10).as_millis() as u64,
        )
    }

    fn rocksdb_engine_destory_wait_interval_ms() -> u64 {
        Self::env_or_default(
            "LASER_ROCKSDB_ENGINE_DESTORY_WAIT_INTERVAL_MS",
            Duration::from_secs(60).as_millis() as u64,
        )
    }

    fn finish_rocksdb_processing_operation_time_ms() -> u64 {
        Self::env_or_default(
            "LASER_FINISH_ROCKSDB_PROCESSING_OPERATION_TIME_MS",
            Duration::from_secs(5).as_millis() as u64,
        )
    }

    fn laser_client_thread_nums() -> u32 {
        Self::env_or_default("LASER_CLIENT_THREAD_NUMS", 4)
    }

    fn laser_client_max_conn_per_server() -> u32 {
        Self::env_or_default("LASER_CLIENT_MAX_CONN_PER_SERVER", 2)
    }

    fn thrift_connection_retry() -> u32 {
        Self::env_or_default("LASER_THRIFT_CONNECTION_RETRY", 2)
    }

    fn thrift_timeout_retry() -> u32 {
        Self::env_or_default("LASER_THRIFT_TIMEOUT_RETRY", 1)
    }

    pub fn wdt_replicator_abort_timeout(&self) -> Duration {
        Duration::from_millis(self.wdt_replicator_abort_timeout_ms)
    }

    pub fn wdt_replicator_error_delay(&self) -> Duration {
        Duration::from_millis(self.wdt_replicator_error_delay_ms)
    }

    pub fn wdt_replicator_max_server_wait_time(&self) -> Duration {
        Duration::from_millis(self.wdt_replicator_max_server_wait_time_ms)
    }

    pub fn rocksdb_options_check_interval(&self) -> Duration {
        Duration::from_millis(self.rocksdb_options_check_interval_ms)
    }

    pub fn rocksdb_engine_destory_wait_interval(&self) -> Duration {
        Duration::from_millis(self.rocksdb_engine_destory_wait_interval_ms)
    }

    pub fn finish_rocksdb_processing_operation_time(&self) -> Duration {
        Duration::from_millis(self.finish_rocksdb_processing_operation_time_ms)
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            data_dir: Self::data_dir(),
            laser_hdfs_data_dir: Self::laser_hdfs_data_dir(),
            service_name: Self::service_name(),
            replicator_service_name: Self::replicator_service_name(),
            group_name: Self::group_name(),
            node_id: 0,
            dc: Self::dc(),
            port: Self::port(),
            http_port: Self::http_port(),
            replicator_port: Self::replicator_port(),
            loader_thread_nums: Self::loader_thread_nums(),
            wdt_replicator_abort_timeout_ms: Self::wdt_replicator_abort_timeout_ms(),
            wdt_replicator_error_delay_ms: Self::wdt_replicator_error_delay_ms(),
            wdt_replicator_max_server_wait_time_ms: Self::wdt_replicator_max_server_wait_time_ms(),
            rocksdb_options_check_interval_ms: Self::rocksdb_options_check_interval_ms(),
            rocksdb_engine_destory_wait_interval_ms: Self::rocksdb_engine_destory_wait_interval_ms(),
            finish_rocksdb_processing_operation_time_ms:
                Self::finish_rocksdb_processing_operation_time_ms(),
            laser_client_thread_nums: Self::laser_client_thread_nums(),
            laser_client_max_conn_per_server: Self::laser_client_max_conn_per_server(),
            thrift_connection_retry: Self::thrift_connection_retry(),
            thrift_timeout_retry: Self::thrift_timeout_retry(),
        }
    }
}
