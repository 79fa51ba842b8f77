//! ConfigStore (C3): the subscribed configuration bundle. Holds the five
//! payloads from `laser_config`, each independently replaceable, plus
//! manual-override state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use laser_config::{
    ClusterInfo, DatabaseTableSchemaData, ManualOverrides, NodeConfigList, NodeShardList,
    RocksdbNodeConfigs, TableConfigList, TableSchema, TrafficRestrictionData,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

type PartitionCallback = Box<dyn Fn() + Send + Sync>;
type TuningCallback = Box<dyn Fn() + Send + Sync>;
type TrafficCallback = Box<dyn Fn() + Send + Sync>;

/// Snapshot of every payload, swapped atomically as a unit so a single
/// reader always sees mutually consistent data.
#[derive(Default)]
struct Payloads {
    schema: DatabaseTableSchemaData,
    cluster: ClusterInfo,
    node_config: NodeConfigList,
    rocksdb_node_config: RocksdbNodeConfigs,
    table_config: TableConfigList,
    traffic: TrafficRestrictionData,
}

/// Manual overrides for individual payloads, applied on top of `Payloads`
/// when present (`apply_manual`). `cluster` alone is gated by
/// `manual_override_enabled`; the rest apply unconditionally once set.
#[derive(Default)]
struct Overrides {
    cluster: Option<ClusterInfo>,
}

pub struct ConfigStore {
    payloads: ArcSwap<Payloads>,
    overrides: ArcSwap<Overrides>,
    manual_override_enabled: AtomicBool,
    partition_subscribers: Mutex<Vec<PartitionCallback>>,
    tuning_subscribers: Mutex<Vec<TuningCallback>>,
    traffic_subscribers: Mutex<Vec<TrafficCallback>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            payloads: ArcSwap::from_pointee(Payloads::default()),
            overrides: ArcSwap::from_pointee(Overrides::default()),
            manual_override_enabled: AtomicBool::new(false),
            partition_subscribers: Mutex::new(Vec::new()),
            tuning_subscribers: Mutex::new(Vec::new()),
            traffic_subscribers: Mutex::new(Vec::new()),
        }
    }
}

static CONFIG_STORE: Lazy<ConfigStore> = Lazy::new(ConfigStore::default);

/// Get the process-wide `ConfigStore`.
pub fn store() -> &'static ConfigStore {
    &CONFIG_STORE
}

impl ConfigStore {
    fn cluster_info(&self) -> ClusterInfo {
        if self.manual_override_enabled.load(Ordering::Acquire) {
            if let Some(cluster) = &self.overrides.load().cluster {
                return cluster.clone();
            }
        }
        self.payloads.load().cluster.clone()
    }

    pub fn table_schema(&self, db: &str, table: &str) -> Option<TableSchema> {
        self.payloads.load().schema.table(db, table).cloned()
    }

    pub fn table_schemas(&self) -> HashMap<(String, String), TableSchema> {
        self.payloads.load().schema.as_map()
    }

    pub fn shard_number(&self, dc: &str) -> Option<u32> {
        self.cluster_info().shard_number(dc)
    }

    pub fn node_shard_list(&self, group: &str, node: u32) -> Option<NodeShardList> {
        self.cluster_info().node_shard_list(group, node)
    }

    pub fn is_edge_node(&self, group: &str, node: u32) -> bool {
        self.cluster_info().is_edge_node(group, node)
    }

    pub fn traffic_restriction(&self) -> TrafficRestrictionData {
        self.payloads.load().traffic.clone()
    }

    pub fn tuning_for_table(&self, profile_name: &str) -> Option<laser_config::TuningProfile> {
        self.payloads.load().table_config.profile(profile_name).cloned()
    }

    pub fn tuning_for_node(&self, group: &str, node: u32) -> Option<laser_config::TuningProfile> {
        let payloads = self.payloads.load();
        let profile_name = payloads.node_config.profile_name(group, node)?;
        payloads.rocksdb_node_config.profile(profile_name).cloned()
    }

    pub fn subscribe_partitions(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.partition_subscribers.lock().push(Box::new(callback));
    }

    pub fn subscribe_engine_tuning(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.tuning_subscribers.lock().push(Box::new(callback));
    }

    pub fn subscribe_traffic(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.traffic_subscribers.lock().push(Box::new(callback));
    }

    fn notify_partitions(&self) {
        for callback in self.partition_subscribers.lock().iter() {
            callback();
        }
    }

    fn notify_tuning(&self) {
        for callback in self.tuning_subscribers.lock().iter() {
            callback();
        }
    }

    fn notify_traffic(&self) {
        for callback in self.traffic_subscribers.lock().iter() {
            callback();
        }
    }

    /// Parse and swap in a `database_table_schema_data` update. Malformed
    /// payloads never replace a good one.
    pub fn update_schema(&self, json: &str) {
        match DatabaseTableSchemaData::parse(json) {
            Ok(schema) => {
                let mut next = (**self.payloads.load()).clone_payloads();
                next.schema = schema;
                self.payloads.store(Arc::new(next));
                self.notify_partitions();
            }
            Err(err) => warn!(%err, "rejected malformed database_table_schema_data"),
        }
    }

    /// Parse and swap in a `cluster_info_data` update from the registry.
    /// Dropped on the floor while manual-override mode is enabled.
    pub fn update_cluster(&self, json: &str) {
        if self.manual_override_enabled.load(Ordering::Acquire) {
            debug!("cluster_info_data update ignored: manual override active");
            return;
        }
        match ClusterInfo::parse(json) {
            Ok(cluster) => {
                let mut next = (**self.payloads.load()).clone_payloads();
                next.cluster = cluster;
                self.payloads.store(Arc::new(next));
                self.notify_partitions();
            }
            Err(err) => warn!(%err, "rejected malformed cluster_info_data"),
        }
    }

    pub fn update_node_config(&self, json: &str) {
        match NodeConfigList::parse(json) {
            Ok(node_config) => {
                let mut next = (**self.payloads.load()).clone_payloads();
                next.node_config = node_config;
                self.payloads.store(Arc::new(next));
                self.notify_tuning();
            }
            Err(err) => warn!(%err, "rejected malformed node_config_list_data"),
        }
    }

    pub fn update_rocksdb_node_config(&self, json: &str) {
        match RocksdbNodeConfigs::parse(json) {
            Ok(rocksdb_node_config) => {
                let mut next = (**self.payloads.load()).clone_payloads();
                next.rocksdb_node_config = rocksdb_node_config;
                self.payloads.store(Arc::new(next));
                self.notify_tuning();
            }
            Err(err) => warn!(%err, "rejected malformed rocksdb_node_configs_data"),
        }
    }

    pub fn update_table_config(&self, json: &str) {
        match TableConfigList::parse(json) {
            Ok(table_config) => {
                let mut next = (**self.payloads.load()).clone_payloads();
                next.table_config = table_config;
                self.payloads.store(Arc::new(next));
                self.notify_tuning();
            }
            Err(err) => warn!(%err, "rejected malformed table_config_list_data"),
        }
    }

    pub fn update_traffic(&self, json: &str) {
        match TrafficRestrictionData::parse(json) {
            Ok(traffic) => {
                let mut next = (**self.payloads.load()).clone_payloads();
                next.traffic = traffic;
                self.payloads.store(Arc::new(next));
                self.notify_traffic();
            }
            Err(err) => warn!(%err, "rejected malformed traffic_restriction_data"),
        }
    }

    /// Flip manual-override mode. Toggling off does not itself restore the
    /// registry's view; the next `update_cluster` call does.
    pub fn set_manual_override(&self, on: bool) {
        self.manual_override_enabled.store(on, Ordering::Release);
    }

    pub fn manual_override_enabled(&self) -> bool {
        self.manual_override_enabled.load(Ordering::Acquire)
    }

    /// Merge supplied payloads atomically, bypassing the subscription
    /// source. Only `cluster_info_data` is held as a distinct override
    /// layer (gated by `manual_override_enabled`); the rest go straight
    /// into the live payload set, same as a registry update would.
    pub fn apply_manual(&self, overrides: ManualOverrides) {
        if let Some(cluster) = overrides.cluster_info_data.clone() {
            let next = Overrides {
                cluster: Some(cluster),
            };
            self.overrides.store(Arc::new(next));
            self.notify_partitions();
        }

        let mut changed = false;
        let mut next = (**self.payloads.load()).clone_payloads();

        if let Some(schema) = overrides.database_table_schema_data {
            next.schema = schema;
            changed = true;
        }
        if let Some(node_config) = overrides.node_config_list_data {
            next.node_config = node_config;
            changed = true;
        }
        if let Some(rocksdb_node_config) = overrides.rocksdb_node_configs_data {
            next.rocksdb_node_config = rocksdb_node_config;
            changed = true;
        }
        if let Some(table_config) = overrides.table_config_list_data {
            next.table_config = table_config;
            changed = true;
        }
        if let Some(traffic) = overrides.traffic_restriction_data {
            next.traffic = traffic;
            changed = true;
        }

        if changed {
            self.payloads.store(Arc::new(next));
            self.notify_partitions();
            self.notify_tuning();
            self.notify_traffic();
        }
    }
}

impl Payloads {
    fn clone_payloads(&self) -> Payloads {
        Payloads {
            schema: self.schema.clone(),
            cluster: self.cluster.clone(),
            node_config: self.node_config.clone(),
            rocksdb_node_config: self.rocksdb_node_config.clone(),
            table_config: self.table_config.clone(),
            traffic: self.traffic.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample_schema_json() -> String {
        serde_json::json!({
            "databases": [{
                "name": "t",
                "tables": [{"name": "u", "partition_number": 10}]
            }]
        })
        .to_string()
    }

    fn sample_cluster_json(shard_number: u32) -> String {
        serde_json::json!({
            "data_centers": [{"name": "dc1", "shard_number": shard_number}],
            "groups": []
        })
        .to_string()
    }

    #[test]
    fn malformed_payload_does_not_replace_good_one() {
        let store = ConfigStore::default();
        store.update_schema(&sample_schema_json());
        assert_eq!(
            store.table_schema("t", "u").unwrap().partition_number,
            10
        );

        store.update_schema("{not json");
        assert_eq!(
            store.table_schema("t", "u").unwrap().partition_number,
            10
        );
    }

    #[test]
    fn manual_override_shortcircuits_only_cluster_updates() {
        let store = ConfigStore::default();
        store.update_cluster(&sample_cluster_json(3));
        assert_eq!(store.shard_number("dc1"), Some(3));

        store.set_manual_override(true);
        store.update_cluster(&sample_cluster_json(99));
        assert_eq!(store.shard_number("dc1"), Some(3));

        store.update_schema(&sample_schema_json());
        assert!(store.table_schema("t", "u").is_some());
    }

    #[test]
    fn apply_manual_overrides_cluster_through_distinct_layer() {
        let store = ConfigStore::default();
        store.set_manual_override(true);

        let overrides = ManualOverrides {
            cluster_info_data: Some(ClusterInfo::parse(&sample_cluster_json(7)).unwrap()),
            ..Default::default()
        };
        store.apply_manual(overrides);
        assert_eq!(store.shard_number("dc1"), Some(7));
    }

    #[test]
    fn subscribers_notified_on_relevant_change() {
        let store = ConfigStore::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        store.subscribe_partitions(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        store.update_schema(&sample_schema_json());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
