//! The payload bundle accepted by `apply_manual`: any subset of the five
//! registry payloads, applied atomically and bypassing the subscription
//! source they'd otherwise arrive from.

use serde::{Deserialize, Serialize};

use crate::cluster::ClusterInfo;
use crate::node_tuning::{NodeConfigList, RocksdbNodeConfigs};
use crate::schema::DatabaseTableSchemaData;
use crate::table_config::TableConfigList;
use crate::traffic::TrafficRestrictionData;

/// Manually supplied overrides for one or more payloads. Fields left `None`
/// are untouched; the caller only sends what it wants to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ManualOverrides {
    pub database_table_schema_data: Option<DatabaseTableSchemaData>,
    pub cluster_info_data: Option<ClusterInfo>,
    pub node_config_list_data: Option<NodeConfigList>,
    pub rocksdb_node_configs_data: Option<RocksdbNodeConfigs>,
    pub table_config_list_data: Option<TableConfigList>,
    pub traffic_restriction_data: Option<TrafficRestrictionData>,
}

impl ManualOverrides {
    pub fn is_empty(&self) -> bool {
        self.database_table_schema_data.is_none()
            && self.cluster_info_data.is_none()
            && self.node_config_list_data.is_none()
            && self.rocksdb_node_configs_data.is_none()
            && self.table_config_list_data.is_none()
            && self.traffic_restriction_data.is_none()
    }
}
