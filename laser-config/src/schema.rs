//! `database_table_schema_data`: databases, their tables, and per-table
//! partitioning/routing attributes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single table's schema-time attributes.
///
/// `partition_number` is fixed once a table is created: changing it
/// reshards the cluster (see [`crate::cluster::ClusterInfo`] for the
/// matching shard math).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSchema {
    pub name: String,
    pub partition_number: u32,
    /// Percent (0-100) of reads that should be routed to an edge node.
    #[serde(default)]
    pub edge_flow_ratio: u8,
    /// Edge nodes this table's reads may be pinned to.
    #[serde(default)]
    pub bind_edge_nodes: HashSet<u32>,
    /// Name of the tuning profile in `table_config_list_data`.
    #[serde(default = "TableSchema::default_tuning_profile")]
    pub tuning_profile: String,
}

impl TableSchema {
    fn default_tuning_profile() -> String {
        "default".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSchema {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableSchema>,
}

/// `database_table_schema_data` payload: every database and its tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DatabaseTableSchemaData {
    #[serde(default)]
    pub databases: Vec<DatabaseSchema>,
}

impl DatabaseTableSchemaData {
    pub fn parse(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Json("database_table_schema_data", e))
    }

    pub fn table(&self, database: &str, table: &str) -> Option<&TableSchema> {
        self.databases
            .iter()
            .find(|db| db.name == database)?
            .tables
            .iter()
            .find(|t| t.name == table)
    }

    /// Snapshot view keyed by (database, table) for cheap copy-on-read access.
    pub fn as_map(&self) -> HashMap<(String, String), TableSchema> {
        let mut map = HashMap::new();
        for db in &self.databases {
            for table in &db.tables {
                map.insert((db.name.clone(), table.name.clone()), table.clone());
            }
        }
        map
    }
}
