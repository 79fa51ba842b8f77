//! `node_config_list_data` and `rocksdb_node_configs_data`: a node is
//! assigned a tuning profile by name, and that name resolves to engine
//! options. Kept as two payloads so either can be updated independently.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine_options::TuningProfile;
use crate::error::Error;

/// `node_config_list_data` payload: "group#node" -> tuning profile name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeConfigList {
    #[serde(default)]
    pub assignments: HashMap<String, String>,
}

impl NodeConfigList {
    pub fn parse(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Json("node_config_list_data", e))
    }

    pub fn profile_name(&self, group: &str, node_id: u32) -> Option<&str> {
        self.assignments
            .get(&format!("{}#{}", group, node_id))
            .map(String::as_str)
    }
}

/// `rocksdb_node_configs_data` payload: profile name -> tuning options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RocksdbNodeConfigs {
    #[serde(default)]
    pub profiles: HashMap<String, TuningProfile>,
}

impl RocksdbNodeConfigs {
    pub fn parse(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Json("rocksdb_node_configs_data", e))
    }

    pub fn profile(&self, name: &str) -> Option<&TuningProfile> {
        self.profiles.get(name)
    }
}
