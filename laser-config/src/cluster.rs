//! `cluster_info_data`: data centers, groups, nodes and their shard
//! assignments.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DataCenter {
    pub name: String,
    pub shard_number: u32,
}

/// Leader/follower shard assignment for one (group, node).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NodeShardList {
    #[serde(default)]
    pub leader_shards: Vec<u32>,
    #[serde(default)]
    pub follower_shards: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Node {
    pub node_id: u32,
    pub dc: String,
    #[serde(default)]
    pub is_edge_node: bool,
    #[serde(default)]
    pub leader_shards: Vec<u32>,
    #[serde(default)]
    pub follower_shards: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// `cluster_info_data` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClusterInfo {
    #[serde(default)]
    pub data_centers: Vec<DataCenter>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

impl ClusterInfo {
    pub fn parse(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Json("cluster_info_data", e))
    }

    /// Number of shards declared for a DC, or `None` if the DC is unknown.
    /// Absence is modeled explicitly rather than falling through to a
    /// default value.
    pub fn shard_number(&self, dc: &str) -> Option<u32> {
        self.data_centers
            .iter()
            .find(|d| d.name == dc)
            .map(|d| d.shard_number)
    }

    pub fn node_shard_list(&self, group: &str, node_id: u32) -> Option<NodeShardList> {
        let node = self
            .groups
            .iter()
            .find(|g| g.name == group)?
            .nodes
            .iter()
            .find(|n| n.node_id == node_id)?;

        Some(NodeShardList {
            leader_shards: node.leader_shards.clone(),
            follower_shards: node.follower_shards.clone(),
        })
    }

    pub fn node(&self, group: &str, node_id: u32) -> Option<&Node> {
        self.groups
            .iter()
            .find(|g| g.name == group)?
            .nodes
            .iter()
            .find(|n| n.node_id == node_id)
    }

    pub fn is_edge_node(&self, group: &str, node_id: u32) -> bool {
        self.node(group, node_id).map(|n| n.is_edge_node).unwrap_or(false)
    }

    /// All nodes, keyed by "group#node", for quick membership diffing.
    pub fn nodes_by_key(&self) -> HashMap<String, &Node> {
        let mut map = HashMap::new();
        for group in &self.groups {
            for node in &group.nodes {
                map.insert(format!("{}#{}", group.name, node.node_id), node);
            }
        }
        map
    }
}
