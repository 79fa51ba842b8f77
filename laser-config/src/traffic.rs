//! `traffic_restriction_data`: per (database, table) QPS limits, split by
//! single-key and multi-key operation name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TableTrafficRestriction {
    pub database: String,
    pub table: String,
    #[serde(default)]
    pub single_operation_qps_limit: HashMap<String, u32>,
    #[serde(default)]
    pub multi_operation_qps_limit: HashMap<String, u32>,
}

/// `traffic_restriction_data` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrafficRestrictionData {
    #[serde(default)]
    pub tables: Vec<TableTrafficRestriction>,
}

impl TrafficRestrictionData {
    pub fn parse(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Json("traffic_restriction_data", e))
    }

    pub fn single_limit(&self, database: &str, table: &str, operation: &str) -> Option<u32> {
        self.tables
            .iter()
            .find(|t| t.database == database && t.table == table)?
            .single_operation_qps_limit
            .get(operation)
            .copied()
    }

    pub fn multi_limit(&self, database: &str, table: &str, operation: &str) -> Option<u32> {
        self.tables
            .iter()
            .find(|t| t.database == database && t.table == table)?
            .multi_operation_qps_limit
            .get(operation)
            .copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn looks_up_single_and_multi_limits() {
        let data = TrafficRestrictionData {
            tables: vec![TableTrafficRestriction {
                database: "t".into(),
                table: "u".into(),
                single_operation_qps_limit: [("get".to_string(), 5)].into_iter().collect(),
                multi_operation_qps_limit: [("mget".to_string(), 50)].into_iter().collect(),
            }],
        };

        assert_eq!(data.single_limit("t", "u", "get"), Some(5));
        assert_eq!(data.single_limit("t", "u", "set"), None);
        assert_eq!(data.multi_limit("t", "u", "mget"), Some(50));
        assert_eq!(data.single_limit("other", "u", "get"), None);
    }
}
