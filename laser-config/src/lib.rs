// Submodules
pub mod cluster;
pub mod core;
pub mod engine_options;
pub mod error;
pub mod general;
pub mod node_tuning;
pub mod overrides;
pub mod schema;
pub mod table_config;
pub mod traffic;
pub mod util;

pub use cluster::{ClusterInfo, DataCenter, Group, Node, NodeShardList};
pub use core::Config;
pub use engine_options::{EngineOptions, TuningProfile};
pub use error::Error;
pub use general::General;
pub use node_tuning::{NodeConfigList, RocksdbNodeConfigs};
pub use overrides::ManualOverrides;
pub use schema::{DatabaseSchema, DatabaseTableSchemaData, TableSchema};
pub use table_config::TableConfigList;
pub use traffic::{TableTrafficRestriction, TrafficRestrictionData};
