//! Laser: a distributed, persistent key-value store optimized for
//! high-throughput read-mostly workloads populated from offline batch
//! datasets.
//!
//! This crate is the node-local runtime: routing primitives, the
//! partition lifecycle, request dispatch, replication, and the HTTP
//! control plane. Static node identity and the five ConfigStore payload
//! schemas live in `laser_config`.

pub mod client;
pub mod config;
pub mod control_plane;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod key;
pub mod layout;
pub mod meta_info;
pub mod metrics;
pub mod net;
pub mod partition_map;
pub mod partition_table;
pub mod reconfigure;
pub mod replication;
pub mod traffic_limiter;

pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use layout::Layout;
pub use partition_table::PartitionTable;
