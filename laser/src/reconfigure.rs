//! Background task driving live-reconfiguration of per-partition engine
//! tuning: on a fixed interval, every mounted partition checks whether its
//! table's tuning profile has advanced to a new version and, if so, reopens
//! its engine in place.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::ConfigStore;
use crate::partition_table::PartitionTable;

/// Runs until cancelled. Intended to be spawned as its own task alongside
/// the dispatcher and control plane.
pub async fn run(partitions: Arc<PartitionTable>, config: &'static ConfigStore, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let mounted = partitions.mounted_partitions();
        debug!(count = mounted.len(), "checking tuning profiles");
        for partition_hash in mounted {
            if let Some(handler) = partitions.handler_for(partition_hash) {
                handler.reconcile_tuning(config);
            }
        }
    }
}
