//! Prometheus text-exposition metrics for the control plane's `/metrics`
//! endpoint: a process-wide counter table plus a plain text renderer, no
//! metrics crate dependency.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::partition_table::PartitionTable;

static COUNTERS: Lazy<DashMap<&'static str, AtomicU64>> = Lazy::new(DashMap::new);

pub fn incr(name: &'static str) {
    COUNTERS
        .entry(name)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

pub fn rate_limit_trip() {
    incr("laser_rate_limit_trips_total");
}

pub fn replication_attempt() {
    incr("laser_replication_attempts_total");
}

pub fn replication_success() {
    incr("laser_replication_success_total");
}

pub fn replication_failure() {
    incr("laser_replication_failures_total");
}

pub fn base_load() {
    incr("laser_base_loads_total");
}

pub fn delta_load() {
    incr("laser_delta_loads_total");
}

pub fn tuning_reopen() {
    incr("laser_tuning_reopens_total");
}

/// Render every counter plus a gauge for currently mounted partitions, in
/// Prometheus text exposition format.
pub fn render(partitions: &PartitionTable) -> String {
    let mut out = String::new();

    for entry in COUNTERS.iter() {
        out.push_str(&format!(
            "# TYPE {} counter\n{} {}\n",
            entry.key(),
            entry.key(),
            entry.value().load(Ordering::Relaxed)
        ));
    }

    out.push_str("# TYPE laser_mounted_partitions gauge\n");
    out.push_str(&format!(
        "laser_mounted_partitions {}\n",
        partitions.mounted_partitions().len()
    ));

    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::Layout;
    use std::sync::Arc;

    #[test]
    fn render_includes_bumped_counters() {
        rate_limit_trip();
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(Layout::new(dir.path(), dir.path(), "g", 1));
        let table = PartitionTable::new(layout);
        let text = render(&table);
        assert!(text.contains("laser_rate_limit_trips_total"));
        assert!(text.contains("laser_mounted_partitions 0"));
    }
}
