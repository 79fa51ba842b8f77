//! Per (database, table, operation) QPS enforcement.
//!
//! Built the same way `auth::rate_limit` enforces per-IP attempt limits:
//! a keyed `governor` limiter rebuilt whenever the configured quota
//! changes, with no limiter at all standing in for "unrestricted".

use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::{Quota, RateLimiter};

use crate::config::ConfigStore;
use crate::metrics;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

fn build(limit: u32) -> DirectLimiter {
    let quota = Quota::per_second(NonZeroU32::new(limit.max(1)).expect("limit.max(1) is non-zero"));
    RateLimiter::direct(quota)
}

/// One entry per restricted (database, table, operation, kind) key. A
/// limit change rebuilds the entry rather than mutating governor's quota
/// in place, mirroring `auth::rate_limit::reload`.
pub struct TrafficLimiter {
    limiters: DashMap<String, (u32, DirectLimiter)>,
}

impl TrafficLimiter {
    pub fn new() -> Self {
        Self {
            limiters: DashMap::new(),
        }
    }

    pub fn check_single(&self, config: &ConfigStore, db: &str, table: &str, operation: &str) -> bool {
        let limit = config.traffic_restriction().single_limit(db, table, operation);
        self.check("single", db, table, operation, limit)
    }

    pub fn check_multi(&self, config: &ConfigStore, db: &str, table: &str, operation: &str) -> bool {
        let limit = config.traffic_restriction().multi_limit(db, table, operation);
        self.check("multi", db, table, operation, limit)
    }

    fn check(&self, kind: &str, db: &str, table: &str, operation: &str, limit: Option<u32>) -> bool {
        let Some(limit) = limit else { return true };
        let key = format!("{kind}:{db}:{table}:{operation}");

        let mut entry = self.limiters.entry(key).or_insert_with(|| (limit, build(limit)));
        if entry.0 != limit {
            *entry = (limit, build(limit));
        }
        let allowed = entry.1.check().is_ok();
        if !allowed {
            metrics::rate_limit_trip();
        }
        allowed
    }
}

impl Default for TrafficLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unrestricted_operation_always_allowed() {
        let config = ConfigStore::default();
        let limiter = TrafficLimiter::new();
        for _ in 0..1000 {
            assert!(limiter.check_single(&config, "t", "u", "get"));
        }
    }

    #[test]
    fn restricted_operation_stops_after_limit() {
        let config = ConfigStore::default();
        config.update_traffic(
            &serde_json::json!({
                "tables": [{
                    "database": "t",
                    "table": "u",
                    "single_operation_qps_limit": {"get": 3},
                    "multi_operation_qps_limit": {}
                }]
            })
            .to_string(),
        );

        let limiter = TrafficLimiter::new();
        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.check_single(&config, "t", "u", "get") {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }
}
