//! ClientRouter / LaserClient (C10): maps a logical key to a target
//! server via PartitionMap + service discovery, with edge-node
//! flow-ratio splitting and a sequential retry policy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};
use crate::key;
use crate::net::{RpcTransport, ServiceDiscovery, ShardType};
use crate::partition_map;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    LeaderRead,
    FollowerRead,
    MixedRead,
}

impl ReadMode {
    fn shard_type(self) -> ShardType {
        match self {
            ReadMode::LeaderRead => ShardType::Leader,
            ReadMode::FollowerRead => ShardType::Follower,
            ReadMode::MixedRead => ShardType::All,
        }
    }
}

/// The opaque connection pool's own selection algorithm, here reduced to
/// the one choice the router itself has to make (which discovered
/// address to call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBalance {
    RoundRobin,
    Random,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub read_mode: ReadMode,
    pub connection_retry: u32,
    pub timeout_retry: u32,
    pub load_balance: LoadBalance,
    pub local_first: bool,
    pub max_conn_per_server: u32,
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::LeaderRead,
            connection_retry: 1,
            timeout_retry: 1,
            load_balance: LoadBalance::RoundRobin,
            local_first: true,
            max_conn_per_server: 4,
            timeout: Duration::from_millis(500),
        }
    }
}

/// Per-request routing decision.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub service: String,
    pub shard_id: Option<u32>,
    pub partition_hash: u64,
    pub route_to_edge: bool,
    pub shard_type: ShardType,
    pub load_balance: LoadBalance,
    pub local_first: bool,
    pub max_conn_per_server: u32,
    pub timeout: Duration,
}

/// Whether this operation name is a write, which forces `LEADER_READ`
/// regardless of the caller's option.
pub fn is_write_operation(operation: &str) -> bool {
    matches!(
        operation,
        "sset"
            | "setx"
            | "append"
            | "delkey"
            | "mset"
            | "msetDetail"
            | "mdel"
            | "hset"
            | "hmset"
            | "hdel"
            | "expire"
            | "expireAt"
            | "lpush"
            | "rpush"
            | "lpop"
            | "rpop"
            | "sadd"
            | "sremove"
            | "zadd"
            | "zremRangeByScore"
            | "incr"
            | "decr"
            | "incrBy"
            | "decrBy"
    )
}

/// `zadd` stores scores as 64-bit integers; this scales a caller's float
/// score by `10000` the way the wire format expects. A float `∞` (or any
/// value that would overflow after scaling) is clamped to `i64::MAX /
/// 10000` first, so the scaled result never saturates to `i64::MAX` in a
/// way that would compare equal to a merely very large finite score.
pub fn zadd_score(score: f64) -> i64 {
    const SCALE: f64 = 10000.0;
    let clamped = score.clamp(-(i64::MAX as f64 / SCALE), i64::MAX as f64 / SCALE);
    (clamped * SCALE) as i64
}

fn effective_read_mode(operation: &str, requested: ReadMode) -> ReadMode {
    if is_write_operation(operation) {
        ReadMode::LeaderRead
    } else {
        requested
    }
}

/// `with probability edge_flow_ratio/100 set route_to_edge = true`.
/// `roll` is the caller's draw from `0..100`, taken
/// as a parameter so the decision is deterministic under test.
fn decide_route_to_edge(read_mode: ReadMode, edge_flow_ratio: u8, bind_edge_nodes_empty: bool, roll: u8) -> bool {
    if read_mode == ReadMode::LeaderRead || bind_edge_nodes_empty {
        return false;
    }
    roll < edge_flow_ratio.min(100)
}

pub struct ClientRouter<D, T> {
    service: String,
    discovery: D,
    transport: T,
}

impl<D: ServiceDiscovery, T: RpcTransport> ClientRouter<D, T> {
    pub fn new(service: impl Into<String>, discovery: D, transport: T) -> Self {
        Self {
            service: service.into(),
            discovery,
            transport,
        }
    }

    /// Resolve a single key to router options.
    pub fn route_single(
        &self,
        db: &str,
        table: &str,
        key: &[u8],
        partition_number: u32,
        shard_number: Option<u32>,
        edge_flow_ratio: u8,
        bind_edge_nodes_empty: bool,
        operation: &str,
        options: &ClientOptions,
    ) -> RouterOptions {
        let key_hash = key::key_hash([key]);
        let partition_id = partition_map::partition_id(db, table, key_hash, partition_number);
        let partition_hash = partition_map::partition_hash(db, table, partition_id);
        let shard_id = partition_map::shard_id(partition_hash, shard_number);

        let read_mode = effective_read_mode(operation, options.read_mode);
        let roll = rand::rng().random_range(0..100);
        let route_to_edge = decide_route_to_edge(read_mode, edge_flow_ratio, bind_edge_nodes_empty, roll);

        RouterOptions {
            service: self.service.clone(),
            shard_id,
            partition_hash,
            route_to_edge,
            shard_type: read_mode.shard_type(),
            load_balance: options.load_balance,
            local_first: options.local_first,
            max_conn_per_server: options.max_conn_per_server,
            timeout: options.timeout,
        }
    }

    async fn targets(&self, router: &RouterOptions) -> Vec<SocketAddr> {
        if router.route_to_edge {
            let found = self
                .discovery
                .find_by_partition(&router.service, router.partition_hash, router.shard_type)
                .await;
            if !found.is_empty() {
                return found;
            }
            // Edge target empty: reassign to the main group under shard_id.
        }
        match router.shard_id {
            Some(shard_id) => self.discovery.find_by_shard(&router.service, shard_id, router.shard_type).await,
            None => Vec::new(),
        }
    }

    fn pick(&self, addrs: &[SocketAddr], load_balance: LoadBalance) -> Option<SocketAddr> {
        match load_balance {
            LoadBalance::RoundRobin => addrs.first().copied(),
            LoadBalance::Random => {
                if addrs.is_empty() {
                    None
                } else {
                    let idx = rand::rng().random_range(0..addrs.len());
                    Some(addrs[idx])
                }
            }
        }
    }

    /// Issue one RPC with `(connection_retry, timeout_retry)` applied as
    /// sequential retries: transport errors consume `connection_retry`,
    /// timeouts consume `timeout_retry`. No speculative parallel retry.
    pub async fn call_single(&self, router: &RouterOptions, operation: &str, payload: Vec<u8>, options: &ClientOptions) -> Result<Vec<u8>> {
        let addrs = self.targets(router).await;
        let addr = self.pick(&addrs, router.load_balance).ok_or(Error::NoPartition)?;
        self.call_with_retry(addr, operation, payload, router.timeout, options).await
    }

    /// `zadd` with a caller-facing float score: scales and clamps it via
    /// [`zadd_score`] before the call is dispatched, so the wire never
    /// carries an unscaled or overflowing score.
    pub async fn zadd(&self, router: &RouterOptions, member: &[u8], score: f64, options: &ClientOptions) -> Result<Vec<u8>> {
        let scaled = zadd_score(score);
        let mut payload = Vec::with_capacity(member.len() + 8);
        payload.extend_from_slice(&scaled.to_be_bytes());
        payload.extend_from_slice(member);
        self.call_single(router, "zadd", payload, options).await
    }

    async fn call_with_retry(
        &self,
        addr: SocketAddr,
        operation: &str,
        payload: Vec<u8>,
        timeout: Duration,
        options: &ClientOptions,
    ) -> Result<Vec<u8>> {
        let mut connection_retries_left = options.connection_retry;
        let mut timeout_retries_left = options.timeout_retry;

        loop {
            match self.transport.call(addr, operation, payload.clone(), timeout).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable_as_timeout() && timeout_retries_left > 0 => {
                    timeout_retries_left -= 1;
                }
                Err(err) if err.is_retryable_as_transport() && connection_retries_left > 0 => {
                    connection_retries_left -= 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Multi-key batch: route every key, discover
    /// targets per group, reassign empty-edge groups to main, group by
    /// resolved address, call, and rejoin in input order.
    pub async fn call_multi(
        &self,
        db: &str,
        table: &str,
        keys: &[&[u8]],
        partition_number: u32,
        shard_number: Option<u32>,
        edge_flow_ratio: u8,
        bind_edge_nodes_empty: bool,
        operation: &str,
        payloads: &[Vec<u8>],
        options: &ClientOptions,
    ) -> Vec<Result<Vec<u8>>> {
        let read_mode = effective_read_mode(operation, options.read_mode);
        let shard_type = read_mode.shard_type();

        struct KeyRoute {
            partition_hash: u64,
            shard_id: Option<u32>,
            route_to_edge: bool,
        }

        let routes: Vec<KeyRoute> = keys
            .iter()
            .map(|key| {
                let key_hash = key::key_hash([*key]);
                let partition_id = partition_map::partition_id(db, table, key_hash, partition_number);
                let partition_hash = partition_map::partition_hash(db, table, partition_id);
                let shard_id = partition_map::shard_id(partition_hash, shard_number);
                let roll = rand::rng().random_range(0..100);
                let route_to_edge = decide_route_to_edge(read_mode, edge_flow_ratio, bind_edge_nodes_empty, roll);
                KeyRoute { partition_hash, shard_id, route_to_edge }
            })
            .collect();

        let mut edge_targets: HashMap<u64, Vec<SocketAddr>> = HashMap::new();
        let mut main_targets: HashMap<u32, Vec<SocketAddr>> = HashMap::new();

        for route in &routes {
            if route.route_to_edge && !edge_targets.contains_key(&route.partition_hash) {
                let found = self.discovery.find_by_partition(&self.service, route.partition_hash, shard_type).await;
                edge_targets.insert(route.partition_hash, found);
            } else if let Some(shard_id) = route.shard_id {
                if !route.route_to_edge && !main_targets.contains_key(&shard_id) {
                    let found = self.discovery.find_by_shard(&self.service, shard_id, shard_type).await;
                    main_targets.insert(shard_id, found);
                }
            }
        }

        let mut by_addr: HashMap<SocketAddr, Vec<usize>> = HashMap::new();
        let mut unresolved: Vec<usize> = Vec::new();

        for (idx, route) in routes.iter().enumerate() {
            let mut candidates = if route.route_to_edge {
                edge_targets.get(&route.partition_hash).cloned().unwrap_or_default()
            } else {
                Vec::new()
            };

            if candidates.is_empty() {
                // Reassign to the main group under shard_id.
                if let Some(shard_id) = route.shard_id {
                    if let Some(found) = main_targets.get(&shard_id) {
                        candidates = found.clone();
                    } else {
                        let found = self.discovery.find_by_shard(&self.service, shard_id, shard_type).await;
                        main_targets.insert(shard_id, found.clone());
                        candidates = found;
                    }
                }
            }

            match self.pick(&candidates, options.load_balance) {
                Some(addr) => by_addr.entry(addr).or_default().push(idx),
                None => unresolved.push(idx),
            }
        }

        let mut results: Vec<Option<Result<Vec<u8>>>> = (0..keys.len()).map(|_| None).collect();
        for idx in unresolved {
            results[idx] = Some(Err(Error::NoPartition));
        }

        // One address's keys are sent as one logical group (the wire
        // encoding of "that address's keys" is the opaque RPC
        // framework's concern); here each key in the group is issued its
        // own retried call and rejoined by original index.
        for (addr, indices) in by_addr {
            for idx in indices {
                let result = self
                    .call_with_retry(addr, operation, payloads[idx].clone(), options.timeout, options)
                    .await;
                results[idx] = Some(result);
            }
        }

        results.into_iter().map(|r| r.expect("every index assigned exactly once")).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_operations_force_leader_read() {
        assert_eq!(effective_read_mode("sset", ReadMode::MixedRead), ReadMode::LeaderRead);
        assert_eq!(effective_read_mode("get", ReadMode::MixedRead), ReadMode::MixedRead);
    }

    #[test]
    fn route_to_edge_never_true_for_leader_read() {
        assert!(!decide_route_to_edge(ReadMode::LeaderRead, 100, false, 0));
    }

    #[test]
    fn route_to_edge_never_true_with_no_bound_edge_nodes() {
        assert!(!decide_route_to_edge(ReadMode::MixedRead, 100, true, 0));
    }

    #[test]
    fn route_to_edge_follows_probability_threshold() {
        assert!(decide_route_to_edge(ReadMode::MixedRead, 50, false, 10));
        assert!(!decide_route_to_edge(ReadMode::MixedRead, 50, false, 90));
    }

    #[test]
    fn read_mode_maps_to_shard_type() {
        assert_eq!(ReadMode::LeaderRead.shard_type(), ShardType::Leader);
        assert_eq!(ReadMode::FollowerRead.shard_type(), ShardType::Follower);
        assert_eq!(ReadMode::MixedRead.shard_type(), ShardType::All);
    }

    struct FixedDiscovery {
        addr: SocketAddr,
    }

    #[async_trait::async_trait]
    impl ServiceDiscovery for FixedDiscovery {
        async fn find_by_shard(&self, _service: &str, _shard_id: u32, _shard_type: ShardType) -> Vec<SocketAddr> {
            vec![self.addr]
        }
        async fn find_by_partition(&self, _service: &str, _partition_hash: u64, _shard_type: ShardType) -> Vec<SocketAddr> {
            Vec::new()
        }
    }

    struct EchoTransport;

    #[async_trait::async_trait]
    impl RpcTransport for EchoTransport {
        async fn call(&self, _addr: SocketAddr, _operation: &str, payload: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>> {
            Ok(payload)
        }
    }

    #[tokio::test]
    async fn call_multi_preserves_input_order() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let router = ClientRouter::new("laser", FixedDiscovery { addr }, EchoTransport);

        let keys: Vec<&[u8]> = vec![b"a", b"b", b"c"];
        let payloads = vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()];
        let results = router
            .call_multi("t", "u", &keys, 8, Some(3), 0, true, "get", &payloads, &ClientOptions::default())
            .await;

        assert_eq!(results[0].as_ref().unwrap(), &b"1".to_vec());
        assert_eq!(results[1].as_ref().unwrap(), &b"2".to_vec());
        assert_eq!(results[2].as_ref().unwrap(), &b"3".to_vec());
    }

    #[test]
    fn zadd_score_scales_finite_floats_by_10000() {
        assert_eq!(zadd_score(1.5), 15000);
        assert_eq!(zadd_score(-2.25), -22500);
        assert_eq!(zadd_score(0.0), 0);
    }

    #[test]
    fn zadd_score_clamps_infinities_before_scaling() {
        let clamped_max = zadd_score(f64::INFINITY);
        assert!(clamped_max > 0 && clamped_max <= i64::MAX);

        let clamped_min = zadd_score(f64::NEG_INFINITY);
        assert_eq!(clamped_min, -clamped_max);

        // A huge but finite score saturates to the same clamp as ∞.
        assert_eq!(zadd_score(1e30), clamped_max);
    }

    #[tokio::test]
    async fn router_zadd_dispatches_clamped_score_and_member() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let router = ClientRouter::new("laser", FixedDiscovery { addr }, EchoTransport);
        let router_options = router.route_single("t", "u", b"alice", 8, Some(3), 0, true, "zadd", &ClientOptions::default());

        let response = router.zadd(&router_options, b"alice", 1.5, &ClientOptions::default()).await.unwrap();

        let mut expected = 15000i64.to_be_bytes().to_vec();
        expected.extend_from_slice(b"alice");
        assert_eq!(response, expected);
    }
}
