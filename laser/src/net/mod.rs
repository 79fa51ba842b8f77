//! The RPC framework/connection pool and the service registry are
//! external collaborators: "call service X with retry/timeout policy"
//! and "find servers for (service, shard, dc)". Only the interfaces
//! the client router consumes against them are modeled here.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardType {
    Leader,
    Follower,
    All,
}

/// "find servers for (service, shard, dc)".
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn find_by_shard(&self, service: &str, shard_id: u32, shard_type: ShardType) -> Vec<SocketAddr>;
    async fn find_by_partition(&self, service: &str, partition_hash: u64, shard_type: ShardType) -> Vec<SocketAddr>;
}

/// "call service X with retry/timeout policy". One `call` is
/// one attempt; the retry loop lives in `ClientRouter`, not here.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, addr: SocketAddr, operation: &str, payload: Vec<u8>, timeout: Duration) -> Result<Vec<u8>>;
}
