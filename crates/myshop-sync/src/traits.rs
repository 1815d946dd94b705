//! Core traits for the purchase indexer and its query surface

use crate::{ContractCall, LogFilter, RawLog, SyncResult};
use alloy_primitives::Bytes;
use async_trait::async_trait;

/// Trait for talking to an EVM JSON-RPC node.
///
/// The indexer and the query service only ever see the chain through this
/// seam, so a live RPC client and the scripted mock are interchangeable.
#[async_trait]
pub trait ChainClientAdapter: Send + Sync {
    /// Current chain tip
    async fn get_block_number(&self) -> SyncResult<u64>;

    /// Logs matching `filter` over the inclusive block range
    async fn get_logs(&self, filter: &LogFilter) -> SyncResult<Vec<RawLog>>;

    /// Raw return data of a read-only contract call against the latest block
    async fn read_contract(&self, call: &ContractCall) -> SyncResult<Bytes>;

    /// Whether the node is reachable
    async fn is_connected(&self) -> bool;
}
