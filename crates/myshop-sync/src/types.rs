//! Common types for myshop-sync

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default first-run lookback, in blocks.
pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 5_000;
/// Default rewind applied to a persisted cursor on restart.
pub const DEFAULT_REPLAY_LOOKBACK_BLOCKS: u64 = 12;
/// Default retention window for indexed records.
pub const DEFAULT_DEDUPE_WINDOW_BLOCKS: u64 = 5_000;
/// Default cap on retained purchase records.
pub const DEFAULT_MAX_RECORDS: usize = 5_000;
/// Default poll interval, also the base of the error backoff.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Default ceiling of the error backoff.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 15_000;
/// Trailing-edge delay used to coalesce snapshot writes.
pub const DEFAULT_PERSIST_DEBOUNCE_MS: u64 = 200;

/// Configuration for the purchase indexer
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Chain the indexer runs against; also guards persisted snapshots
    pub chain_id: u64,
    /// Items/purchases contract emitting `Purchased`
    pub items_address: Address,
    /// Master switch for the poll loop
    pub enabled: bool,
    /// Sleep between polls, and base of the error backoff
    pub poll_interval_ms: u64,
    /// First-run lookback from the chain tip
    pub lookback_blocks: u64,
    /// Rewind applied once to a persisted cursor on restart
    pub replay_lookback_blocks: u64,
    /// Records older than `cursor - window` are trimmed; 0 disables trimming
    pub dedupe_window_blocks: u64,
    /// Upper bound on retained records
    pub max_records: usize,
    /// Ceiling of the exponential error backoff
    pub max_backoff_ms: u64,
    /// Snapshot persistence
    pub persist: PersistConfig,
}

impl IndexerConfig {
    pub fn new(chain_id: u64, items_address: Address) -> Self {
        Self {
            chain_id,
            items_address,
            ..Default::default()
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chain_id: 0,
            items_address: Address::ZERO,
            enabled: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            lookback_blocks: DEFAULT_LOOKBACK_BLOCKS,
            replay_lookback_blocks: DEFAULT_REPLAY_LOOKBACK_BLOCKS,
            dedupe_window_blocks: DEFAULT_DEDUPE_WINDOW_BLOCKS,
            max_records: DEFAULT_MAX_RECORDS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            persist: PersistConfig::default(),
        }
    }
}

/// Configuration for snapshot persistence
#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub enabled: bool,
    /// Explicit snapshot path. When unset a per-network default is used.
    pub path: Option<PathBuf>,
    pub debounce_ms: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            debounce_ms: DEFAULT_PERSIST_DEBOUNCE_MS,
        }
    }
}

impl PersistConfig {
    /// Snapshot path for the given network, falling back to
    /// `data/indexer.<chainId>.<items>.json` under the working directory.
    pub fn resolve_path(&self, chain_id: u64, items_address: &Address) -> PathBuf {
        match &self.path {
            Some(path) => path.clone(),
            None => PathBuf::from("data").join(format!(
                "indexer.{}.0x{}.json",
                chain_id,
                hex::encode(items_address.as_slice())
            )),
        }
    }
}

/// Log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub log_index: Option<U64>,
    /// Set by nodes for logs dropped by a reorg
    #[serde(default)]
    pub removed: bool,
}

/// Inclusive block-range log query against one contract.
///
/// `topics[i] == None` matches anything at position `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<Option<B256>>,
    pub from_block: u64,
    pub to_block: u64,
}

/// A read-only contract call with its ABI-encoded calldata.
///
/// `signature` is the canonical function signature, e.g. `items(uint256)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractCall {
    pub address: Address,
    pub signature: String,
    pub data: Bytes,
}

impl ContractCall {
    pub fn new<C: SolCall>(address: Address, call: &C) -> Self {
        Self {
            address,
            signature: C::SIGNATURE.to_string(),
            data: call.abi_encode().into(),
        }
    }
}

/// Identity of a purchase: unique per chain, never reused for another event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PurchaseKey {
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Decoded `Purchased` event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub chain_id: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    #[serde(with = "decimal_u256")]
    pub item_id: U256,
    #[serde(with = "decimal_u256")]
    pub shop_id: U256,
    pub buyer: Address,
    pub recipient: Address,
    #[serde(with = "decimal_u256")]
    pub quantity: U256,
    pub pay_token: Address,
    #[serde(with = "decimal_u256")]
    pub pay_amount: U256,
    #[serde(with = "decimal_u256")]
    pub platform_fee_amount: U256,
    pub serial_hash: B256,
    #[serde(with = "decimal_u256")]
    pub first_token_id: U256,
}

impl PurchaseRecord {
    pub fn key(&self) -> PurchaseKey {
        PurchaseKey {
            tx_hash: self.tx_hash,
            log_index: self.log_index,
        }
    }
}

/// Catalog row of the items contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(with = "decimal_u256")]
    pub shop_id: U256,
    pub pay_token: Address,
    #[serde(with = "decimal_u256")]
    pub unit_price: U256,
    pub nft_contract: Address,
    pub soulbound: bool,
    #[serde(rename = "tokenURI")]
    pub token_uri: String,
    pub action: Address,
    pub action_data: Bytes,
    pub requires_serial: bool,
    pub active: bool,
}

/// Catalog row of the shops registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub owner: Address,
    pub treasury: Address,
    pub metadata_hash: B256,
    pub paused: bool,
}

/// `U256` as a decimal string on the wire. Accepts `0x`-prefixed input too.
pub mod decimal_u256 {
    use alloy_primitives::U256;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .parse::<U256>()
            .map_err(|e| D::Error::custom(format!("invalid uint256 '{}': {}", raw, e)))
    }
}

/// Optional `u64` as a decimal string or `null`.
pub mod decimal_u64_opt {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| {
            s.trim()
                .parse::<u64>()
                .map_err(|e| D::Error::custom(format!("invalid block number '{}': {}", s, e)))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purchase_record_wire_format() {
        let record = PurchaseRecord {
            chain_id: 31337,
            tx_hash: B256::repeat_byte(0xaa),
            log_index: 3,
            block_number: 120,
            item_id: U256::from(7),
            shop_id: U256::from(2),
            buyer: Address::repeat_byte(0x11),
            recipient: Address::repeat_byte(0x22),
            quantity: U256::from(1),
            pay_token: Address::ZERO,
            pay_amount: U256::from(10u64).pow(U256::from(18)),
            platform_fee_amount: U256::from(25),
            serial_hash: B256::ZERO,
            first_token_id: U256::from(100),
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["chainId"], 31337);
        assert_eq!(value["logIndex"], 3);
        assert_eq!(value["blockNumber"], 120);
        assert_eq!(value["itemId"], "7");
        assert_eq!(value["payAmount"], "1000000000000000000");

        let back: PurchaseRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.key().log_index, 3);
    }

    #[test]
    fn test_default_persist_path_is_per_network() {
        let items = Address::repeat_byte(0xab);
        let path = PersistConfig::default().resolve_path(10, &items);
        assert_eq!(
            path,
            PathBuf::from("data").join(format!("indexer.10.0x{}.json", "ab".repeat(20)))
        );

        let explicit = PersistConfig {
            path: Some(PathBuf::from("/tmp/state.json")),
            ..Default::default()
        };
        assert_eq!(explicit.resolve_path(10, &items), PathBuf::from("/tmp/state.json"));
    }

    #[test]
    fn test_raw_log_accepts_rpc_shape() {
        let log: RawLog = serde_json::from_value(serde_json::json!({
            "address": format!("0x{}", "01".repeat(20)),
            "topics": [format!("0x{}", "ff".repeat(32))],
            "data": "0x",
            "blockNumber": "0x1a",
            "transactionHash": format!("0x{}", "aa".repeat(32)),
            "logIndex": "0x3",
            "blockHash": format!("0x{}", "bb".repeat(32)),
        }))
        .unwrap();
        assert_eq!(log.block_number.map(|n| n.to::<u64>()), Some(26));
        assert_eq!(log.log_index.map(|n| n.to::<u64>()), Some(3));
        assert!(!log.removed);
    }
}
