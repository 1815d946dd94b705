//! End-to-end test suite for the purchase indexer
//!
//! Scenarios run a real `PurchaseIndexer` against `MockChainClient`, with
//! snapshots written to a temporary directory.

use alloy_primitives::{Address, U256};
use myshop_sync::mock::{MockChainClient, MockPurchase};
use myshop_sync::{IndexerConfig, IndexerMetrics, PersistConfig, PurchaseIndexer};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub mod query_e2e_test;
pub mod restart_e2e_test;

pub const CHAIN_ID: u64 = 31337;
pub const ITEMS: Address = Address::new([0x01; 20]);
pub const SHOPS: Address = Address::new([0x02; 20]);

/// Indexer configuration shared by the scenarios
pub struct TestConfig {
    pub config: IndexerConfig,
    _dir: Option<TempDir>,
}

impl TestConfig {
    /// In-memory only, fast polling
    pub fn new() -> Self {
        Self {
            config: IndexerConfig {
                poll_interval_ms: 10,
                max_backoff_ms: 50,
                ..IndexerConfig::new(CHAIN_ID, ITEMS)
            },
            _dir: None,
        }
    }

    /// Persisting to a fresh temporary directory with a short debounce
    pub fn persistent() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("indexer.json");
        let mut test = Self::new();
        test.config.persist = PersistConfig {
            enabled: true,
            path: Some(path),
            debounce_ms: 20,
        };
        test._dir = Some(dir);
        Ok(test)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.config
            .persist
            .resolve_path(self.config.chain_id, &self.config.items_address)
    }

    pub fn indexer(&self, client: &Arc<MockChainClient>) -> PurchaseIndexer<MockChainClient> {
        PurchaseIndexer::new(client.clone(), self.config.clone(), IndexerMetrics::default())
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Helpers for planting chain state
pub struct TestUtils;

impl TestUtils {
    pub fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// One purchase per block in `blocks`, each in its own transaction
    pub fn plant_purchases(client: &MockChainClient, blocks: impl IntoIterator<Item = u64>) {
        for (i, block) in blocks.into_iter().enumerate() {
            client.add_purchase(ITEMS, Self::purchase(i as u64, block));
        }
    }

    /// Purchase `n` at `block`, with a transaction hash derived from `n`
    pub fn purchase(n: u64, block: u64) -> MockPurchase {
        let mut purchase = MockPurchase::new(0, 0, block).item(n % 3 + 1);
        purchase.tx_hash = U256::from(n + 1).to_be_bytes::<32>().into();
        purchase
    }

    /// `count` items and shops, every item belonging to shop 1
    pub fn plant_catalog(client: &MockChainClient, count: u64) {
        client.set_shops_address(ITEMS, SHOPS);
        client.set_item_count(ITEMS, count);
        client.set_shop_count(SHOPS, count);
        for id in 1..=count {
            client.set_item(ITEMS, U256::from(id), &MockChainClient::sample_item(U256::from(1)));
            client.set_shop(SHOPS, U256::from(id), &MockChainClient::sample_shop());
        }
    }
}
