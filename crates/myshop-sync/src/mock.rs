//! Mock implementations for testing

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use alloy_sol_types::{SolEvent, SolValue};

use crate::decode::{IItems, IShops, Purchased};
use crate::{ChainClientAdapter, ContractCall, Item, LogFilter, RawLog, Shop, SyncError, SyncResult};

/// A `Purchased` event to plant in the mock chain
#[derive(Debug, Clone)]
pub struct MockPurchase {
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub item_id: U256,
    pub shop_id: U256,
    pub buyer: Address,
    pub quantity: U256,
    pub pay_amount: U256,
}

impl MockPurchase {
    pub fn new(tx: u8, log_index: u64, block_number: u64) -> Self {
        Self {
            tx_hash: B256::repeat_byte(tx),
            log_index,
            block_number,
            item_id: U256::from(1),
            shop_id: U256::from(1),
            buyer: Address::repeat_byte(0xbb),
            quantity: U256::from(1),
            pay_amount: U256::from(1_000),
        }
    }

    pub fn item(mut self, item_id: u64) -> Self {
        self.item_id = U256::from(item_id);
        self
    }

    pub fn shop(mut self, shop_id: u64) -> Self {
        self.shop_id = U256::from(shop_id);
        self
    }

    pub fn buyer(mut self, buyer: Address) -> Self {
        self.buyer = buyer;
        self
    }

    pub fn into_log(self, items_address: Address) -> RawLog {
        let log = Purchased {
            itemId: self.item_id,
            shopId: self.shop_id,
            buyer: self.buyer,
            recipient: self.buyer,
            quantity: self.quantity,
            payToken: Address::ZERO,
            payAmount: self.pay_amount,
            platformFeeAmount: U256::ZERO,
            serialHash: B256::ZERO,
            firstTokenId: U256::from(1),
        }
        .encode_log_data();
        RawLog {
            address: items_address,
            topics: log.topics().to_vec(),
            data: log.data,
            block_number: Some(U64::from(self.block_number)),
            transaction_hash: Some(self.tx_hash),
            log_index: Some(U64::from(self.log_index)),
            removed: false,
        }
    }
}

/// Scripted chain client: tips, logs and contract reads are set by the
/// test, failures can be injected, and log ranges are recorded.
#[derive(Debug, Clone)]
pub struct MockChainClient {
    tip: Arc<RwLock<u64>>,
    logs: Arc<RwLock<Vec<RawLog>>>,
    reads: Arc<RwLock<HashMap<(Address, Bytes), Bytes>>>,
    read_counts: Arc<RwLock<HashMap<String, usize>>>,
    requested_ranges: Arc<RwLock<Vec<(u64, u64)>>>,
    connected: Arc<RwLock<bool>>,
    failures_remaining: Arc<RwLock<u32>>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            tip: Arc::new(RwLock::new(0)),
            logs: Arc::new(RwLock::new(Vec::new())),
            reads: Arc::new(RwLock::new(HashMap::new())),
            read_counts: Arc::new(RwLock::new(HashMap::new())),
            requested_ranges: Arc::new(RwLock::new(Vec::new())),
            connected: Arc::new(RwLock::new(true)),
            failures_remaining: Arc::new(RwLock::new(0)),
        }
    }

    pub fn set_tip(&self, tip: u64) {
        *self.tip.write().unwrap() = tip;
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.write().unwrap() = connected;
    }

    /// Fail the next `count` tip/log requests with a transient error
    pub fn fail_next(&self, count: u32) {
        *self.failures_remaining.write().unwrap() = count;
    }

    pub fn add_log(&self, log: RawLog) {
        self.logs.write().unwrap().push(log);
    }

    pub fn add_purchase(&self, items_address: Address, purchase: MockPurchase) {
        self.add_log(purchase.into_log(items_address));
    }

    /// Replace every log at or above `from_block` with `new_logs`
    pub fn simulate_reorg(&self, from_block: u64, new_logs: Vec<RawLog>) {
        let mut logs = self.logs.write().unwrap();
        logs.retain(|log| log_block(log) < from_block);
        logs.extend(new_logs);
    }

    /// Inclusive ranges passed to `get_logs`, in call order
    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requested_ranges.read().unwrap().clone()
    }

    /// Number of `read_contract` calls made for `signature`
    pub fn read_count(&self, signature: &str) -> usize {
        self.read_counts
            .read()
            .unwrap()
            .get(signature)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_read(&self, call: ContractCall, result: Bytes) {
        self.reads
            .write()
            .unwrap()
            .insert((call.address, call.data), result);
    }

    pub fn set_shops_address(&self, items_address: Address, shops_address: Address) {
        self.set_read(
            ContractCall::new(items_address, &IItems::shopsCall {}),
            shops_address.abi_encode().into(),
        );
    }

    pub fn set_item_count(&self, items_address: Address, count: u64) {
        self.set_read(
            ContractCall::new(items_address, &IItems::itemCountCall {}),
            U256::from(count).abi_encode().into(),
        );
    }

    pub fn set_shop_count(&self, shops_address: Address, count: u64) {
        self.set_read(
            ContractCall::new(shops_address, &IShops::shopCountCall {}),
            U256::from(count).abi_encode().into(),
        );
    }

    pub fn set_item(&self, items_address: Address, item_id: U256, item: &Item) {
        // Return values are encoded as a parameter list, not a wrapped tuple.
        let data = (
            item.shop_id,
            item.pay_token,
            item.unit_price,
            item.nft_contract,
            item.soulbound,
            item.token_uri.clone(),
            item.action,
            item.action_data.clone(),
            item.requires_serial,
            item.active,
        )
            .abi_encode_params();
        self.set_read(
            ContractCall::new(items_address, &IItems::itemsCall { itemId: item_id }),
            data.into(),
        );
    }

    pub fn set_shop(&self, shops_address: Address, shop_id: U256, shop: &Shop) {
        let data = (shop.owner, shop.treasury, shop.metadata_hash, shop.paused).abi_encode_params();
        self.set_read(
            ContractCall::new(shops_address, &IShops::shopsCall { shopId: shop_id }),
            data.into(),
        );
    }

    pub fn sample_item(shop_id: U256) -> Item {
        Item {
            shop_id,
            pay_token: Address::ZERO,
            unit_price: U256::from(1_000),
            nft_contract: Address::repeat_byte(0x0c),
            soulbound: false,
            token_uri: "ipfs://item".to_string(),
            action: Address::ZERO,
            action_data: Bytes::new(),
            requires_serial: false,
            active: true,
        }
    }

    pub fn sample_shop() -> Shop {
        Shop {
            owner: Address::repeat_byte(0x0a),
            treasury: Address::repeat_byte(0x0b),
            metadata_hash: B256::ZERO,
            paused: false,
        }
    }

    fn check_available(&self) -> SyncResult<()> {
        if !*self.connected.read().unwrap() {
            return Err(SyncError::ChainClient("Node not connected".to_string()));
        }
        let mut remaining = self.failures_remaining.write().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(SyncError::ChainClient("injected failure".to_string()));
        }
        Ok(())
    }
}

fn log_block(log: &RawLog) -> u64 {
    log.block_number.map(|n| n.to::<u64>()).unwrap_or(0)
}

fn log_position(log: &RawLog) -> (u64, u64) {
    (
        log_block(log),
        log.log_index.map(|n| n.to::<u64>()).unwrap_or(0),
    )
}

#[async_trait]
impl ChainClientAdapter for MockChainClient {
    async fn get_block_number(&self) -> SyncResult<u64> {
        self.check_available()?;
        Ok(*self.tip.read().unwrap())
    }

    async fn get_logs(&self, filter: &LogFilter) -> SyncResult<Vec<RawLog>> {
        self.check_available()?;
        self.requested_ranges
            .write()
            .unwrap()
            .push((filter.from_block, filter.to_block));

        let mut matched: Vec<RawLog> = self
            .logs
            .read()
            .unwrap()
            .iter()
            .filter(|log| log.address == filter.address)
            .filter(|log| {
                let block = log_block(log);
                block >= filter.from_block && block <= filter.to_block
            })
            .filter(|log| {
                filter.topics.iter().enumerate().all(|(i, wanted)| match wanted {
                    Some(topic) => log.topics.get(i) == Some(topic),
                    None => true,
                })
            })
            .cloned()
            .collect();
        matched.sort_by_key(log_position);
        Ok(matched)
    }

    async fn read_contract(&self, call: &ContractCall) -> SyncResult<Bytes> {
        if !*self.connected.read().unwrap() {
            return Err(SyncError::ChainClient("Node not connected".to_string()));
        }
        *self
            .read_counts
            .write()
            .unwrap()
            .entry(call.signature.clone())
            .or_insert(0) += 1;

        self.reads
            .read()
            .unwrap()
            .get(&(call.address, call.data.clone()))
            .cloned()
            .ok_or_else(|| {
                SyncError::ChainClient(format!(
                    "execution reverted: {} on {}",
                    call.signature, call.address
                ))
            })
    }

    async fn is_connected(&self) -> bool {
        *self.connected.read().unwrap()
    }
}
