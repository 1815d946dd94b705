//! Read-through cache over the shop catalog contracts

use crate::decode::{decode_item, decode_shop, IItems, IShops};
use crate::{ChainClientAdapter, ContractCall, Item, Shop, SyncError, SyncResult};
use alloy_primitives::{Address, U256};
use alloy_sol_types::{SolCall, SolValue};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::time::Instant;

/// How long `itemCount`/`shopCount` answers are reused
pub const COUNT_TTL: Duration = Duration::from_millis(1_500);

struct TimedCount {
    value: U256,
    fetched_at: Instant,
}

/// Memoized catalog reads.
///
/// Items and shops are cached per id forever; counts for [`COUNT_TTL`].
/// Rows are never invalidated, so a field the contract later changes (an
/// item's `active` flag, a shop's `paused` flag) stays stale until restart.
pub struct CatalogCache<C: ChainClientAdapter> {
    client: Arc<C>,
    items_address: Address,
    shops_address: OnceCell<Address>,
    items: RwLock<HashMap<U256, Item>>,
    shops: RwLock<HashMap<U256, Shop>>,
    item_count: Mutex<Option<TimedCount>>,
    shop_count: Mutex<Option<TimedCount>>,
}

impl<C: ChainClientAdapter> CatalogCache<C> {
    pub fn new(client: Arc<C>, items_address: Address) -> Self {
        Self {
            client,
            items_address,
            shops_address: OnceCell::new(),
            items: RwLock::new(HashMap::new()),
            shops: RwLock::new(HashMap::new()),
            item_count: Mutex::new(None),
            shop_count: Mutex::new(None),
        }
    }

    pub fn items_address(&self) -> Address {
        self.items_address
    }

    /// Shops registry address, read once from the items contract
    pub async fn shops_address(&self) -> SyncResult<Address> {
        self.shops_address
            .get_or_try_init(|| async {
                let call = ContractCall::new(self.items_address, &IItems::shopsCall {});
                let data = self.client.read_contract(&call).await?;
                let address = IItems::shopsCall::abi_decode_returns(&data, true)?._0;
                debug!("Resolved shops registry at {}", address);
                Ok::<_, SyncError>(address)
            })
            .await
            .copied()
    }

    pub async fn item(&self, item_id: U256) -> SyncResult<Item> {
        if let Some(item) = self.items.read().await.get(&item_id) {
            return Ok(item.clone());
        }
        let call = ContractCall::new(self.items_address, &IItems::itemsCall { itemId: item_id });
        let item = decode_item(&self.client.read_contract(&call).await?)?;
        self.items.write().await.insert(item_id, item.clone());
        Ok(item)
    }

    pub async fn shop(&self, shop_id: U256) -> SyncResult<Shop> {
        if let Some(shop) = self.shops.read().await.get(&shop_id) {
            return Ok(shop.clone());
        }
        let shops_address = self.shops_address().await?;
        let call = ContractCall::new(shops_address, &IShops::shopsCall { shopId: shop_id });
        let shop = decode_shop(&self.client.read_contract(&call).await?)?;
        self.shops.write().await.insert(shop_id, shop.clone());
        Ok(shop)
    }

    pub async fn item_count(&self) -> SyncResult<U256> {
        let call = ContractCall::new(self.items_address, &IItems::itemCountCall {});
        self.timed_count(&self.item_count, call).await
    }

    pub async fn shop_count(&self) -> SyncResult<U256> {
        let call = ContractCall::new(self.shops_address().await?, &IShops::shopCountCall {});
        self.timed_count(&self.shop_count, call).await
    }

    async fn timed_count(
        &self,
        slot: &Mutex<Option<TimedCount>>,
        call: ContractCall,
    ) -> SyncResult<U256> {
        if let Some(cached) = slot.lock().await.as_ref() {
            if cached.fetched_at.elapsed() < COUNT_TTL {
                return Ok(cached.value);
            }
        }
        let data = self.client.read_contract(&call).await?;
        let value = U256::abi_decode(&data, true)?;
        *slot.lock().await = Some(TimedCount {
            value,
            fetched_at: Instant::now(),
        });
        Ok(value)
    }
}
