//! Read queries over the catalog and the purchase log

use crate::cache::CatalogCache;
use crate::decode::{decode_purchased, purchased_topic};
use crate::indexer::PurchaseIndexer;
use crate::types::decimal_u256;
use crate::{ChainClientAdapter, Item, LogFilter, PurchaseRecord, Shop, SyncError, SyncResult};
use alloy_primitives::{Address, B256, U256};
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const MAX_PAGE_LIMIT: u64 = 200;
pub const DEFAULT_PURCHASE_LIMIT: u64 = 200;
pub const MAX_PURCHASE_LIMIT: u64 = 2_000;
/// Default purchase range ends at the tip and spans this many blocks
pub const DEFAULT_PURCHASE_RANGE_BLOCKS: u64 = 5_000;

/// Clamp a requested page size into `[1, max]`
pub fn clamp_limit(requested: Option<u64>, default: u64, max: u64) -> usize {
    requested.unwrap_or(default).clamp(1, max) as usize
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemEntry {
    #[serde(with = "decimal_u256")]
    pub item_id: U256,
    pub item: Item,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopEntry {
    #[serde(with = "decimal_u256")]
    pub shop_id: U256,
    pub shop: Shop,
}

/// One page of a sequential id walk
#[derive(Debug, Clone)]
pub struct CatalogPage<T> {
    pub cursor: U256,
    /// `None` once the walk has passed the last id
    pub next_cursor: Option<U256>,
    pub count: U256,
    pub entries: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseSource {
    Index,
    Chain,
}

impl std::str::FromStr for PurchaseSource {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "index" => Ok(PurchaseSource::Index),
            "chain" => Ok(PurchaseSource::Chain),
            other => Err(SyncError::InvalidParam(format!(
                "Invalid source: {} (expected index or chain)",
                other
            ))),
        }
    }
}

/// Filters shared by both purchase sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurchaseFilter {
    pub buyer: Option<Address>,
    pub shop_id: Option<U256>,
    pub item_id: Option<U256>,
}

impl PurchaseFilter {
    pub fn matches(&self, record: &PurchaseRecord) -> bool {
        self.buyer.map_or(true, |b| b == record.buyer)
            && self.shop_id.map_or(true, |s| s == record.shop_id)
            && self.item_id.map_or(true, |i| i == record.item_id)
    }

    /// Topic filter for `eth_getLogs`; slots follow the indexed event args
    fn topics(&self) -> Vec<Option<B256>> {
        vec![
            Some(purchased_topic()),
            self.item_id.map(|id| B256::from(id.to_be_bytes::<32>())),
            self.shop_id.map(|id| B256::from(id.to_be_bytes::<32>())),
            self.buyer.map(|buyer| buyer.into_word()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseQuery {
    pub filter: PurchaseFilter,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub limit: Option<u64>,
    /// Join each record with its item and shop
    pub enrich: bool,
    pub source: PurchaseSource,
}

impl Default for PurchaseQuery {
    fn default() -> Self {
        Self {
            filter: PurchaseFilter::default(),
            from_block: None,
            to_block: None,
            limit: None,
            enrich: true,
            source: PurchaseSource::Index,
        }
    }
}

/// A purchase, optionally joined with catalog rows
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedPurchase {
    #[serde(flatten)]
    pub record: PurchaseRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop: Option<Shop>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasesResult {
    pub source: PurchaseSource,
    pub from_block: u64,
    pub to_block: u64,
    pub latest: u64,
    pub indexed_to_block: Option<u64>,
    pub count: usize,
    pub purchases: Vec<EnrichedPurchase>,
}

/// Query service over the catalog cache and the indexer
pub struct QueryService<C: ChainClientAdapter> {
    indexer: PurchaseIndexer<C>,
    cache: Arc<CatalogCache<C>>,
}

impl<C: ChainClientAdapter> Clone for QueryService<C> {
    fn clone(&self) -> Self {
        Self {
            indexer: self.indexer.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<C: ChainClientAdapter + 'static> QueryService<C> {
    pub fn new(indexer: PurchaseIndexer<C>) -> Self {
        let cache = Arc::new(CatalogCache::new(
            indexer.client().clone(),
            indexer.config().items_address,
        ));
        Self { indexer, cache }
    }

    pub fn indexer(&self) -> &PurchaseIndexer<C> {
        &self.indexer
    }

    pub fn cache(&self) -> &CatalogCache<C> {
        &self.cache
    }

    pub async fn item(&self, item_id: U256) -> SyncResult<Item> {
        self.cache.item(item_id).await
    }

    pub async fn shop(&self, shop_id: U256) -> SyncResult<Shop> {
        self.cache.shop(shop_id).await
    }

    pub async fn items(
        &self,
        cursor: Option<U256>,
        limit: Option<u64>,
    ) -> SyncResult<CatalogPage<ItemEntry>> {
        let count = self.cache.item_count().await?;
        let (cursor, ids) = page_ids(cursor, limit, count)?;
        let mut entries = Vec::with_capacity(ids.len());
        for item_id in ids {
            entries.push(ItemEntry {
                item_id,
                item: self.cache.item(item_id).await?,
            });
        }
        Ok(finish_page(cursor, count, entries))
    }

    pub async fn shops(
        &self,
        cursor: Option<U256>,
        limit: Option<u64>,
    ) -> SyncResult<CatalogPage<ShopEntry>> {
        let count = self.cache.shop_count().await?;
        let (cursor, ids) = page_ids(cursor, limit, count)?;
        let mut entries = Vec::with_capacity(ids.len());
        for shop_id in ids {
            entries.push(ShopEntry {
                shop_id,
                shop: self.cache.shop(shop_id).await?,
            });
        }
        Ok(finish_page(cursor, count, entries))
    }

    /// Purchases in an inclusive block range.
    ///
    /// The index source answers newest-first from the in-memory log and only
    /// sees what the indexer retained. The chain source asks the node and
    /// answers oldest-first. A disabled indexer forces the chain source.
    pub async fn purchases(&self, query: PurchaseQuery) -> SyncResult<PurchasesResult> {
        let latest = self.indexer.client().get_block_number().await?;
        let from_block = query
            .from_block
            .unwrap_or_else(|| latest.saturating_sub(DEFAULT_PURCHASE_RANGE_BLOCKS));
        let to_block = query.to_block.unwrap_or(latest);
        if from_block > to_block {
            return Err(SyncError::InvalidParam(format!(
                "fromBlock {} is after toBlock {}",
                from_block, to_block
            )));
        }
        let limit = clamp_limit(query.limit, DEFAULT_PURCHASE_LIMIT, MAX_PURCHASE_LIMIT);

        let source = if self.indexer.is_enabled() && query.source == PurchaseSource::Index {
            PurchaseSource::Index
        } else {
            PurchaseSource::Chain
        };

        let records = match source {
            PurchaseSource::Index => {
                self.from_index(&query.filter, from_block, to_block, limit)
                    .await
            }
            PurchaseSource::Chain => {
                self.from_chain(&query.filter, from_block, to_block, limit)
                    .await?
            }
        };

        let mut purchases = Vec::with_capacity(records.len());
        for record in records {
            purchases.push(if query.enrich {
                self.enrich(record).await?
            } else {
                EnrichedPurchase {
                    record,
                    item: None,
                    shop: None,
                }
            });
        }

        Ok(PurchasesResult {
            source,
            from_block,
            to_block,
            latest,
            indexed_to_block: self.indexer.last_indexed_block().await,
            count: purchases.len(),
            purchases,
        })
    }

    async fn from_index(
        &self,
        filter: &PurchaseFilter,
        from_block: u64,
        to_block: u64,
        limit: usize,
    ) -> Vec<PurchaseRecord> {
        let state = self.indexer.state().read().await;
        state
            .newest_first()
            .filter(|r| r.block_number >= from_block && r.block_number <= to_block)
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect()
    }

    async fn from_chain(
        &self,
        filter: &PurchaseFilter,
        from_block: u64,
        to_block: u64,
        limit: usize,
    ) -> SyncResult<Vec<PurchaseRecord>> {
        let config = self.indexer.config();
        let logs = self
            .indexer
            .client()
            .get_logs(&LogFilter {
                address: config.items_address,
                topics: filter.topics(),
                from_block,
                to_block,
            })
            .await?;

        logs.iter()
            .filter(|log| !log.removed)
            .take(limit)
            .map(|log| decode_purchased(config.chain_id, log))
            .collect()
    }

    async fn enrich(&self, record: PurchaseRecord) -> SyncResult<EnrichedPurchase> {
        let item = self.cache.item(record.item_id).await?;
        let shop = self.cache.shop(record.shop_id).await?;
        Ok(EnrichedPurchase {
            record,
            item: Some(item),
            shop: Some(shop),
        })
    }
}

fn page_ids(
    cursor: Option<U256>,
    limit: Option<u64>,
    count: U256,
) -> SyncResult<(U256, Vec<U256>)> {
    let cursor = cursor.unwrap_or(U256::from(1));
    if cursor.is_zero() {
        return Err(SyncError::InvalidParam("cursor must be at least 1".to_string()));
    }
    let limit = clamp_limit(limit, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT);

    let mut ids = Vec::with_capacity(limit);
    let mut id = cursor;
    while id <= count && ids.len() < limit {
        ids.push(id);
        id += U256::from(1);
    }
    Ok((cursor, ids))
}

fn finish_page<T>(cursor: U256, count: U256, entries: Vec<T>) -> CatalogPage<T> {
    let next = cursor + U256::from(entries.len());
    CatalogPage {
        cursor,
        next_cursor: (next <= count).then_some(next),
        count,
        entries,
    }
}
