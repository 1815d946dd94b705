//! Query scenarios: catalog walks, purchase filters and the HTTP facade

use super::{TestConfig, TestUtils, CHAIN_ID, ITEMS};
use actix_web::{test, web, App};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use myshop_sync::decode::ITEMS_SIGNATURE;
use myshop_sync::mock::{MockChainClient, MockPurchase};
use myshop_sync::{
    MetricsRegistry, PurchaseFilter, PurchaseIndexer, PurchaseQuery, PurchaseSource, QueryService,
};
use myshop_worker::server::{configure, cors, AppState};
use serde_json::Value;
use std::sync::Arc;

const ALICE: Address = Address::new([0xa1; 20]);

fn service(client: &Arc<MockChainClient>, enabled: bool) -> QueryService<MockChainClient> {
    let mut test = TestConfig::new();
    test.config.enabled = enabled;
    QueryService::new(test.indexer(client))
}

#[tokio::test]
async fn test_catalog_walk_terminates() -> Result<()> {
    let client = Arc::new(MockChainClient::new());
    TestUtils::plant_catalog(&client, 45);
    let query = service(&client, true);

    for _ in 0..2 {
        let mut cursor = None;
        let mut seen = Vec::new();
        let mut pages = 0;
        loop {
            let page = query.items(cursor, None).await?;
            pages += 1;
            seen.extend(page.entries.iter().map(|e| e.item_id.to::<u64>()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
            assert!(pages < 10, "walk did not terminate");
        }
        assert_eq!(pages, 3);
        assert_eq!(seen, (1..=45).collect::<Vec<u64>>());
    }

    // The second walk was served from the cache.
    assert_eq!(client.read_count(ITEMS_SIGNATURE), 45);

    let past_end = query.shops(Some(U256::from(46)), Some(5)).await?;
    assert!(past_end.entries.is_empty());
    assert_eq!(past_end.next_cursor, None);
    assert!(query.items(Some(U256::ZERO), None).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_purchase_filters_on_index() -> Result<()> {
    let client = Arc::new(MockChainClient::new());
    TestUtils::plant_catalog(&client, 3);
    client.set_tip(1_000);
    TestUtils::plant_purchases(&client, [100, 200, 300, 400, 500, 600]);
    client.add_purchase(ITEMS, MockPurchase::new(0xee, 3, 700).buyer(ALICE).item(3));

    let query = service(&client, true);
    query.indexer().poll_once().await?;

    let all = query.purchases(PurchaseQuery::default()).await?;
    assert_eq!(all.source, PurchaseSource::Index);
    assert_eq!(all.count, 7);
    assert_eq!(all.purchases[0].record.block_number, 700);

    let alice = query
        .purchases(PurchaseQuery {
            filter: PurchaseFilter {
                buyer: Some(ALICE),
                ..Default::default()
            },
            ..Default::default()
        })
        .await?;
    assert_eq!(alice.count, 1);
    assert_eq!(alice.purchases[0].record.buyer, ALICE);

    let ranged = query
        .purchases(PurchaseQuery {
            filter: PurchaseFilter {
                item_id: Some(U256::from(1)),
                ..Default::default()
            },
            from_block: Some(150),
            to_block: Some(450),
            enrich: false,
            ..Default::default()
        })
        .await?;
    // Purchases n=0..5 buy item n % 3 + 1; item 1 is n=0 (block 100) and n=3 (block 400).
    let blocks: Vec<u64> = ranged.purchases.iter().map(|p| p.record.block_number).collect();
    assert_eq!(blocks, vec![400]);
    assert!(ranged.purchases[0].item.is_none());

    let limited = query
        .purchases(PurchaseQuery {
            limit: Some(2),
            ..Default::default()
        })
        .await?;
    assert_eq!(limited.count, 2);

    let backwards = query
        .purchases(PurchaseQuery {
            from_block: Some(10),
            to_block: Some(5),
            ..Default::default()
        })
        .await;
    assert!(backwards.is_err());
    Ok(())
}

#[tokio::test]
async fn test_disabled_indexer_reads_the_chain() -> Result<()> {
    let client = Arc::new(MockChainClient::new());
    TestUtils::plant_catalog(&client, 3);
    client.set_tip(1_000);
    TestUtils::plant_purchases(&client, [100, 200]);
    client.add_purchase(ITEMS, MockPurchase::new(0xee, 0, 300).buyer(ALICE));

    let query = service(&client, false);
    let result = query
        .purchases(PurchaseQuery {
            filter: PurchaseFilter {
                buyer: Some(ALICE),
                ..Default::default()
            },
            ..Default::default()
        })
        .await?;
    assert_eq!(result.source, PurchaseSource::Chain);
    assert_eq!(result.indexed_to_block, None);
    assert_eq!(result.count, 1);
    assert_eq!(result.purchases[0].record.chain_id, CHAIN_ID);
    assert!(result.purchases[0].shop.is_some());
    Ok(())
}

#[actix_web::test]
async fn test_http_facade_over_live_index() {
    let client = Arc::new(MockChainClient::new());
    TestUtils::plant_catalog(&client, 3);
    client.set_tip(800);
    TestUtils::plant_purchases(&client, [610, 620, 630]);

    let metrics = Arc::new(MetricsRegistry::new());
    let indexer = PurchaseIndexer::new(
        client.clone(),
        TestConfig::new().config,
        metrics.indexer.clone(),
    );
    indexer.poll_once().await.unwrap();

    let state = web::Data::new(AppState {
        query: QueryService::new(indexer),
        metrics,
        chain_id: CHAIN_ID,
        rpc_url: "http://localhost:8545".to_string(),
    });
    let app = test::init_service(
        App::new()
            .wrap(cors())
            .app_data(state.clone())
            .configure(configure::<MockChainClient>),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/purchases?itemId=2&fromBlock=600")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["count"], 1);
    assert_eq!(body["fromBlock"], 600);
    assert_eq!(body["purchases"][0]["blockNumber"], 620);
    assert_eq!(body["purchases"][0]["item"]["tokenURI"], "ipfs://item");

    let req = test::TestRequest::get().uri("/items?limit=500").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["items"].as_array().unwrap().len(), 3);
    assert_eq!(body["nextCursor"], Value::Null);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("myshop_indexer_logs_ingested_total 3"));
}
