//! Restart scenarios: snapshot restore, replay rewind and reorg repair

use super::{TestConfig, TestUtils, CHAIN_ID, ITEMS};
use anyhow::Result;
use myshop_sync::mock::{MockChainClient, MockPurchase};
use myshop_sync::{load_snapshot, PollOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Index purchases at 50, 95 and 99 up to tip 100, then shut down.
async fn first_run(test: &TestConfig, client: &Arc<MockChainClient>) -> Result<()> {
    client.set_tip(100);
    client.add_purchase(ITEMS, MockPurchase::new(0x50, 0, 50));
    client.add_purchase(ITEMS, MockPurchase::new(0x95, 0, 95));
    client.add_purchase(ITEMS, MockPurchase::new(0x99, 1, 99));

    let indexer = test.indexer(client);
    assert!(!indexer.restore().await);
    indexer.poll_once().await?;
    indexer.shutdown(None).await;
    Ok(())
}

#[tokio::test]
async fn test_snapshot_written_on_shutdown() -> Result<()> {
    TestUtils::init_logging();
    let test = TestConfig::persistent()?;
    let client = Arc::new(MockChainClient::new());
    first_run(&test, &client).await?;

    let snapshot = load_snapshot(&test.snapshot_path(), CHAIN_ID, &ITEMS)
        .await?
        .expect("snapshot should exist");
    assert_eq!(snapshot.last_indexed_block, Some(100));
    assert_eq!(snapshot.purchases.len(), 3);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(test.snapshot_path())?)?;
    assert_eq!(raw["version"], 1);
    assert_eq!(raw["lastIndexedBlock"], "100");
    assert_eq!(raw["purchases"][0]["itemId"], "1");
    Ok(())
}

#[tokio::test]
async fn test_restart_replays_recent_blocks() -> Result<()> {
    let test = TestConfig::persistent()?;
    let client = Arc::new(MockChainClient::new());
    first_run(&test, &client).await?;

    let indexer = test.indexer(&client);
    assert!(indexer.restore().await);
    // 100 - 12: the two records above the rewound cursor wait for replay.
    assert_eq!(indexer.last_indexed_block().await, Some(88));
    assert_eq!(indexer.state().read().await.len(), 1);

    client.set_tip(110);
    match indexer.poll_once().await? {
        PollOutcome::Indexed {
            from_block, ingest, ..
        } => {
            assert_eq!(from_block, 89);
            assert_eq!(ingest.added, 2);
            assert_eq!(ingest.duplicates, 0);
        }
        other => panic!("expected an indexed poll, got {:?}", other),
    }
    let state = indexer.state().read().await;
    let blocks: Vec<u64> = state.records().map(|r| r.block_number).collect();
    assert_eq!(blocks, vec![50, 95, 99]);
    Ok(())
}

#[tokio::test]
async fn test_reorg_during_downtime_is_repaired() -> Result<()> {
    let test = TestConfig::persistent()?;
    let client = Arc::new(MockChainClient::new());
    first_run(&test, &client).await?;

    // Blocks from 90 were replaced while the worker was down.
    client.simulate_reorg(
        90,
        vec![MockPurchase::new(0x97, 0, 97).item(2).into_log(ITEMS)],
    );

    let indexer = test.indexer(&client);
    assert!(indexer.restore().await);
    client.set_tip(105);
    indexer.poll_once().await?;

    let state = indexer.state().read().await;
    let kept: Vec<(u64, String)> = state
        .records()
        .map(|r| (r.block_number, r.item_id.to_string()))
        .collect();
    assert_eq!(kept, vec![(50, "1".to_string()), (97, "2".to_string())]);
    Ok(())
}

#[tokio::test]
async fn test_snapshot_from_another_network_is_ignored() -> Result<()> {
    let test = TestConfig::persistent()?;
    let client = Arc::new(MockChainClient::new());
    first_run(&test, &client).await?;

    let mut other = TestConfig::new();
    other.config.chain_id = CHAIN_ID + 1;
    other.config.persist = test.config.persist.clone();
    let indexer = other.indexer(&client);

    assert!(!indexer.restore().await);
    assert_eq!(indexer.last_indexed_block().await, None);
    assert!(indexer.state().read().await.is_empty());
    assert_eq!(indexer.status().await.persist.errors, 0);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_fresh() -> Result<()> {
    let test = TestConfig::persistent()?;
    std::fs::write(test.snapshot_path(), b"{ not json")?;

    let client = Arc::new(MockChainClient::new());
    client.set_tip(10_000);
    let indexer = test.indexer(&client);
    assert!(!indexer.restore().await);
    assert_eq!(indexer.status().await.persist.errors, 1);

    indexer.poll_once().await?;
    assert_eq!(client.requested_ranges(), vec![(5_000, 10_000)]);
    Ok(())
}

#[tokio::test]
async fn test_running_indexer_saves_in_background() -> Result<()> {
    let test = TestConfig::persistent()?;
    let client = Arc::new(MockChainClient::new());
    client.set_tip(300);
    TestUtils::plant_purchases(&client, [210, 220, 230]);

    let indexer = test.indexer(&client);
    let handle = indexer.start();

    let saved = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Some(snapshot)) =
                load_snapshot(&test.snapshot_path(), CHAIN_ID, &ITEMS).await
            {
                if snapshot.purchases.len() == 3 {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    assert_eq!(saved.last_indexed_block, Some(300));

    indexer.shutdown(Some(handle)).await;
    let status = indexer.status().await;
    assert!(status.persist.saves >= 1);
    assert_eq!(status.persist.errors, 0);
    Ok(())
}
