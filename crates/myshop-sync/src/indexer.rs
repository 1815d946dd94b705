//! # Purchase Indexer
//!
//! Mirrors the `Purchased` events of one items contract into an in-memory,
//! bounded, deduplicated log and keeps a cursor over the blocks it has
//! fully scanned.
//!
//! ## Lifecycle
//!
//! 1. [`PurchaseIndexer::restore`] loads a persisted snapshot, if any. A
//!    restored cursor is rewound once by `replay_lookback_blocks` and every
//!    record above the rewound cursor is dropped, so blocks that may have
//!    been reorganised while the process was down are scanned again.
//! 2. [`PurchaseIndexer::run`] polls until [`PurchaseIndexer::stop`] is
//!    called. Each iteration fetches the tip, fetches logs for
//!    `[cursor + 1, tip]`, and only then mutates state under one write
//!    guard: dedupe, append, evict to `max_records`, advance the cursor,
//!    trim below `cursor - dedupe_window_blocks`.
//! 3. Chain errors leave state untouched and back off exponentially from
//!    `poll_interval_ms` up to `max_backoff_ms`. Nothing in the loop is
//!    fatal.
//! 4. [`PurchaseIndexer::flush`] performs a final snapshot write.
//!
//! Every successful iteration fetches a range starting exactly at
//! `cursor + 1`, so a slow or failing poller processes a larger range later
//! but never skips a block.

use crate::decode::{decode_purchased, purchased_topic};
use crate::metrics::IndexerMetrics;
use crate::persistence::SnapshotStore;
use crate::state::{IndexerState, IngestOutcome, PollStats};
use crate::{now_ms, ChainClientAdapter, IndexerConfig, LogFilter, SyncError, SyncResult};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

/// First-run cursor: one block below `tip - lookback`, so the first range
/// starts exactly at `tip - lookback`.
pub fn bootstrap_cursor(tip: u64, lookback_blocks: u64) -> u64 {
    tip.saturating_sub(lookback_blocks).saturating_sub(1)
}

/// Cursor after the one-time restart rewind
pub fn replay_cursor(persisted: u64, replay_lookback_blocks: u64) -> u64 {
    persisted - persisted.min(replay_lookback_blocks)
}

/// `min(base * 2^(n-1), cap)` for the n-th consecutive failure
pub fn backoff_delay(consecutive_errors: u64, base_ms: u64, cap_ms: u64) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(32) as u32;
    let delay = base_ms.saturating_mul(1u64 << exponent).min(cap_ms);
    Duration::from_millis(delay)
}

/// What one successful poll did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The cursor is already at the tip
    Idle { tip: u64 },
    Indexed {
        from_block: u64,
        to_block: u64,
        ingest: IngestOutcome,
        undecodable: usize,
        trimmed: usize,
    },
}

/// Persistence section of [`IndexerStatus`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistReport {
    pub enabled: bool,
    pub path: Option<String>,
    pub last_saved_at_ms: Option<u64>,
    pub saves: u64,
    pub errors: u64,
    pub in_flight: bool,
    pub dirty: bool,
}

/// Diagnostics served by `/indexer`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerStatus {
    pub enabled: bool,
    pub running: bool,
    pub poll_interval_ms: u64,
    pub lookback_blocks: u64,
    pub replay_lookback_blocks: u64,
    pub dedupe_window_blocks: u64,
    pub max_records: usize,
    #[serde(with = "crate::types::decimal_u64_opt")]
    pub last_indexed_block: Option<u64>,
    pub last_tip_block: Option<u64>,
    pub lag_blocks: Option<u64>,
    pub cached_purchases: usize,
    pub polls: PollStats,
    pub persist: PersistReport,
}

/// Polling indexer for `Purchased` events
pub struct PurchaseIndexer<C: ChainClientAdapter> {
    client: Arc<C>,
    config: Arc<IndexerConfig>,
    state: Arc<RwLock<IndexerState>>,
    store: Option<SnapshotStore>,
    metrics: IndexerMetrics,
    is_running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    wakeup: Arc<Notify>,
}

impl<C: ChainClientAdapter> Clone for PurchaseIndexer<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            is_running: self.is_running.clone(),
            stop_requested: self.stop_requested.clone(),
            wakeup: self.wakeup.clone(),
        }
    }
}

impl<C: ChainClientAdapter + 'static> PurchaseIndexer<C> {
    pub fn new(client: Arc<C>, config: IndexerConfig, metrics: IndexerMetrics) -> Self {
        let state = Arc::new(RwLock::new(IndexerState::new()));
        let store = config.persist.enabled.then(|| {
            SnapshotStore::new(
                config
                    .persist
                    .resolve_path(config.chain_id, &config.items_address),
                config.chain_id,
                config.items_address,
                Duration::from_millis(config.persist.debounce_ms),
                state.clone(),
                metrics.clone(),
            )
        });

        Self {
            client,
            config: Arc::new(config),
            state,
            store,
            metrics,
            is_running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn state(&self) -> &Arc<RwLock<IndexerState>> {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub async fn last_indexed_block(&self) -> Option<u64> {
        self.state.read().await.last_indexed_block
    }

    /// Load the persisted snapshot and apply the restart replay rewind.
    ///
    /// Returns whether a snapshot was restored.
    pub async fn restore(&self) -> bool {
        let Some(store) = &self.store else {
            return false;
        };
        let Some(snapshot) = store.load().await else {
            info!("No usable snapshot at {}, starting fresh", store.path().display());
            return false;
        };

        let persisted = snapshot.last_indexed_block;
        let rewound = persisted.map(|c| replay_cursor(c, self.config.replay_lookback_blocks));
        let mut purchases = snapshot.purchases;
        let loaded = purchases.len();
        if let Some(cursor) = rewound {
            purchases.retain(|p| p.block_number <= cursor);
        }
        let dropped = loaded - purchases.len();

        let mut state = self.state.write().await;
        state.restore(rewound, purchases, self.config.max_records);
        info!(
            "Restored {} purchases from {} (cursor {:?} rewound to {:?}, {} dropped for replay)",
            state.len(),
            store.path().display(),
            persisted,
            rewound,
            dropped
        );
        self.metrics
            .last_indexed_block
            .set(state.last_indexed_block.unwrap_or(0) as i64);
        self.metrics.retained_records.set(state.len() as i64);
        true
    }

    /// One poll iteration. State is only touched after the chain answered.
    pub async fn poll_once(&self) -> SyncResult<PollOutcome> {
        let tip = self.client.get_block_number().await?;

        let cursor = {
            let mut state = self.state.write().await;
            state.last_tip_block = Some(tip);
            match state.last_indexed_block {
                Some(cursor) => cursor,
                None => {
                    let cursor = bootstrap_cursor(tip, self.config.lookback_blocks);
                    info!(
                        "Bootstrapping purchase index at block {} (tip {}, lookback {})",
                        cursor, tip, self.config.lookback_blocks
                    );
                    state.last_indexed_block = Some(cursor);
                    cursor
                }
            }
        };

        if tip <= cursor {
            debug!("No new blocks: tip {}, indexed to {}", tip, cursor);
            let retained = self.state.read().await.len();
            self.metrics.record_progress(Some(cursor), tip, retained);
            return Ok(PollOutcome::Idle { tip });
        }

        let from_block = cursor + 1;
        let filter = LogFilter {
            address: self.config.items_address,
            topics: vec![Some(purchased_topic())],
            from_block,
            to_block: tip,
        };
        let logs = self.client.get_logs(&filter).await?;

        let mut records = Vec::with_capacity(logs.len());
        let mut undecodable = 0;
        for log in logs.iter().filter(|log| !log.removed) {
            match decode_purchased(self.config.chain_id, log) {
                Ok(record) => records.push(record),
                Err(e) => {
                    undecodable += 1;
                    warn!(
                        "Skipping undecodable log (tx {:?}, index {:?}): {}",
                        log.transaction_hash, log.log_index, e
                    );
                }
            }
        }

        let (ingest, trimmed, retained) = {
            let mut state = self.state.write().await;
            let ingest = state.ingest(records, self.config.max_records);
            state.last_indexed_block = Some(tip);
            let trimmed = state.trim_window(tip, self.config.dedupe_window_blocks);
            (ingest, trimmed, state.len())
        };

        self.metrics.logs_ingested.inc_by(ingest.added as u64);
        self.metrics.duplicates_skipped.inc_by(ingest.duplicates as u64);
        self.metrics.undecodable_logs.inc_by(undecodable as u64);
        self.metrics
            .records_evicted
            .inc_by((ingest.evicted + trimmed) as u64);
        self.metrics.record_progress(Some(tip), tip, retained);

        if ingest.added > 0 || ingest.evicted > 0 || trimmed > 0 {
            info!(
                "Indexed blocks {}..={}: {} new, {} duplicate, {} evicted, {} trimmed, {} retained",
                from_block, tip, ingest.added, ingest.duplicates, ingest.evicted, trimmed, retained
            );
        } else {
            debug!("Indexed blocks {}..={}: no new purchases", from_block, tip);
        }

        if let Some(store) = &self.store {
            store.request_save().await;
        }

        Ok(PollOutcome::Indexed {
            from_block,
            to_block: tip,
            ingest,
            undecodable,
            trimmed,
        })
    }

    /// Poll until stopped.
    pub async fn run(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("Purchase indexer already running");
            return;
        }
        info!(
            "Starting purchase indexer for {} on chain {}",
            self.config.items_address, self.config.chain_id
        );

        let interval = Duration::from_millis(self.config.poll_interval_ms);
        while !self.stop_requested.load(Ordering::SeqCst) {
            self.begin_poll().await;
            let delay = match self.poll_once().await {
                Ok(_) => {
                    self.record_success().await;
                    interval
                }
                Err(e) => {
                    let consecutive = self.record_failure(&e).await;
                    let delay = backoff_delay(
                        consecutive,
                        self.config.poll_interval_ms,
                        self.config.max_backoff_ms,
                    );
                    warn!(
                        "Indexer poll failed ({} in a row), retrying in {:?}: {}",
                        consecutive, delay, e
                    );
                    delay
                }
            };
            self.sleep_unless_stopped(delay).await;
        }

        self.is_running.store(false, Ordering::SeqCst);
        info!("Purchase indexer stopped");
    }

    /// Spawn [`Self::run`] on the runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let indexer = self.clone();
        tokio::spawn(async move { indexer.run().await })
    }

    /// Ask the loop to exit at its next check.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wakeup.notify_waiters();
    }

    /// Final best-effort snapshot write
    pub async fn flush(&self) {
        if let Some(store) = &self.store {
            store.flush().await;
        }
    }

    /// Stop the loop, wait for it, then flush.
    pub async fn shutdown(&self, handle: Option<JoinHandle<()>>) {
        self.stop();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Indexer task ended abnormally: {}", e);
            }
        }
        self.flush().await;
    }

    pub async fn status(&self) -> IndexerStatus {
        let state = self.state.read().await;
        let lag_blocks = match (state.last_tip_block, state.last_indexed_block) {
            (Some(tip), Some(cursor)) => Some(tip.saturating_sub(cursor)),
            _ => None,
        };

        IndexerStatus {
            enabled: self.config.enabled,
            running: self.is_running(),
            poll_interval_ms: self.config.poll_interval_ms,
            lookback_blocks: self.config.lookback_blocks,
            replay_lookback_blocks: self.config.replay_lookback_blocks,
            dedupe_window_blocks: self.config.dedupe_window_blocks,
            max_records: self.config.max_records,
            last_indexed_block: state.last_indexed_block,
            last_tip_block: state.last_tip_block,
            lag_blocks,
            cached_purchases: state.len(),
            polls: state.polls.clone(),
            persist: PersistReport {
                enabled: self.store.is_some(),
                path: self
                    .store
                    .as_ref()
                    .map(|store| store.path().display().to_string()),
                last_saved_at_ms: state.persist.last_saved_at_ms,
                saves: state.persist.saves,
                errors: state.persist.errors,
                in_flight: state.persist.in_flight,
                dirty: state.persist.dirty,
            },
        }
    }

    async fn begin_poll(&self) {
        let mut state = self.state.write().await;
        state.polls.total += 1;
        state.polls.last_poll_at_ms = Some(now_ms());
        self.metrics.polls.inc();
    }

    async fn record_success(&self) {
        let mut state = self.state.write().await;
        state.polls.consecutive_errors = 0;
        state.polls.last_success_at_ms = Some(now_ms());
        self.metrics.consecutive_errors.set(0);
    }

    async fn record_failure(&self, e: &SyncError) -> u64 {
        let mut state = self.state.write().await;
        state.polls.errors += 1;
        state.polls.consecutive_errors += 1;
        state.polls.last_error = Some(e.to_string());
        state.polls.last_error_at_ms = Some(now_ms());
        self.metrics.poll_errors.inc();
        self.metrics
            .consecutive_errors
            .set(state.polls.consecutive_errors as i64);
        state.polls.consecutive_errors
    }

    async fn sleep_unless_stopped(&self, delay: Duration) {
        let notified = self.wakeup.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.stop_requested.load(Ordering::SeqCst) {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = notified => {}
        }
    }
}
