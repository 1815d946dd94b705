//! Snapshot persistence for the purchase log.
//!
//! A snapshot is a single JSON document written to `<path>.tmp` and renamed
//! over `<path>`, so readers only ever see a complete file. Writes are
//! coalesced by [`SnapshotStore`]: mutations mark the state dirty and one
//! trailing-edge debounce task performs the write.

use crate::metrics::IndexerMetrics;
use crate::state::IndexerState;
use crate::{PurchaseRecord, SyncError, SyncResult};
use alloy_primitives::Address;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs as async_fs;
use tokio::sync::RwLock;

pub const SNAPSHOT_VERSION: u32 = 1;

/// How many times a shutdown flush waits for a running write
const FLUSH_ATTEMPTS: usize = 500;
const FLUSH_RETRY_DELAY: Duration = Duration::from_millis(10);

/// On-disk snapshot document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub chain_id: u64,
    pub items_address: Address,
    #[serde(with = "crate::types::decimal_u64_opt")]
    pub last_indexed_block: Option<u64>,
    pub purchases: Vec<PurchaseRecord>,
}

impl Snapshot {
    pub fn capture(state: &IndexerState, chain_id: u64, items_address: Address) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            chain_id,
            items_address,
            last_indexed_block: state.last_indexed_block,
            purchases: state.records().cloned().collect(),
        }
    }
}

/// Read and validate a snapshot.
///
/// `Ok(None)` covers every "no usable snapshot" case that is not an I/O or
/// parse failure: a missing file, another version, another network or
/// contract, or a document of the wrong shape.
pub async fn load_snapshot(
    path: &Path,
    chain_id: u64,
    items_address: &Address,
) -> SyncResult<Option<Snapshot>> {
    let raw = match async_fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No snapshot at {}", path.display());
            return Ok(None);
        }
        Err(e) => {
            return Err(SyncError::Persistence(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let value: serde_json::Value = serde_json::from_str(&raw)?;

    let version = value.get("version").and_then(|v| v.as_u64());
    if version != Some(SNAPSHOT_VERSION as u64) {
        warn!(
            "Ignoring snapshot {}: unsupported version {:?}",
            path.display(),
            version
        );
        return Ok(None);
    }

    let snapshot: Snapshot = match serde_json::from_value(value) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Ignoring snapshot {}: unexpected shape: {}", path.display(), e);
            return Ok(None);
        }
    };

    if snapshot.chain_id != chain_id || snapshot.items_address != *items_address {
        warn!(
            "Ignoring snapshot {}: written for chain {} / {}, running on chain {} / {}",
            path.display(),
            snapshot.chain_id,
            snapshot.items_address,
            chain_id,
            items_address
        );
        return Ok(None);
    }

    Ok(Some(snapshot))
}

/// Write `snapshot` atomically: temp file first, then rename.
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            async_fs::create_dir_all(parent).await?;
        }
    }
    let body = serde_json::to_vec(snapshot)?;
    let tmp = tmp_path(path);
    async_fs::write(&tmp, body).await?;
    async_fs::rename(&tmp, path).await?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveOutcome {
    Written,
    Failed,
    /// Another write holds the temp file
    Busy,
}

/// Debounced snapshot writer bound to one indexer state
#[derive(Clone)]
pub struct SnapshotStore {
    path: PathBuf,
    chain_id: u64,
    items_address: Address,
    debounce: Duration,
    state: Arc<RwLock<IndexerState>>,
    metrics: IndexerMetrics,
}

impl SnapshotStore {
    pub fn new(
        path: PathBuf,
        chain_id: u64,
        items_address: Address,
        debounce: Duration,
        state: Arc<RwLock<IndexerState>>,
        metrics: IndexerMetrics,
    ) -> Self {
        Self {
            path,
            chain_id,
            items_address,
            debounce,
            state,
            metrics,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot for this network, counting read/parse failures.
    pub async fn load(&self) -> Option<Snapshot> {
        match load_snapshot(&self.path, self.chain_id, &self.items_address).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to load snapshot {}: {}", self.path.display(), e);
                self.state.write().await.persist.errors += 1;
                self.metrics.persist_errors.inc();
                None
            }
        }
    }

    /// Mark state dirty and make sure a debounce task will write it.
    pub async fn request_save(&self) {
        {
            let mut state = self.state.write().await;
            state.persist.dirty = true;
            if state.persist.scheduled {
                return;
            }
            state.persist.scheduled = true;
        }

        let store = self.clone();
        tokio::spawn(async move { store.debounce_loop().await });
    }

    async fn debounce_loop(&self) {
        loop {
            tokio::time::sleep(self.debounce).await;
            self.save_now().await;

            let mut state = self.state.write().await;
            if !state.persist.dirty {
                state.persist.scheduled = false;
                return;
            }
            debug!("State changed during snapshot write, rescheduling");
        }
    }

    /// Final best-effort write, waiting out any running write first.
    pub async fn flush(&self) {
        for _ in 0..FLUSH_ATTEMPTS {
            match self.save_now().await {
                SaveOutcome::Busy => tokio::time::sleep(FLUSH_RETRY_DELAY).await,
                SaveOutcome::Written => {
                    info!("Flushed snapshot to {}", self.path.display());
                    return;
                }
                SaveOutcome::Failed => return,
            }
        }
        warn!("Gave up flushing snapshot: a write never completed");
    }

    async fn save_now(&self) -> SaveOutcome {
        let snapshot = {
            let mut state = self.state.write().await;
            if state.persist.in_flight {
                state.persist.dirty = true;
                return SaveOutcome::Busy;
            }
            state.persist.in_flight = true;
            state.persist.dirty = false;
            Snapshot::capture(&state, self.chain_id, self.items_address)
        };

        let result = write_snapshot(&self.path, &snapshot).await;

        let mut state = self.state.write().await;
        state.persist.in_flight = false;
        match result {
            Ok(()) => {
                state.persist.saves += 1;
                state.persist.last_saved_at_ms = Some(crate::now_ms());
                self.metrics.saves.inc();
                debug!(
                    "Saved {} purchases at block {:?} to {}",
                    snapshot.purchases.len(),
                    snapshot.last_indexed_block,
                    self.path.display()
                );
                SaveOutcome::Written
            }
            Err(e) => {
                state.persist.errors += 1;
                self.metrics.persist_errors.inc();
                error!("Failed to save snapshot {}: {}", self.path.display(), e);
                SaveOutcome::Failed
            }
        }
    }
}
