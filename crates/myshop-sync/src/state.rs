//! In-memory purchase log and indexer bookkeeping

use crate::{PurchaseKey, PurchaseRecord};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

/// Poll loop counters reported by `/indexer`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStats {
    pub total: u64,
    pub errors: u64,
    pub consecutive_errors: u64,
    pub last_poll_at_ms: Option<u64>,
    pub last_success_at_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_error_at_ms: Option<u64>,
}

/// Snapshot writer bookkeeping
#[derive(Debug, Clone, Default)]
pub struct PersistStatus {
    pub last_saved_at_ms: Option<u64>,
    pub saves: u64,
    pub errors: u64,
    /// A write is running; nothing else may touch the temp file
    pub in_flight: bool,
    /// State changed since the last write started
    pub dirty: bool,
    /// A debounce task is alive and will write again
    pub scheduled: bool,
}

/// Counts produced by one ingestion batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub added: usize,
    pub duplicates: usize,
    pub evicted: usize,
}

/// Everything the poll loop owns.
///
/// The log and the key set are private so they can only change together:
/// a key is present exactly when a record with that key is in the log.
#[derive(Debug, Default)]
pub struct IndexerState {
    /// Highest block fully scanned
    pub last_indexed_block: Option<u64>,
    /// Chain head seen by the most recent successful tip fetch
    pub last_tip_block: Option<u64>,
    log: VecDeque<PurchaseRecord>,
    keys: HashSet<PurchaseKey>,
    pub polls: PollStats,
    pub persist: PersistStatus,
}

impl IndexerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn contains(&self, key: &PurchaseKey) -> bool {
        self.keys.contains(key)
    }

    /// Records in discovery order
    pub fn records(&self) -> impl DoubleEndedIterator<Item = &PurchaseRecord> {
        self.log.iter()
    }

    /// Records most recently discovered first
    pub fn newest_first(&self) -> impl Iterator<Item = &PurchaseRecord> {
        self.log.iter().rev()
    }

    /// Append a record unless its key is already indexed.
    pub fn insert(&mut self, record: PurchaseRecord) -> bool {
        if !self.keys.insert(record.key()) {
            return false;
        }
        self.log.push_back(record);
        true
    }

    /// Append a batch, then evict the oldest entries down to `max_records`.
    pub fn ingest<I>(&mut self, records: I, max_records: usize) -> IngestOutcome
    where
        I: IntoIterator<Item = PurchaseRecord>,
    {
        let mut outcome = IngestOutcome::default();
        for record in records {
            if self.insert(record) {
                outcome.added += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
        outcome.evicted = self.evict_oldest(max_records);
        outcome
    }

    pub fn evict_oldest(&mut self, max_records: usize) -> usize {
        let mut evicted = 0;
        while self.log.len() > max_records {
            if let Some(record) = self.log.pop_front() {
                self.keys.remove(&record.key());
                evicted += 1;
            }
        }
        evicted
    }

    /// Keep only records matching `keep`; returns how many were removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&PurchaseRecord) -> bool,
    {
        let before = self.log.len();
        let keys = &mut self.keys;
        self.log.retain(|record| {
            if keep(record) {
                true
            } else {
                keys.remove(&record.key());
                false
            }
        });
        before - self.log.len()
    }

    /// Drop records below `cursor - window`. A zero window keeps everything.
    pub fn trim_window(&mut self, cursor: u64, window: u64) -> usize {
        if window == 0 {
            return 0;
        }
        let floor = cursor.saturating_sub(window);
        self.retain(|record| record.block_number >= floor)
    }

    /// Replace the log wholesale, keeping at most the newest `max_records`.
    /// The key set is rebuilt from whatever is kept.
    pub fn restore(
        &mut self,
        last_indexed_block: Option<u64>,
        records: Vec<PurchaseRecord>,
        max_records: usize,
    ) {
        self.log.clear();
        self.keys.clear();
        self.last_indexed_block = last_indexed_block;
        let skip = records.len().saturating_sub(max_records);
        for record in records.into_iter().skip(skip) {
            self.insert(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U256};

    fn record(tx: u8, log_index: u64, block_number: u64) -> PurchaseRecord {
        PurchaseRecord {
            chain_id: 1,
            tx_hash: B256::repeat_byte(tx),
            log_index,
            block_number,
            item_id: U256::from(1),
            shop_id: U256::from(1),
            buyer: Address::repeat_byte(0x11),
            recipient: Address::repeat_byte(0x11),
            quantity: U256::from(1),
            pay_token: Address::ZERO,
            pay_amount: U256::from(100),
            platform_fee_amount: U256::ZERO,
            serial_hash: B256::ZERO,
            first_token_id: U256::from(1),
        }
    }

    #[test]
    fn test_duplicate_keys_are_skipped() {
        let mut state = IndexerState::new();
        let outcome = state.ingest(vec![record(0xaa, 3, 10), record(0xaa, 3, 10)], 100);
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.duplicates, 1);

        let again = state.ingest(vec![record(0xaa, 3, 10)], 100);
        assert_eq!(again.added, 0);
        assert_eq!(state.len(), 1);
        assert_eq!(state.key_count(), 1);
    }

    #[test]
    fn test_eviction_keeps_keys_in_lockstep() {
        let mut state = IndexerState::new();
        let outcome = state.ingest((0..10).map(|i| record(i, 0, i as u64)), 4);
        assert_eq!(outcome.evicted, 6);
        assert_eq!(state.len(), 4);
        assert_eq!(state.key_count(), 4);
        assert_eq!(state.records().next().unwrap().tx_hash, B256::repeat_byte(6));

        // An evicted key can be indexed again
        assert!(state.insert(record(0, 0, 0)));
    }

    #[test]
    fn test_trim_window() {
        let mut state = IndexerState::new();
        state.ingest((1..=10).map(|i| record(i, 0, i as u64 * 100)), 100);

        assert_eq!(state.trim_window(1000, 0), 0);
        assert_eq!(state.trim_window(1000, 500), 4);
        assert_eq!(state.records().next().unwrap().block_number, 500);
        assert_eq!(state.len(), state.key_count());
    }

    #[test]
    fn test_restore_keeps_newest() {
        let mut state = IndexerState::new();
        state.insert(record(0xff, 0, 1));
        state.restore(Some(50), (0..5).map(|i| record(i, 0, i as u64)).collect(), 3);
        assert_eq!(state.last_indexed_block, Some(50));
        assert_eq!(state.len(), 3);
        assert!(!state.contains(&record(0xff, 0, 1).key()));
        assert!(state.contains(&record(4, 0, 4).key()));
        assert!(!state.contains(&record(1, 0, 1).key()));
    }
}
