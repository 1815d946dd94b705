//! Prometheus metrics for the purchase indexer

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Indexer-level metrics. Handles are cheap clones of shared atomics.
#[derive(Clone, Default)]
pub struct IndexerMetrics {
    pub polls: Counter,
    pub poll_errors: Counter,
    pub consecutive_errors: Gauge,
    pub last_indexed_block: Gauge,
    pub tip_block: Gauge,
    pub lag_blocks: Gauge,
    pub retained_records: Gauge,
    pub logs_ingested: Counter,
    pub duplicates_skipped: Counter,
    pub undecodable_logs: Counter,
    pub records_evicted: Counter,
    pub saves: Counter,
    pub persist_errors: Counter,
}

impl IndexerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the cursor position against the observed tip
    pub fn record_progress(&self, cursor: Option<u64>, tip: u64, retained: usize) {
        let cursor = cursor.unwrap_or(0);
        self.last_indexed_block.set(cursor as i64);
        self.tip_block.set(tip as i64);
        self.lag_blocks.set(tip.saturating_sub(cursor) as i64);
        self.retained_records.set(retained as i64);
    }
}

/// Registry wrapper used by the `/metrics` endpoint
pub struct MetricsRegistry {
    registry: Registry,
    pub indexer: IndexerMetrics,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("myshop_indexer");
        let indexer = IndexerMetrics::new();

        registry.register("polls", "Poll iterations started", indexer.polls.clone());
        registry.register(
            "poll_errors",
            "Poll iterations that failed",
            indexer.poll_errors.clone(),
        );
        registry.register(
            "consecutive_errors",
            "Failed polls since the last success",
            indexer.consecutive_errors.clone(),
        );
        registry.register(
            "last_indexed_block",
            "Highest block fully ingested",
            indexer.last_indexed_block.clone(),
        );
        registry.register("tip_block", "Last observed chain tip", indexer.tip_block.clone());
        registry.register(
            "lag_blocks",
            "Blocks between the tip and the cursor",
            indexer.lag_blocks.clone(),
        );
        registry.register(
            "retained_records",
            "Purchase records held in memory",
            indexer.retained_records.clone(),
        );
        registry.register(
            "logs_ingested",
            "Purchase records appended",
            indexer.logs_ingested.clone(),
        );
        registry.register(
            "duplicates_skipped",
            "Logs dropped because their key was already indexed",
            indexer.duplicates_skipped.clone(),
        );
        registry.register(
            "undecodable_logs",
            "Logs skipped because they failed to decode",
            indexer.undecodable_logs.clone(),
        );
        registry.register(
            "records_evicted",
            "Records removed by the retention cap or window",
            indexer.records_evicted.clone(),
        );
        registry.register("saves", "Snapshots written", indexer.saves.clone());
        registry.register(
            "persist_errors",
            "Snapshot load or save failures",
            indexer.persist_errors.clone(),
        );

        Self { registry, indexer }
    }

    /// Encode all metrics in Prometheus text format.
    pub fn encode_prometheus(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            return String::from("# Error encoding metrics\n");
        }
        buffer
    }
}
