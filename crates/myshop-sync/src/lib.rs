//! On-chain `Purchased` event indexing for the shop contracts.
//!
//! The crate is built around the [`ChainClientAdapter`] seam: the
//! [`PurchaseIndexer`] polls it into a bounded, deduplicated in-memory log
//! that survives restarts through [`SnapshotStore`], and the
//! [`QueryService`] answers catalog and purchase reads on top of it.

pub mod cache;
pub mod decode;
pub mod error;
pub mod indexer;
pub mod metrics;
pub mod persistence;
pub mod query;
pub mod state;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use cache::*;
pub use error::*;
pub use indexer::*;
pub use metrics::*;
pub use persistence::*;
pub use query::*;
pub use state::*;
pub use traits::*;
pub use types::*;

/// Wall-clock milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
