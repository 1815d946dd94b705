//! MyShop Test Suite
//!
//! End-to-end scenarios for the purchase indexer: a `PurchaseIndexer`
//! driven against the scripted `MockChainClient`, restarted from its
//! snapshot, and queried through the HTTP facade.

pub mod tests;

// Re-export test utilities for external use
pub use tests::{TestConfig, TestUtils};
