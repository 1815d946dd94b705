//! Error types for myshop-sync

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Chain client error: {0}")]
    ChainClient(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{0}")]
    InvalidParam(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<alloy_sol_types::Error> for SyncError {
    fn from(err: alloy_sol_types::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
