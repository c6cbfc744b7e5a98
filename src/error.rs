//! Error types for tilecore

use crate::tile::TileId;
use thiserror::Error;

/// Result type alias for tilecore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tilecore operations
#[derive(Error, Debug)]
pub enum Error {
    /// A caller broke an API contract (rank mismatch, unknown worker, ...).
    /// Never retried.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// The wire payload does not match its header. Fatal.
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    #[error("Tile not found: {0}")]
    TileNotFound(TileId),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn contract(msg: impl Into<String>) -> Self {
        Error::ContractViolation(msg.into())
    }
}
