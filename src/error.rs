use std::fmt;

use crate::geometry::BlockIndex;

#[derive(Debug)]
pub enum MergeError {
    /// A referenced block has no volume or metadata in the store.
    /// Non-fatal during pooling: the block is treated as a boundary block.
    NotFound(BlockIndex),
    /// A block carries a local label the persisted pool does not cover.
    /// The pool was built before this block (or a newer version of it)
    /// finished segmentation; re-run the pools stage.
    StalePool { block: BlockIndex, label: u32 },
    /// The ledger claims a block is applied but its output region is
    /// missing. Requires an explicit clean of that block.
    InconsistentLedger(BlockIndex),
    /// A ledger entry was asked to make a transition the state machine
    /// does not allow (e.g. pending straight to applied).
    InvalidTransition { block: BlockIndex, from: String, to: String },
    Serialization(Box<bincode::error::EncodeError>),
    Deserialization(Box<bincode::error::DecodeError>),
    Json(serde_json::Error),
    Io(std::io::Error),
    Config(String),
    Other(String),
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeError::NotFound(block) => {
                write!(f, "Block {} not found in store", block)
            }
            MergeError::StalePool { block, label } => {
                write!(
                    f,
                    "Stale pool: block {} carries label {} the pool does not cover; re-run pools",
                    block, label
                )
            }
            MergeError::InconsistentLedger(block) => {
                write!(
                    f,
                    "Inconsistent ledger: block {} is marked applied but its output region is missing; clean the block",
                    block
                )
            }
            MergeError::InvalidTransition { block, from, to } => {
                write!(f, "Block {}: invalid transition {} -> {}", block, from, to)
            }
            MergeError::Serialization(e) => write!(f, "Serialization error: {}", e),
            MergeError::Deserialization(e) => write!(f, "Deserialization error: {}", e),
            MergeError::Json(e) => write!(f, "JSON error: {}", e),
            MergeError::Io(e) => write!(f, "IO error: {}", e),
            MergeError::Config(e) => write!(f, "Config error: {}", e),
            MergeError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for MergeError {}

impl From<Box<bincode::error::EncodeError>> for MergeError {
    fn from(err: Box<bincode::error::EncodeError>) -> Self {
        MergeError::Serialization(err)
    }
}

impl From<bincode::error::EncodeError> for MergeError {
    fn from(err: bincode::error::EncodeError) -> Self {
        MergeError::Serialization(Box::new(err))
    }
}

impl From<Box<bincode::error::DecodeError>> for MergeError {
    fn from(err: Box<bincode::error::DecodeError>) -> Self {
        MergeError::Deserialization(err)
    }
}

impl From<bincode::error::DecodeError> for MergeError {
    fn from(err: bincode::error::DecodeError) -> Self {
        MergeError::Deserialization(Box::new(err))
    }
}

impl From<serde_json::Error> for MergeError {
    fn from(err: serde_json::Error) -> Self {
        MergeError::Json(err)
    }
}

impl From<std::io::Error> for MergeError {
    fn from(err: std::io::Error) -> Self {
        MergeError::Io(err)
    }
}

impl From<String> for MergeError {
    fn from(err: String) -> Self {
        MergeError::Other(err)
    }
}

impl From<&str> for MergeError {
    fn from(err: &str) -> Self {
        MergeError::Other(err.to_string())
    }
}
