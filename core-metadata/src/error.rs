use bridge_traits::error::BridgeError;
use thiserror::Error;

use crate::store::ShardState;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid shard transition for {bucket}: {from:?} -> {to:?}")]
    InvalidTransition {
        bucket: String,
        from: ShardState,
        to: ShardState,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MetadataError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, MetadataError::Bridge(e) if e.is_version_conflict())
    }
}

pub type Result<T> = std::result::Result<T, MetadataError>;
