use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every path variant of every candidate path came back empty.
    #[error("No remote content for {fingerprint} ({attempts} paths tried)")]
    Unavailable { fingerprint: String, attempts: usize },

    #[error("Preview rendering failed: {0}")]
    Preview(String),

    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
