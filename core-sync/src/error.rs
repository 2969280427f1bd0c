use bridge_traits::BridgeError;
use core_cache::CacheError;
use core_index::IndexError;
use core_metadata::MetadataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict on {path}")]
    VersionConflict { path: String },

    #[error("Asset {asset_id} could not be prepared: {message}")]
    Prepare { asset_id: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure classes the batch step table decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote path absent. Expected; never logged as an error.
    NotFound,
    /// A conditional write lost against a newer remote version.
    VersionConflict,
    /// Media or storage access is not granted.
    PermissionDenied,
    /// Asset content could not be read from the device.
    PrepareFailure,
    TransientNetwork,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotFound => "not_found",
            FailureKind::VersionConflict => "version_conflict",
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::PrepareFailure => "prepare_failure",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn bridge_kind(error: &BridgeError) -> FailureKind {
    match error {
        BridgeError::VersionConflict { .. } => FailureKind::VersionConflict,
        BridgeError::PermissionDenied(_) => FailureKind::PermissionDenied,
        BridgeError::Network(_) => FailureKind::TransientNetwork,
        e if e.is_not_found() => FailureKind::NotFound,
        _ => FailureKind::Internal,
    }
}

impl SyncError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::PermissionDenied(_) => FailureKind::PermissionDenied,
            SyncError::NotFound(_) => FailureKind::NotFound,
            SyncError::VersionConflict { .. } => FailureKind::VersionConflict,
            SyncError::Prepare { .. } => FailureKind::PrepareFailure,
            SyncError::Network(_) => FailureKind::TransientNetwork,
            SyncError::Cancelled => FailureKind::Cancelled,
            SyncError::Bridge(e) => bridge_kind(e),
            SyncError::Metadata(MetadataError::Bridge(e)) => bridge_kind(e),
            SyncError::Cache(CacheError::Bridge(e)) => bridge_kind(e),
            SyncError::Cache(CacheError::Unavailable { .. }) => FailureKind::NotFound,
            SyncError::Index(_)
            | SyncError::Metadata(_)
            | SyncError::Cache(_)
            | SyncError::InvalidConfig(_)
            | SyncError::InvalidValue(_)
            | SyncError::Internal(_) => FailureKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
