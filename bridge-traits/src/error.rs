use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The addressed remote path or local asset does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional write was rejected because the stored version moved.
    #[error("Version conflict on {path}")]
    VersionConflict { path: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn is_not_found(&self) -> bool {
        match self {
            BridgeError::NotFound(_) => true,
            BridgeError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, BridgeError::VersionConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
