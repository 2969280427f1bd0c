//! Error types for the GitHub provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// GitHub provider errors
#[derive(Error, Debug)]
pub enum GitHubError {
    /// Token missing, expired or lacking the `contents` scope
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// API request returned an unexpected status
    #[error("GitHub API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Path does not exist on the branch
    #[error("Path not found: {path}")]
    NotFound { path: String },

    /// The blob SHA sent with a write no longer matches the branch
    #[error("Version conflict on {path}")]
    Conflict { path: String },

    /// Rate limited or failing server after every retry
    #[error("Request failed after {attempts} attempts (last status {status_code})")]
    RetriesExhausted { status_code: u16, attempts: u32 },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for GitHub operations
pub type Result<T> = std::result::Result<T, GitHubError>;

impl From<GitHubError> for BridgeError {
    fn from(error: GitHubError) -> Self {
        match error {
            GitHubError::Unauthorized(msg) => BridgeError::PermissionDenied(msg),
            GitHubError::NotFound { path } => BridgeError::NotFound(path),
            GitHubError::Conflict { path } => BridgeError::VersionConflict { path },
            GitHubError::RetriesExhausted { .. } => BridgeError::Network(error.to_string()),
            GitHubError::ApiError { .. }
            | GitHubError::ParseError(_)
            | GitHubError::InvalidConfig(_) => BridgeError::OperationFailed(error.to_string()),
            GitHubError::BridgeError(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GitHubError::ApiError {
            status_code: 400,
            message: "Bad request".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "GitHub API error (status 400): Bad request"
        );
    }

    #[test]
    fn test_error_conversion_keeps_taxonomy() {
        let conflict: BridgeError = GitHubError::Conflict {
            path: "images/a.jpg".into(),
        }
        .into();
        assert!(conflict.is_version_conflict());

        let missing: BridgeError = GitHubError::NotFound {
            path: "images/a.jpg".into(),
        }
        .into();
        assert!(missing.is_not_found());

        let auth: BridgeError = GitHubError::Unauthorized("bad token".into()).into();
        assert!(matches!(auth, BridgeError::PermissionDenied(_)));

        let exhausted: BridgeError = GitHubError::RetriesExhausted {
            status_code: 503,
            attempts: 3,
        }
        .into();
        assert!(matches!(exhausted, BridgeError::Network(_)));
    }
}
