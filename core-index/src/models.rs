//! Row types for the local sync index.
//!
//! All timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Sync state of one asset, keyed by fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AssetSyncRecord {
    pub fingerprint: String,
    /// Device-local reference, absent for records learned from the remote.
    pub asset_id: Option<String>,
    pub repo_path: String,
    pub uploaded: bool,
    pub file_size: Option<i64>,
    pub created_at: Option<i64>,
    pub content_hash: Option<String>,
    pub preview_hash: Option<String>,
    pub last_seen_at: i64,
    pub last_uploaded_at: Option<i64>,
    pub last_error: Option<String>,
}

impl AssetSyncRecord {
    /// A record that has not been uploaded yet.
    pub fn pending(
        fingerprint: impl Into<String>,
        repo_path: impl Into<String>,
        seen_at: i64,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            asset_id: None,
            repo_path: repo_path.into(),
            uploaded: false,
            file_size: None,
            created_at: None,
            content_hash: None,
            preview_hash: None,
            last_seen_at: seen_at,
            last_uploaded_at: None,
            last_error: None,
        }
    }

    pub fn with_asset_id(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.fingerprint.trim().is_empty() {
            return Err("fingerprint must not be empty".to_string());
        }
        if self.repo_path.trim().is_empty() {
            return Err("repo_path must not be empty".to_string());
        }
        Ok(())
    }

    pub fn cursor(&self) -> AssetCursor {
        AssetCursor {
            last_seen_at: self.last_seen_at,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Partial update merged into an existing record by `touch`.
///
/// `None` keeps the stored value. `last_error` distinguishes "keep"
/// (`None`) from "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetPatch {
    pub asset_id: Option<String>,
    pub repo_path: Option<String>,
    pub uploaded: Option<bool>,
    pub file_size: Option<i64>,
    pub created_at: Option<i64>,
    pub content_hash: Option<String>,
    pub preview_hash: Option<String>,
    pub last_seen_at: Option<i64>,
    pub last_uploaded_at: Option<i64>,
    pub last_error: Option<Option<String>>,
}

impl AssetPatch {
    pub fn uploaded_at(at: i64) -> Self {
        Self {
            uploaded: Some(true),
            last_uploaded_at: Some(at),
            last_seen_at: Some(at),
            last_error: Some(None),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            last_error: Some(Some(message.into())),
            ..Self::default()
        }
    }

    pub fn seen_at(at: i64) -> Self {
        Self {
            last_seen_at: Some(at),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetFilter {
    pub uploaded: Option<bool>,
}

impl AssetFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn uploaded(uploaded: bool) -> Self {
        Self {
            uploaded: Some(uploaded),
        }
    }
}

/// Keyset position; rows sort by `(last_seen_at DESC, fingerprint DESC)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCursor {
    pub last_seen_at: i64,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPage {
    pub items: Vec<AssetSyncRecord>,
    /// Cursor for the next page; `None` when this page was the last.
    pub next_cursor: Option<AssetCursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BlocklistEntry {
    pub fingerprint: String,
    pub asset_id: Option<String>,
    pub blocked_at: i64,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_record_validation() {
        let record = AssetSyncRecord::pending("a.jpg_1_2", "images/Camera/a.jpg", 10);
        assert!(!record.uploaded);
        assert!(record.validate().is_ok());

        let empty = AssetSyncRecord::pending("", "images/Camera/a.jpg", 10);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_uploaded_patch_clears_error() {
        let patch = AssetPatch::uploaded_at(42);
        assert_eq!(patch.uploaded, Some(true));
        assert_eq!(patch.last_error, Some(None));
        assert_eq!(patch.repo_path, None);
    }
}
