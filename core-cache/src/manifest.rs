//! Per-entry cache manifest.
//!
//! Each cached fingerprint owns a directory with a `manifest.json` describing
//! which files are present and when the entry was last used. The `tag` ties
//! the directory to one specific remote file: when the entry's tag changes the
//! whole directory is discarded.

use core_metadata::MetaEntry;
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const PREVIEW_FILE: &str = "preview.jpg";

/// `contentHash:fileSize:repoPath:uploadedAt`, with absent parts left empty.
pub fn cache_tag(entry: &MetaEntry) -> String {
    format!(
        "{}:{}:{}:{}",
        entry.content_hash.as_deref().unwrap_or_default(),
        entry.file_size.map(|size| size.to_string()).unwrap_or_default(),
        entry.repo_path,
        entry
            .uploaded_at
            .map(|at| at.to_string())
            .unwrap_or_default(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFile {
    /// File name inside the entry directory.
    pub file: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManifest {
    pub fingerprint: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<CachedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<CachedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_viewed: Option<i64>,
}

impl CacheManifest {
    pub fn new(fingerprint: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            tag: tag.into(),
            preview: None,
            original: None,
            last_accessed: None,
            last_viewed: None,
        }
    }

    /// Most recent of every timestamp the manifest records.
    pub fn last_use(&self) -> i64 {
        [
            self.last_accessed,
            self.last_viewed,
            self.preview.as_ref().map(|f| f.updated_at),
            self.original.as_ref().map(|f| f.updated_at),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0)
    }

    pub fn has_original(&self) -> bool {
        self.original.is_some()
    }

    /// Whether a `lastAccessed` write is due, given the minimum spacing.
    pub fn access_due(&self, now: i64, touch_interval_ms: i64) -> bool {
        match self.last_accessed {
            Some(last) => now - last >= touch_interval_ms,
            None => true,
        }
    }

    pub fn view_due(&self, now: i64, touch_interval_ms: i64) -> bool {
        match self.last_viewed {
            Some(last) => now - last >= touch_interval_ms,
            None => true,
        }
    }
}
