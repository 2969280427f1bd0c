//! JSON documents stored in the remote repository.
//!
//! Field names are camelCase on the wire; timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DOCUMENT_VERSION: u32 = 1;

/// "This file is present on the remote."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaEntry {
    pub repo_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_repo_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
}

impl MetaEntry {
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            preview_repo_path: None,
            created_at: None,
            file_size: None,
            content_hash: None,
            uploaded_at: None,
            asset_id: None,
        }
    }

    /// Timestamp used to order entries for browsing.
    pub fn sort_timestamp(&self) -> i64 {
        self.created_at.or(self.uploaded_at).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardEntry {
    #[serde(flatten)]
    pub entry: MetaEntry,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardDocument {
    pub version: u32,
    pub bucket: String,
    pub generated_at: i64,
    #[serde(default)]
    pub entries: BTreeMap<String, ShardEntry>,
}

impl ShardDocument {
    pub fn empty(bucket: impl Into<String>, generated_at: i64) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            bucket: bucket.into(),
            generated_at,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRow {
    pub path: String,
    pub count: usize,
    pub updated_at: i64,
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    pub version: u32,
    pub updated_at: i64,
    #[serde(default)]
    pub shards: BTreeMap<String, ManifestRow>,
}

impl ManifestDocument {
    pub fn empty(updated_at: i64) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            updated_at,
            shards: BTreeMap::new(),
        }
    }

    pub fn total_entries(&self) -> usize {
        self.shards.values().map(|row| row.count).sum()
    }
}

/// An entry held in memory together with the bucket it was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry {
    pub fingerprint: String,
    pub bucket: String,
    pub entry: MetaEntry,
    pub updated_at: i64,
}
