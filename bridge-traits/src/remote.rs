//! Remote Storage Abstraction
//!
//! A version-controlled file host used as the durable tier for media and
//! metadata. Every write is conditional on the version SHA the caller last
//! observed; there is no other locking primitive.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Identifies one branch of one remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

impl RepoRef {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    /// Path segments safe to use as local directory names.
    pub fn cache_segments(&self) -> [String; 3] {
        [
            sanitize_segment(&self.owner),
            sanitize_segment(&self.repo),
            sanitize_segment(&self.branch),
        ]
    }

    /// `owner/repo/branch` with every segment sanitized.
    pub fn cache_key(&self) -> String {
        self.cache_segments().join("/")
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.branch)
    }
}

/// Keep `[A-Za-z0-9._-]`, map the rest to `_`, and never yield `.` or `..`.
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".repeat(cleaned.len().max(1))
    } else {
        cleaned
    }
}

/// A file read from the remote together with its current version SHA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub sha: String,
    pub content: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteEntryKind {
    File,
    Directory,
}

/// One child of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub sha: String,
    pub size: u64,
    pub kind: RemoteEntryKind,
}

impl RemoteEntry {
    pub fn is_file(&self) -> bool {
        self.kind == RemoteEntryKind::File
    }
}

/// Remote content store with optimistic concurrency.
///
/// # Contract
///
/// - `get_file` returns `Ok(None)` for a missing path. Not-found is the common
///   case during bootstrap and must not surface as an error.
/// - `put_file` with `expected_sha = None` creates the file; if it already
///   exists the call fails with [`BridgeError::VersionConflict`]. With
///   `Some(sha)` the call fails with the same error when the stored SHA differs.
/// - Conflicts are never retried by implementations.
///
/// [`BridgeError::VersionConflict`]: crate::error::BridgeError::VersionConflict
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    fn repo(&self) -> &RepoRef;

    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>>;

    /// Returns the new version SHA.
    async fn put_file(&self, path: &str, content: Bytes, expected_sha: Option<&str>)
        -> Result<String>;

    async fn delete_file(&self, path: &str, sha: &str) -> Result<()>;

    /// Children of `path`. A missing directory yields an empty list.
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Force-replace the branch history with a single empty commit.
    async fn reset_branch(&self, message: &str) -> Result<()>;

    /// Current SHA of `path`, if it exists.
    async fn file_sha(&self, path: &str) -> Result<Option<String>> {
        Ok(self.get_file(path).await?.map(|file| file.sha))
    }
}
