//! Local File System Abstraction
//!
//! The content cache and the download workflow never touch `std::fs` directly;
//! they go through [`FileSystemAccess`] so sandboxed hosts can redirect paths.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    /// Creation time, Unix seconds.
    pub created_at: Option<i64>,
    /// Last modification time, Unix seconds.
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn store_preview(fs: &dyn FileSystemAccess, data: Bytes) -> Result<()> {
///     let dir = fs.get_cache_directory().await?.join("previews");
///     fs.create_dir_all(&dir).await?;
///     fs.write_file(&dir.join("preview.jpg"), data).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Directory for data the system may purge under storage pressure.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Directory for persistent application data.
    async fn get_data_directory(&self) -> Result<PathBuf>;

    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all missing parents.
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write `data`, replacing any existing file.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// Direct children of `path`.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Rename within the same volume. Used for write-then-swap updates.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Total size of a directory tree in bytes.
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                let metadata = self.metadata(&entry).await?;
                if metadata.is_directory {
                    pending.push(entry);
                } else {
                    total += metadata.size;
                }
            }
        }

        Ok(total)
    }
}
