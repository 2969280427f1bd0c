//! Device Media Library Abstraction
//!
//! Enumeration, permission prompts and OS-level materialization live in the
//! host. The sync engine only sees this interface.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// A photo or video as reported by the device library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAsset {
    /// Device-local identifier. Not stable across reinstalls.
    pub id: String,
    pub filename: String,
    /// Album or folder the asset belongs to.
    pub album: Option<String>,
    /// Creation time, Unix milliseconds.
    pub created_at: Option<i64>,
    /// Modification time, Unix milliseconds.
    pub modified_at: Option<i64>,
    pub file_size: u64,
    pub mime_type: Option<String>,
}

impl DeviceAsset {
    /// Creation time when known, else modification time, else zero.
    pub fn timestamp_millis(&self) -> i64 {
        self.created_at.or(self.modified_at).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    /// The user granted access to a subset of the library.
    Limited,
    Denied,
}

impl PermissionStatus {
    pub fn allows_read(&self) -> bool {
        !matches!(self, PermissionStatus::Denied)
    }
}

#[async_trait]
pub trait MediaLibrary: Send + Sync {
    async fn permission_status(&self) -> Result<PermissionStatus>;

    async fn list_assets(&self) -> Result<Vec<DeviceAsset>>;

    async fn get_asset(&self, id: &str) -> Result<Option<DeviceAsset>>;

    /// Full content of the asset.
    ///
    /// Fails when the content only exists in network storage and has not
    /// been downloaded to the device yet; see [`request_materialize`].
    ///
    /// [`request_materialize`]: MediaLibrary::request_materialize
    async fn read_asset(&self, id: &str) -> Result<Bytes>;

    /// Ask the OS to pull the asset from network storage onto the device.
    async fn request_materialize(&self, id: &str) -> Result<()>;

    async fn delete_assets(&self, ids: &[String]) -> Result<()>;

    /// Save downloaded content into the device library.
    ///
    /// Hosts that cannot write to the library keep the default, which makes
    /// callers fall back to app-private storage.
    async fn save_to_library(&self, filename: &str, content: Bytes) -> Result<()> {
        let _ = (filename, content);
        Err(BridgeError::NotAvailable(
            "saving to the media library is not supported on this host".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_prefers_creation_time() {
        let mut asset = DeviceAsset {
            id: "1".into(),
            filename: "IMG_0001.JPG".into(),
            album: None,
            created_at: Some(10),
            modified_at: Some(20),
            file_size: 1,
            mime_type: None,
        };
        assert_eq!(asset.timestamp_millis(), 10);

        asset.created_at = None;
        assert_eq!(asset.timestamp_millis(), 20);

        asset.modified_at = None;
        assert_eq!(asset.timestamp_millis(), 0);
    }

    #[test]
    fn test_permission_status() {
        assert!(PermissionStatus::Limited.allows_read());
        assert!(!PermissionStatus::Denied.allows_read());
    }
}
