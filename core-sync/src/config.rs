use crate::{Result, SyncError};
use core_metadata::identity::IMAGES_ROOT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote directory media files are uploaded under
    pub images_root: String,

    /// Wait after asking the OS to materialize an offloaded asset before
    /// reading it again
    pub materialize_retry_delay: Duration,

    /// Ask the media library to delete assets once they are uploaded
    pub auto_delete_after_sync: bool,

    /// Prefix for commit messages written by the orchestrator
    pub commit_message_prefix: String,

    /// Directory name under the data directory for downloads that could not
    /// go anywhere else
    pub downloads_dir_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            images_root: IMAGES_ROOT.to_string(),
            materialize_retry_delay: Duration::from_millis(1500),
            auto_delete_after_sync: false,
            commit_message_prefix: "photo-vault".to_string(),
            downloads_dir_name: "downloads".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn with_images_root(mut self, root: impl Into<String>) -> Self {
        self.images_root = root.into();
        self
    }

    pub fn with_materialize_retry_delay(mut self, delay: Duration) -> Self {
        self.materialize_retry_delay = delay;
        self
    }

    pub fn with_auto_delete(mut self, enabled: bool) -> Self {
        self.auto_delete_after_sync = enabled;
        self
    }

    pub fn with_commit_message_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_message_prefix = prefix.into();
        self
    }

    pub fn commit_message(&self, message: &str) -> String {
        if self.commit_message_prefix.is_empty() {
            message.to_string()
        } else {
            format!("{}: {}", self.commit_message_prefix, message)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let root = self.images_root.trim_matches('/');
        if root.is_empty() {
            return Err(SyncError::InvalidConfig("images_root is empty".into()));
        }
        if root.split('/').any(|segment| segment == "..") {
            return Err(SyncError::InvalidConfig(format!(
                "images_root {} escapes the repository",
                self.images_root
            )));
        }
        if self.materialize_retry_delay > Duration::from_secs(60) {
            return Err(SyncError::InvalidConfig(
                "materialize_retry_delay must be at most 60s".into(),
            ));
        }
        let downloads = self.downloads_dir_name.trim();
        if downloads.is_empty() || downloads.contains(&['/', '\\'][..]) {
            return Err(SyncError::InvalidConfig(format!(
                "downloads_dir_name {:?} must be a single directory name",
                self.downloads_dir_name
            )));
        }
        Ok(())
    }
}
