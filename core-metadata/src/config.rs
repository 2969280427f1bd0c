//! Metadata store tuning.

use serde::{Deserialize, Serialize};

use crate::bucket::ShardLayout;
use crate::error::{MetadataError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub manifest_path: String,
    pub layout: ShardLayout,
    /// Bootstrap loads shards, freshest first, until this many entries are
    /// in memory.
    pub preload_entry_target: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            manifest_path: "meta/manifest.json".to_string(),
            layout: ShardLayout::default(),
            preload_entry_target: 600,
        }
    }
}

impl MetadataConfig {
    pub fn with_manifest_path(mut self, path: impl Into<String>) -> Self {
        self.manifest_path = path.into();
        self
    }

    pub fn with_layout(mut self, layout: ShardLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_preload_entry_target(mut self, target: usize) -> Self {
        self.preload_entry_target = target;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.manifest_path.trim().is_empty() {
            return Err(MetadataError::InvalidConfig("manifest_path is empty".into()));
        }
        if self.layout.root.trim().is_empty() || self.layout.root.contains("..") {
            return Err(MetadataError::InvalidConfig(format!(
                "invalid shard root '{}'",
                self.layout.root
            )));
        }
        if self.layout.file_name.trim().is_empty() || self.layout.file_name.contains('/') {
            return Err(MetadataError::InvalidConfig(format!(
                "invalid shard file name '{}'",
                self.layout.file_name
            )));
        }
        if self.layout.bucket_from_path(&self.manifest_path).is_some() {
            return Err(MetadataError::InvalidConfig(
                "manifest_path collides with a shard path".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = MetadataConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preload_entry_target, 600);
    }

    #[test]
    fn test_manifest_cannot_shadow_a_shard() {
        let config = MetadataConfig::default().with_manifest_path("meta/unknown/entries.json");
        assert!(matches!(config.validate(), Err(MetadataError::InvalidConfig(_))));
    }
}
