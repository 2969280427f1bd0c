//! Cache configuration and policies

use crate::error::{CacheError, Result};
use std::path::PathBuf;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the local content cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root under which `<owner>/<repo>/<branch>/<fingerprint>` directories live
    pub root_dir: PathBuf,

    /// Byte budget per repository (default: 512MB)
    pub max_cache_size_bytes: u64,

    /// Age after which a preview-only entry is dropped (default: 7 days)
    pub preview_max_age: Duration,

    /// Age after which an entry holding an original is dropped (default: 30 days)
    pub original_max_age: Duration,

    /// Minimum time between two eviction passes for the same repository
    pub eviction_interval: Duration,

    /// Minimum time between two `lastAccessed` writes for the same entry
    pub touch_interval: Duration,

    /// Longest preview edge in pixels
    pub preview_max_dimension: u32,

    /// JPEG quality for rendered previews (1-100)
    pub preview_quality: u8,

    /// Concurrent fetches during preview prefetch
    pub prefetch_workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("photo-cache"),
            max_cache_size_bytes: 512 * 1024 * 1024,
            preview_max_age: 7 * DAY,
            original_max_age: 30 * DAY,
            eviction_interval: Duration::from_secs(10 * 60),
            touch_interval: Duration::from_secs(5 * 60),
            preview_max_dimension: 1024,
            preview_quality: 80,
            prefetch_workers: 4,
        }
    }
}

impl CacheConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = bytes;
        self
    }

    pub fn with_max_ages(mut self, preview: Duration, original: Duration) -> Self {
        self.preview_max_age = preview;
        self.original_max_age = original;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn with_touch_interval(mut self, interval: Duration) -> Self {
        self.touch_interval = interval;
        self
    }

    pub fn with_preview(mut self, max_dimension: u32, quality: u8) -> Self {
        self.preview_max_dimension = max_dimension;
        self.preview_quality = quality;
        self
    }

    pub fn with_prefetch_workers(mut self, workers: usize) -> Self {
        self.prefetch_workers = workers;
        self
    }

    /// Size the eviction pass shrinks the cache to once it runs over budget.
    pub fn eviction_target_bytes(&self) -> u64 {
        self.max_cache_size_bytes / 10 * 8
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(CacheError::InvalidConfig(
                "root_dir cannot be empty".to_string(),
            ));
        }

        if self.max_cache_size_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "max_cache_size_bytes must be greater than 0".to_string(),
            ));
        }

        if self.preview_max_age > self.original_max_age {
            return Err(CacheError::InvalidConfig(
                "preview_max_age must not exceed original_max_age".to_string(),
            ));
        }

        if self.preview_max_dimension == 0 {
            return Err(CacheError::InvalidConfig(
                "preview_max_dimension must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.preview_quality) {
            return Err(CacheError::InvalidConfig(
                "preview_quality must be between 1 and 100".to_string(),
            ));
        }

        if self.prefetch_workers == 0 {
            return Err(CacheError::InvalidConfig(
                "prefetch_workers must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_cache_size_bytes, 512 * 1024 * 1024);
        assert!(config.original_max_age > config.preview_max_age);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new("/tmp/cache")
            .with_max_size(1000)
            .with_preview(256, 70)
            .with_prefetch_workers(2);

        assert_eq!(config.root_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(config.max_cache_size_bytes, 1000);
        assert_eq!(config.eviction_target_bytes(), 800);
        assert_eq!(config.preview_max_dimension, 256);
        assert_eq!(config.prefetch_workers, 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().with_max_size(0).validate().is_err());
        assert!(CacheConfig::new("").validate().is_err());
        assert!(CacheConfig::default().with_preview(0, 80).validate().is_err());
        assert!(CacheConfig::default().with_preview(512, 0).validate().is_err());
        assert!(CacheConfig::default()
            .with_prefetch_workers(0)
            .validate()
            .is_err());
        assert!(CacheConfig::default()
            .with_max_ages(Duration::from_secs(10), Duration::from_secs(5))
            .validate()
            .is_err());
    }
}
