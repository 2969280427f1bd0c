//! # Core Configuration Module
//!
//! Builder-based configuration for the photo sync core.
//!
//! ## Overview
//!
//! [`CoreConfigBuilder`] collects paths, the target repository and the host
//! bridges, then validates everything in [`build()`](CoreConfigBuilder::build)
//! so that a misconfigured host fails at startup instead of mid-sync.
//!
//! ## Required
//!
//! - `database_path` - SQLite file for the local index
//! - `cache_dir` - root of the on-disk content cache
//! - `repository` - owner, repo and branch used as remote storage
//! - `MediaLibrary` - device photo library (always host supplied)
//! - either a `RemoteStorage` implementation or an access token for the
//!   built-in GitHub provider
//!
//! ## Optional (with platform defaults)
//!
//! - `HttpClient` - desktop default: reqwest
//! - `FileSystemAccess` - desktop default: tokio fs
//!
//! With the `desktop-shims` feature the desktop defaults are injected when
//! not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/index.db")
//!     .cache_dir("/path/to/cache")
//!     .repository("octo", "photos", "main")
//!     .access_token(token)
//!     .media_library(Arc::new(HostLibrary::new()))
//!     .cache_size_mb(512)
//!     .auto_delete_after_sync(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{FileSystemAccess, HttpClient, MediaLibrary, RemoteStorage, RepoRef};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_CACHE_SIZE_MB: usize = 512;
const DEFAULT_PRELOAD_ENTRY_TARGET: usize = 600;

/// Everything needed to construct the core services.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Root of the content cache.
    pub cache_dir: PathBuf,

    /// Byte budget of the content cache, in megabytes.
    pub cache_size_mb: usize,

    /// Remote repository used as storage.
    pub repository: RepoRef,

    /// Token for the built-in GitHub provider. Unused when `remote_storage`
    /// is injected.
    pub access_token: Option<String>,

    /// Remote storage override.
    pub remote_storage: Option<Arc<dyn RemoteStorage>>,

    pub http_client: Option<Arc<dyn HttpClient>>,

    pub file_system: Option<Arc<dyn FileSystemAccess>>,

    pub media_library: Arc<dyn MediaLibrary>,

    /// Number of remote metadata entries to load eagerly at startup.
    pub preload_entry_target: usize,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("cache_size_mb", &self.cache_size_mb)
            .field("repository", &self.repository)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field(
                "remote_storage",
                &self
                    .remote_storage
                    .as_ref()
                    .map(|_| "RemoteStorage { ... }"),
            )
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field(
                "file_system",
                &self
                    .file_system
                    .as_ref()
                    .map(|_| "FileSystemAccess { ... }"),
            )
            .field("media_library", &"MediaLibrary { ... }")
            .field("preload_entry_target", &self.preload_entry_target)
            .field("features", &self.features)
            .finish()
    }
}

/// Optional behavior toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Delete device assets once their upload batch finishes.
    pub auto_delete_after_sync: bool,

    /// Warm preview thumbnails for preloaded remote entries after startup.
    pub prefetch_previews: bool,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Cache budget in bytes.
    pub fn cache_budget_bytes(&self) -> u64 {
        self.cache_size_mb as u64 * 1024 * 1024
    }

    /// Checks:
    /// - paths are not empty
    /// - cache size is within (0, 100 GB]
    /// - repository coordinates are not empty
    /// - a way to reach the remote is configured
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.cache_size_mb == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 MB".to_string(),
            ));
        }

        if self.cache_size_mb > 100_000 {
            return Err(Error::Config(
                "Cache size exceeds maximum of 100GB (100,000 MB)".to_string(),
            ));
        }

        let repo = &self.repository;
        if repo.owner.trim().is_empty() || repo.repo.trim().is_empty() || repo.branch.trim().is_empty()
        {
            return Err(Error::Config(
                "Repository owner, name and branch must all be set".to_string(),
            ));
        }

        if self.remote_storage.is_none() {
            if self.access_token.as_deref().map_or(true, str::is_empty) {
                return Err(Error::capability_missing(
                    "RemoteStorage",
                    "Provide an access token for the GitHub provider \
                     or inject a RemoteStorage implementation.",
                ));
            }
            if self.http_client.is_none() {
                return Err(http_client_missing_error());
            }
        }

        if self.file_system.is_none() {
            return Err(Error::capability_missing(
                "FileSystemAccess",
                "The content cache needs file system access. \
                 Desktop: enable the 'desktop-shims' feature. \
                 Mobile: inject the sandboxed file system adapter.",
            ));
        }

        Ok(())
    }
}

fn http_client_missing_error() -> Error {
    Error::capability_missing(
        "HttpClient",
        "No HTTP client implementation provided. \
         Desktop: enable the 'desktop-shims' feature. \
         Mobile: inject the platform-native adapter.",
    )
}

#[cfg(feature = "desktop-shims")]
fn default_http_client() -> Option<Arc<dyn HttpClient>> {
    Some(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_http_client() -> Option<Arc<dyn HttpClient>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn default_file_system() -> Option<Arc<dyn FileSystemAccess>> {
    Some(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn default_file_system() -> Option<Arc<dyn FileSystemAccess>> {
    None
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    cache_size_mb: Option<usize>,
    repository: Option<RepoRef>,
    access_token: Option<String>,
    remote_storage: Option<Arc<dyn RemoteStorage>>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    media_library: Option<Arc<dyn MediaLibrary>>,
    preload_entry_target: Option<usize>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the SQLite database path.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/data/index.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Defaults to 512 MB.
    pub fn cache_size_mb(mut self, size_mb: usize) -> Self {
        self.cache_size_mb = Some(size_mb);
        self
    }

    pub fn repository(
        mut self,
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        self.repository = Some(RepoRef::new(owner, repo, branch));
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Replace the built-in GitHub provider.
    pub fn remote_storage(mut self, remote: Arc<dyn RemoteStorage>) -> Self {
        self.remote_storage = Some(remote);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn media_library(mut self, library: Arc<dyn MediaLibrary>) -> Self {
        self.media_library = Some(library);
        self
    }

    /// Entry count loaded eagerly from remote metadata. Defaults to 600.
    pub fn preload_entry_target(mut self, entries: usize) -> Self {
        self.preload_entry_target = Some(entries);
        self
    }

    pub fn auto_delete_after_sync(mut self, enabled: bool) -> Self {
        self.features.auto_delete_after_sync = enabled;
        self
    }

    pub fn prefetch_previews(mut self, enabled: bool) -> Self {
        self.features.prefetch_previews = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when a required field is missing or out of range
    /// - [`Error::CapabilityMissing`] when a required bridge is absent
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let repository = self.repository.ok_or_else(|| {
            Error::Config("Repository is required. Use .repository() to set it.".to_string())
        })?;

        let media_library = self.media_library.ok_or_else(|| {
            Error::capability_missing(
                "MediaLibrary",
                "The host must inject its device media library adapter.",
            )
        })?;

        let config = CoreConfig {
            database_path,
            cache_dir,
            cache_size_mb: self.cache_size_mb.unwrap_or(DEFAULT_CACHE_SIZE_MB),
            repository,
            access_token: self.access_token,
            http_client: self.http_client.or_else(default_http_client),
            file_system: self.file_system.or_else(default_file_system),
            remote_storage: self.remote_storage,
            media_library,
            preload_entry_target: self
                .preload_entry_target
                .unwrap_or(DEFAULT_PRELOAD_ENTRY_TARGET),
            features: self.features,
        };

        config.validate()?;
        Ok(config)
    }
}
