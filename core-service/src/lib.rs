//! Core service façade and bootstrap helpers.
//!
//! Wires the host-provided bridges from a [`CoreConfig`] into the local index,
//! the remote metadata mirror, the content cache and the sync orchestrator.
//! Desktop hosts typically enable the `desktop-shims` feature so the HTTP
//! client and file system adapters are filled in from `bridge-desktop`.
//!
//! ```rust,ignore
//! let config = CoreConfig::builder()
//!     .database_path("/data/index.db")
//!     .cache_dir("/cache")
//!     .repository("octo", "photos", "main")
//!     .access_token(token)
//!     .media_library(library)
//!     .build()?;
//!
//! let service = PhotoVaultService::new(config).await?;
//! service.start().await?;
//! service.orchestrator().sync_all(UploadOptions::default()).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::{Clock, RemoteStorage, RepoRef, SystemClock};
use core_cache::{CacheConfig, CacheStats, ContentCache, EvictionReport};
use core_index::{DatabaseConfig, LocalIndex};
use core_metadata::{MetadataConfig, MetadataStore};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{SyncConfig, SyncOrchestrator, SyncSignals};
use provider_github::{GitHubConfig, GitHubConnector};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument};

pub use core_runtime::config::{CoreConfigBuilder, FeatureFlags};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct PhotoVaultService {
    features: FeatureFlags,
    remote: Arc<dyn RemoteStorage>,
    index: LocalIndex,
    metadata: Arc<MetadataStore>,
    cache: Arc<ContentCache>,
    event_bus: EventBus,
    orchestrator: SyncOrchestrator,
}

impl PhotoVaultService {
    /// Build every core component from `config`.
    ///
    /// Uses the injected `RemoteStorage` when present, otherwise a
    /// [`GitHubConnector`] over the configured HTTP client.
    #[instrument(skip(config), fields(repo = %config.repository))]
    pub async fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let fs = config.file_system.clone().ok_or_else(|| {
            CoreError::InitializationFailed("file system access is not configured".to_string())
        })?;
        let remote = build_remote(&config)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let event_bus = EventBus::default();

        let index = LocalIndex::open(DatabaseConfig::new(&config.database_path)).await?;

        let metadata = Arc::new(MetadataStore::new(
            Arc::clone(&remote),
            Arc::clone(&clock),
            MetadataConfig::default().with_preload_entry_target(config.preload_entry_target),
        )?);

        let cache = Arc::new(
            ContentCache::new(
                CacheConfig::new(&config.cache_dir).with_max_size(config.cache_budget_bytes()),
                Arc::clone(&fs),
                Arc::clone(&clock),
            )?
            .with_event_bus(event_bus.clone()),
        );

        let signals = Arc::new(SyncSignals::new().with_event_bus(event_bus.clone()));
        let orchestrator = SyncOrchestrator::new(
            SyncConfig::default().with_auto_delete(config.features.auto_delete_after_sync),
            Arc::clone(&remote),
            Arc::clone(&config.media_library),
            index.clone(),
            Arc::clone(&metadata),
            Arc::clone(&cache),
            fs,
            clock,
            signals,
        )?;

        info!("Photo vault core initialized");
        Ok(Self {
            features: config.features,
            remote,
            index,
            metadata,
            cache,
            event_bus,
            orchestrator,
        })
    }

    /// Load the remote manifest and the freshest shards, then warm previews
    /// when enabled.
    pub async fn start(&self) -> Result<()> {
        self.orchestrator.bootstrap_remote_entries().await?;
        info!(
            entries = self.metadata.cached_count().await,
            "Remote metadata loaded"
        );

        if self.features.prefetch_previews {
            self.spawn_preview_prefetch();
        }
        Ok(())
    }

    #[cfg(not(feature = "preview-prefetch"))]
    fn spawn_preview_prefetch(&self) {
        tracing::debug!("Preview prefetch requested but not compiled in");
    }

    #[cfg(feature = "preview-prefetch")]
    fn spawn_preview_prefetch(&self) {
        let remote = Arc::clone(&self.remote);
        let metadata = Arc::clone(&self.metadata);
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let entries = metadata.cached_entries(0, None).await;
            let report = cache.prefetch_previews(remote.as_ref(), &entries).await;
            tracing::debug!(?report, "Preview prefetch finished");
        });
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn index(&self) -> &LocalIndex {
        &self.index
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn repository(&self) -> &RepoRef {
        self.remote.repo()
    }

    pub fn features(&self) -> FeatureFlags {
        self.features
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Local path of the preview for a remote entry, rendering it on a miss.
    pub async fn preview(&self, fingerprint: &str) -> Result<Option<PathBuf>> {
        let Some(entry) = self.metadata.get_entry(fingerprint).await else {
            return Ok(None);
        };
        Ok(Some(
            self.cache.ensure_preview(self.remote.as_ref(), &entry).await?,
        ))
    }

    /// Directory downloads are written to. `None` saves to the device library.
    pub async fn set_download_directory(&self, dir: Option<&str>) -> Result<()> {
        Ok(self.index.set_download_directory(dir).await?)
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.stats(self.remote.repo()).await?)
    }

    pub async fn evict_cache(&self) -> Result<EvictionReport> {
        Ok(self.cache.evict_now(self.remote.repo()).await?)
    }
}

fn build_remote(config: &CoreConfig) -> Result<Arc<dyn RemoteStorage>> {
    if let Some(remote) = &config.remote_storage {
        return Ok(Arc::clone(remote));
    }

    let (Some(token), Some(http)) = (&config.access_token, &config.http_client) else {
        return Err(CoreError::InitializationFailed(
            "no remote storage, access token or HTTP client configured".to_string(),
        ));
    };
    let connector = GitHubConnector::new(
        GitHubConfig::new(config.repository.clone(), token.clone()),
        Arc::clone(http),
    )?;
    Ok(Arc::new(connector))
}
