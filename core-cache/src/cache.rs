//! # Content Cache
//!
//! On-disk cache of previews and originals pulled from the remote.
//!
//! ```text
//! <root>/<owner>/<repo>/<branch>/<fingerprint>/
//!     manifest.json
//!     preview.jpg        (optional)
//!     original.<ext>     (optional)
//! ```
//!
//! Every read or write of one entry directory happens under that entry's
//! [`KeyedLock`] key, so a UI-triggered fetch and an eviction pass never touch
//! the same directory at once. Eviction walks entries one lock at a time and
//! never holds more than one key.

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::lock::KeyedLock;
use crate::manifest::{cache_tag, CacheManifest, CachedFile, MANIFEST_FILE, PREVIEW_FILE};
use crate::paths::fetch_candidates;
use crate::preview::render_preview;
use crate::stats::{CacheStats, EvictionReport, PrefetchReport};
use bridge_traits::remote::sanitize_segment;
use bridge_traits::{Clock, FileSystemAccess, RemoteStorage, RepoRef};
use bytes::Bytes;
use core_metadata::identity::FALLBACK_EXTENSION;
use core_metadata::CachedEntry;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

enum ManifestState {
    Missing,
    Corrupt,
    Valid(CacheManifest),
}

struct EvictionCandidate {
    name: String,
    dir: PathBuf,
    last_use: i64,
    has_original: bool,
    size: u64,
    protected: bool,
}

/// Per-repository cache of remote media.
pub struct ContentCache {
    config: CacheConfig,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    locks: KeyedLock,
    last_eviction: Mutex<HashMap<String, i64>>,
    event_bus: Option<EventBus>,
}

impl ContentCache {
    pub fn new(
        config: CacheConfig,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            fs,
            clock,
            locks: KeyedLock::new(),
            last_eviction: Mutex::new(HashMap::new()),
            event_bus: None,
        })
    }

    /// Mirror invalidation and eviction onto `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn repo_dir(&self, repo: &RepoRef) -> PathBuf {
        let [owner, name, branch] = repo.cache_segments();
        self.config.root_dir.join(owner).join(name).join(branch)
    }

    pub fn entry_dir(&self, repo: &RepoRef, fingerprint: &str) -> PathBuf {
        self.repo_dir(repo).join(sanitize_segment(fingerprint))
    }

    fn lock_key(repo: &RepoRef, dir_name: &str) -> String {
        format!("{}/{}", repo.cache_key(), dir_name)
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Cache(event)).ok();
        }
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Path of a preview for `entry`, rendering one from the remote file when
    /// the cache holds none or holds one for a different tag.
    #[instrument(skip(self, remote, entry), fields(fingerprint = %entry.fingerprint))]
    pub async fn ensure_preview(
        &self,
        remote: &dyn RemoteStorage,
        entry: &CachedEntry,
    ) -> Result<PathBuf> {
        let repo = remote.repo();
        let dir_name = sanitize_segment(&entry.fingerprint);
        let dir = self.repo_dir(repo).join(&dir_name);

        let (path, stored) = {
            let _guard = self.locks.acquire(&Self::lock_key(repo, &dir_name)).await;
            self.ensure_preview_locked(remote, entry, &dir).await?
        };

        if stored {
            self.evict_after_store(repo, &dir_name).await;
        }
        Ok(path)
    }

    async fn ensure_preview_locked(
        &self,
        remote: &dyn RemoteStorage,
        entry: &CachedEntry,
        dir: &Path,
    ) -> Result<(PathBuf, bool)> {
        let now = self.now();
        let mut manifest = self.open_manifest(dir, entry).await?;

        if let Some(preview) = manifest.preview.clone() {
            let path = dir.join(&preview.file);
            if self.fs.exists(&path).await? {
                if manifest.access_due(now, self.touch_interval_ms()) {
                    manifest.last_accessed = Some(now);
                    self.write_manifest(dir, &manifest).await?;
                }
                return Ok((path, false));
            }
            manifest.preview = None;
        }

        let source = match self.read_cached_original(dir, &manifest).await {
            Some(bytes) => bytes,
            None => self.fetch(remote, entry).await?,
        };

        let max_dimension = self.config.preview_max_dimension;
        let quality = self.config.preview_quality;
        let rendered =
            tokio::task::spawn_blocking(move || render_preview(&source, max_dimension, quality))
                .await
                .map_err(|e| CacheError::Internal(format!("preview task failed: {}", e)))?;

        let path = dir.join(PREVIEW_FILE);
        self.fs.create_dir_all(dir).await?;
        self.fs.write_file(&path, rendered).await?;

        manifest.preview = Some(CachedFile {
            file: PREVIEW_FILE.to_string(),
            updated_at: now,
        });
        manifest.last_accessed = Some(now);
        if let Some(original) = &manifest.original {
            if !self.fs.exists(&dir.join(&original.file)).await? {
                manifest.original = None;
            }
        }
        self.write_manifest(dir, &manifest).await?;

        debug!(path = ?path, "Stored preview");
        Ok((path, true))
    }

    /// Path of the untransformed remote file for `entry`.
    #[instrument(skip(self, remote, entry), fields(fingerprint = %entry.fingerprint))]
    pub async fn ensure_original(
        &self,
        remote: &dyn RemoteStorage,
        entry: &CachedEntry,
    ) -> Result<PathBuf> {
        let repo = remote.repo();
        let dir_name = sanitize_segment(&entry.fingerprint);
        let dir = self.repo_dir(repo).join(&dir_name);

        let (path, stored) = {
            let _guard = self.locks.acquire(&Self::lock_key(repo, &dir_name)).await;
            self.ensure_original_locked(remote, entry, &dir).await?
        };

        if stored {
            self.evict_after_store(repo, &dir_name).await;
        }
        Ok(path)
    }

    async fn ensure_original_locked(
        &self,
        remote: &dyn RemoteStorage,
        entry: &CachedEntry,
        dir: &Path,
    ) -> Result<(PathBuf, bool)> {
        let now = self.now();
        let mut manifest = self.open_manifest(dir, entry).await?;

        if let Some(original) = manifest.original.clone() {
            let path = dir.join(&original.file);
            if self.fs.exists(&path).await? {
                if manifest.view_due(now, self.touch_interval_ms()) {
                    manifest.last_viewed = Some(now);
                    self.write_manifest(dir, &manifest).await?;
                }
                return Ok((path, false));
            }
            manifest.original = None;
        }

        let content = self.fetch(remote, entry).await?;
        let file = original_file_name(&entry.entry.repo_path);
        let path = dir.join(&file);
        self.fs.create_dir_all(dir).await?;
        self.fs.write_file(&path, content).await?;

        manifest.original = Some(CachedFile {
            file,
            updated_at: now,
        });
        manifest.last_viewed = Some(now);
        if let Some(preview) = &manifest.preview {
            if !self.fs.exists(&dir.join(&preview.file)).await? {
                manifest.preview = None;
            }
        }
        self.write_manifest(dir, &manifest).await?;

        debug!(path = ?path, "Stored original");
        Ok((path, true))
    }

    /// Render previews for `entries` with bounded concurrency. Failures are
    /// counted, not returned.
    #[instrument(skip(self, remote, entries), fields(count = entries.len()))]
    pub async fn prefetch_previews(
        &self,
        remote: &dyn RemoteStorage,
        entries: &[CachedEntry],
    ) -> PrefetchReport {
        let outcomes: Vec<bool> = stream::iter(entries)
            .map(|entry| async move {
                match self.ensure_preview(remote, entry).await {
                    Ok(_) => true,
                    Err(e) => {
                        debug!(fingerprint = %entry.fingerprint, error = %e, "Prefetch failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.config.prefetch_workers)
            .collect()
            .await;

        let ready = outcomes.iter().filter(|ok| **ok).count();
        PrefetchReport {
            ready,
            failed: outcomes.len() - ready,
        }
    }

    async fn fetch(&self, remote: &dyn RemoteStorage, entry: &CachedEntry) -> Result<Bytes> {
        let candidates = fetch_candidates(
            &entry.entry.repo_path,
            entry.entry.preview_repo_path.as_deref(),
        );

        let mut last_error = None;
        for path in &candidates {
            match remote.get_file(path).await {
                Ok(Some(file)) => {
                    debug!(path = %path, size = file.content.len(), "Fetched remote content");
                    return Ok(file.content);
                }
                Ok(None) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(path = %path, error = %e, "Remote fetch failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(CacheError::Unavailable {
                fingerprint: entry.fingerprint.clone(),
                attempts: candidates.len(),
            }),
        }
    }

    async fn read_cached_original(&self, dir: &Path, manifest: &CacheManifest) -> Option<Bytes> {
        let original = manifest.original.as_ref()?;
        match self.fs.read_file(&dir.join(&original.file)).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(error = %e, "Cached original unreadable, fetching remote copy");
                None
            }
        }
    }

    // ========================================================================
    // Manifest I/O
    // ========================================================================

    async fn read_manifest(&self, dir: &Path) -> ManifestState {
        match self.fs.read_file(&dir.join(MANIFEST_FILE)).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(manifest) => ManifestState::Valid(manifest),
                Err(_) => ManifestState::Corrupt,
            },
            Err(e) if e.is_not_found() => ManifestState::Missing,
            Err(_) => ManifestState::Corrupt,
        }
    }

    /// Manifest for `entry`, discarding the directory when it belongs to a
    /// different tag or cannot be read.
    async fn open_manifest(&self, dir: &Path, entry: &CachedEntry) -> Result<CacheManifest> {
        let tag = cache_tag(&entry.entry);

        match self.read_manifest(dir).await {
            ManifestState::Valid(manifest)
                if manifest.tag == tag && manifest.fingerprint == entry.fingerprint =>
            {
                return Ok(manifest);
            }
            ManifestState::Valid(_) => {
                debug!(dir = ?dir, "Cache tag changed, discarding entry");
                self.remove_dir(dir).await?;
            }
            ManifestState::Corrupt => {
                warn!(dir = ?dir, "Unreadable cache manifest, discarding entry");
                self.remove_dir(dir).await?;
            }
            ManifestState::Missing => {}
        }

        Ok(CacheManifest::new(entry.fingerprint.clone(), tag))
    }

    async fn write_manifest(&self, dir: &Path, manifest: &CacheManifest) -> Result<()> {
        let body = serde_json::to_vec(manifest)?;
        let staged = dir.join(format!("{}.tmp", MANIFEST_FILE));
        self.fs.write_file(&staged, Bytes::from(body)).await?;
        self.fs.rename(&staged, &dir.join(MANIFEST_FILE)).await?;
        Ok(())
    }

    async fn remove_dir(&self, dir: &Path) -> Result<()> {
        match self.fs.delete_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn touch_interval_ms(&self) -> i64 {
        self.config.touch_interval.as_millis() as i64
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Drop the cached files of one fingerprint. Returns whether anything was
    /// cached.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn invalidate(&self, repo: &RepoRef, fingerprint: &str) -> Result<bool> {
        let dir_name = sanitize_segment(fingerprint);
        let dir = self.repo_dir(repo).join(&dir_name);

        let existed = {
            let _guard = self.locks.acquire(&Self::lock_key(repo, &dir_name)).await;
            let existed = self.fs.exists(&dir).await?;
            if existed {
                self.remove_dir(&dir).await?;
            }
            existed
        };

        self.emit(CacheEvent::Invalidated {
            repo: repo.cache_key(),
            fingerprints: vec![fingerprint.to_string()],
        });
        Ok(existed)
    }

    /// Remove every cached entry of `repo`.
    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn clear_repo(&self, repo: &RepoRef) -> Result<()> {
        self.remove_dir(&self.repo_dir(repo)).await?;
        self.last_eviction.lock().remove(&repo.cache_key());

        info!("Cleared content cache");
        self.emit(CacheEvent::Cleared {
            repo: repo.cache_key(),
        });
        Ok(())
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Run an eviction pass unless one ran for `repo` within the eviction
    /// interval.
    pub async fn evict(&self, repo: &RepoRef) -> Result<EvictionReport> {
        self.run_eviction(repo, None, false).await
    }

    /// Run an eviction pass regardless of when the last one ran.
    pub async fn evict_now(&self, repo: &RepoRef) -> Result<EvictionReport> {
        self.run_eviction(repo, None, true).await
    }

    async fn evict_after_store(&self, repo: &RepoRef, stored: &str) {
        if let Err(e) = self.run_eviction(repo, Some(stored), false).await {
            warn!(error = %e, "Eviction after store failed");
        }
    }

    fn claim_eviction_slot(&self, repo: &RepoRef, now: i64) -> bool {
        let interval = self.config.eviction_interval.as_millis() as i64;
        let mut last = self.last_eviction.lock();
        let key = repo.cache_key();

        match last.get(&key) {
            Some(&previous) if now - previous < interval => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }

    #[instrument(skip(self, protect), fields(repo = %repo))]
    async fn run_eviction(
        &self,
        repo: &RepoRef,
        protect: Option<&str>,
        force: bool,
    ) -> Result<EvictionReport> {
        let now = self.now();
        if !force && !self.claim_eviction_slot(repo, now) {
            return Ok(EvictionReport::throttled());
        }

        let repo_dir = self.repo_dir(repo);
        let children = match self.fs.list_directory(&repo_dir).await {
            Ok(children) => children,
            Err(e) if e.is_not_found() => return Ok(EvictionReport::default()),
            Err(e) => return Err(e.into()),
        };

        let mut report = EvictionReport::default();
        let mut survivors = Vec::new();

        for dir in children {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if !self.fs.metadata(&dir).await?.is_directory {
                continue;
            }

            let _guard = self.locks.acquire(&Self::lock_key(repo, &name)).await;
            let size = self.fs.directory_size(&dir).await.unwrap_or(0);
            let protected = protect == Some(name.as_str());

            match self.read_manifest(&dir).await {
                ManifestState::Valid(manifest) => {
                    let max_age = if manifest.has_original() {
                        self.config.original_max_age
                    } else {
                        self.config.preview_max_age
                    };
                    let last_use = manifest.last_use();

                    if !protected && now - last_use > max_age.as_millis() as i64 {
                        if self.remove_for_eviction(&dir).await {
                            report.expired_removed += 1;
                            report.bytes_freed += size;
                        }
                        continue;
                    }

                    survivors.push(EvictionCandidate {
                        name,
                        dir,
                        last_use,
                        has_original: manifest.has_original(),
                        size,
                        protected,
                    });
                }
                ManifestState::Missing | ManifestState::Corrupt if !protected => {
                    if self.remove_for_eviction(&dir).await {
                        report.orphans_removed += 1;
                        report.bytes_freed += size;
                    }
                }
                _ => {}
            }
        }

        let mut total: u64 = survivors.iter().map(|c| c.size).sum();
        if total > self.config.max_cache_size_bytes {
            let target = self.config.eviction_target_bytes();
            // Oldest first; among equals, preview-only entries go before
            // entries holding an original.
            survivors.sort_by(|a, b| {
                a.last_use
                    .cmp(&b.last_use)
                    .then(a.has_original.cmp(&b.has_original))
            });

            for candidate in survivors.iter().filter(|c| !c.protected) {
                if total <= target {
                    break;
                }

                let _guard = self
                    .locks
                    .acquire(&Self::lock_key(repo, &candidate.name))
                    .await;
                if let ManifestState::Valid(current) = self.read_manifest(&candidate.dir).await {
                    if current.last_use() > candidate.last_use {
                        continue;
                    }
                }

                if self.remove_for_eviction(&candidate.dir).await {
                    total = total.saturating_sub(candidate.size);
                    report.over_budget_removed += 1;
                    report.bytes_freed += candidate.size;
                }
            }
        }
        report.remaining_bytes = total;

        if report.removed() > 0 {
            info!(
                removed = report.removed(),
                bytes_freed = report.bytes_freed,
                remaining = report.remaining_bytes,
                "Evicted cache entries"
            );
            self.emit(CacheEvent::Evicted {
                repo: repo.cache_key(),
                entries: report.removed() as u64,
                bytes_freed: report.bytes_freed,
            });
        }

        Ok(report)
    }

    async fn remove_for_eviction(&self, dir: &Path) -> bool {
        match self.remove_dir(dir).await {
            Ok(()) => true,
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Failed to evict cache entry");
                false
            }
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub async fn stats(&self, repo: &RepoRef) -> Result<CacheStats> {
        let mut stats = CacheStats {
            budget_bytes: self.config.max_cache_size_bytes,
            calculated_at: self.now(),
            ..CacheStats::default()
        };

        let children = match self.fs.list_directory(&self.repo_dir(repo)).await {
            Ok(children) => children,
            Err(e) if e.is_not_found() => return Ok(stats),
            Err(e) => return Err(e.into()),
        };

        for dir in children {
            if !self.fs.metadata(&dir).await?.is_directory {
                continue;
            }

            stats.entries += 1;
            stats.total_bytes += self.fs.directory_size(&dir).await?;
            match self.read_manifest(&dir).await {
                ManifestState::Valid(manifest) => {
                    if manifest.preview.is_some() {
                        stats.previews += 1;
                    }
                    if manifest.original.is_some() {
                        stats.originals += 1;
                    }
                }
                _ => stats.orphaned += 1,
            }
        }

        Ok(stats)
    }
}

/// `original.<ext>` with the extension taken from the remote path.
fn original_file_name(repo_path: &str) -> String {
    let extension: String = Path::new(repo_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    if extension.is_empty() {
        format!("original.{}", FALLBACK_EXTENSION)
    } else {
        format!("original.{}", extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_file_name() {
        assert_eq!(original_file_name("images/Trip/IMG_1.HEIC"), "original.heic");
        assert_eq!(original_file_name("images/Trip/noext"), "original.jpg");
        assert_eq!(original_file_name("images/a.j p?g"), "original.jpg");
    }
}
