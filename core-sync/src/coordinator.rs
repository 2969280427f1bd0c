//! # Sync Orchestrator
//!
//! Composes the local index, the remote storage bridge, the sharded metadata
//! store and the content cache into the sync workflows the UI layer calls.
//!
//! ## Overview
//!
//! Every mutating operation is submitted to the orchestrator's [`JobQueue`]
//! and awaited, so at most one batch touches the remote at a time. That
//! serialization is what keeps this device's conditional writes to the
//! metadata manifest from racing each other. Within a batch, assets are
//! processed one after another.
//!
//! `cancel`, `status` and the read-only queries bypass the queue.
//!
//! ## Workflow
//!
//! ### Upload batch
//! 1. Check media library permission (abort before any remote write if denied)
//! 2. Resolve candidate assets, skip blocklisted or already uploaded ones
//! 3. Drive each asset through the step machine in [`crate::job`]
//! 4. Check the cancellation token between assets and before each upload
//! 5. Queue uploaded assets for device deletion when auto-delete is enabled
//! 6. Publish index changes, status and the batch summary
//!
//! ### Delete
//! 1. Delete the remote file (no-op when the remote has no version of it)
//! 2. Remove the metadata entries, grouped by shard
//! 3. Drop the local records and blocklist the fingerprints
//! 4. Invalidate cached content
//!
//! ### Download
//! Fetch the original through the content cache and write it to the user's
//! download directory, the device library, or app-private storage, in that
//! order of preference.
//!
//! ### Reconcile
//! Load every metadata shard, then drop uploaded local records the remote no
//! longer lists.
//!
//! ### Reset
//! Replace the remote branch with an empty commit, then wipe the metadata
//! mirror, the local index (blocklist included) and the content cache.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let report = orchestrator.sync_all(UploadOptions::default()).await?;
//! println!("uploaded {} of {}", report.uploaded, report.attempted);
//!
//! let _subscription = orchestrator
//!     .signals()
//!     .status_changed
//!     .subscribe(|status| println!("{}%", status.percent()));
//! ```

use crate::config::SyncConfig;
use crate::job::{
    AssetFailure, AssetOutcome, AssetStatus, BatchId, BatchKind, BatchReport, BatchSummary, DeleteReport,
    DownloadReport, ReconcileReport, SavedFile, SavedLocation, Step, StepTable, SyncState,
    SyncStatus, UploadOptions,
};
use crate::queue::JobQueue;
use crate::signals::SyncSignals;
use crate::{Result, SyncError};
use bridge_traits::{Clock, DeviceAsset, FileSystemAccess, MediaLibrary, RemoteStorage};
use bytes::Bytes;
use core_cache::ContentCache;
use core_index::{keys, LocalIndex};
use core_metadata::identity::{fingerprint_for, sanitize_component, FALLBACK_EXTENSION};
use core_metadata::{CachedEntry, MetadataStore};
use core_runtime::events::{CacheEvent, IndexEvent, SyncEvent};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Which device assets an upload batch starts from.
pub(crate) enum UploadSource {
    All,
    Assets(Vec<String>),
}

/// The batch currently holding the queue.
struct ActiveBatch {
    batch_id: BatchId,
    kind: BatchKind,
    cancellation_token: CancellationToken,
}

/// Handle a running workflow carries from start to finish.
pub(crate) struct BatchHandle {
    pub(crate) id: BatchId,
    pub(crate) kind: BatchKind,
    pub(crate) token: CancellationToken,
    started: Instant,
}

/// Counters for the batch-completed summary.
struct Tally {
    succeeded: u64,
    skipped: u64,
    failed: u64,
    cancelled: bool,
}

/// Where downloads go for the current batch.
enum DownloadTarget {
    Directory(PathBuf),
    Library,
}

pub(crate) struct OrchestratorInner {
    pub(crate) config: SyncConfig,
    pub(crate) steps: StepTable,
    pub(crate) remote: Arc<dyn RemoteStorage>,
    pub(crate) media: Arc<dyn MediaLibrary>,
    pub(crate) index: LocalIndex,
    pub(crate) metadata: Arc<MetadataStore>,
    pub(crate) cache: Arc<ContentCache>,
    pub(crate) fs: Arc<dyn FileSystemAccess>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) signals: Arc<SyncSignals>,
    queue: JobQueue,
    status: Mutex<SyncStatus>,
    active: Mutex<Option<ActiveBatch>>,
}

/// Long-lived service owning the job queue and every sync workflow.
///
/// Cheap to clone; clones share the queue, status and collaborators.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SyncOrchestrator {
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] when `config` does not validate.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteStorage>,
        media: Arc<dyn MediaLibrary>,
        index: LocalIndex,
        metadata: Arc<MetadataStore>,
        cache: Arc<ContentCache>,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
        signals: Arc<SyncSignals>,
    ) -> Result<Self> {
        config.validate()?;
        let steps = StepTable::new(config.materialize_retry_delay);

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                config,
                steps,
                remote,
                media,
                index,
                metadata,
                cache,
                fs,
                clock,
                signals,
                queue: JobQueue::new(),
                status: Mutex::new(SyncStatus::idle()),
                active: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn signals(&self) -> &SyncSignals {
        &self.inner.signals
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.lock().clone()
    }

    /// Whether a batch is running or waiting in the queue.
    pub fn is_busy(&self) -> bool {
        self.inner.active.lock().is_some() || !self.inner.queue.is_idle()
    }

    /// Cancel the running batch. Completed assets stay completed.
    ///
    /// Returns `false` when nothing is running.
    pub fn cancel(&self) -> bool {
        match self.inner.active.lock().as_ref() {
            Some(active) => {
                info!(batch_id = %active.batch_id, kind = %active.kind, "Cancelling batch");
                active.cancellation_token.cancel();
                true
            }
            None => false,
        }
    }

    async fn submit<F, Fut, T>(&self, label: &'static str, job: F) -> Result<T>
    where
        F: FnOnce(Arc<OrchestratorInner>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        self.inner.queue.enqueue(label, job(inner)).await?
    }

    // ========================================================================
    // Mutating operations (queued)
    // ========================================================================

    /// Upload every asset the media library lists.
    #[instrument(skip(self))]
    pub async fn sync_all(&self, options: UploadOptions) -> Result<BatchReport> {
        self.submit("upload", move |inner| async move {
            inner.run_upload(UploadSource::All, options).await
        })
        .await
    }

    /// Upload the given device assets.
    #[instrument(skip(self, asset_ids), fields(count = asset_ids.len()))]
    pub async fn sync_assets(
        &self,
        asset_ids: &[String],
        options: UploadOptions,
    ) -> Result<BatchReport> {
        let ids = asset_ids.to_vec();
        self.submit("upload", move |inner| async move {
            inner.run_upload(UploadSource::Assets(ids), options).await
        })
        .await
    }

    /// Delete remote files and keep automatic sync from uploading them again.
    #[instrument(skip(self, fingerprints), fields(count = fingerprints.len()))]
    pub async fn delete_remote(&self, fingerprints: &[String]) -> Result<DeleteReport> {
        let fingerprints = dedup(fingerprints);
        self.submit("delete", move |inner| async move {
            inner.run_delete(fingerprints).await
        })
        .await
    }

    #[instrument(skip(self, fingerprints), fields(count = fingerprints.len()))]
    pub async fn download(&self, fingerprints: &[String]) -> Result<DownloadReport> {
        let fingerprints = dedup(fingerprints);
        self.submit("download", move |inner| async move {
            inner.run_download(fingerprints).await
        })
        .await
    }

    /// Drop uploaded local records whose remote metadata entry is gone.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.submit("reconcile", |inner| async move { inner.run_reconcile().await })
            .await
    }

    /// Replace the remote history with an empty commit and wipe local state.
    #[instrument(skip(self))]
    pub async fn reset(&self, message: &str) -> Result<()> {
        let message = message.to_string();
        self.submit("reset", move |inner| async move { inner.run_reset(message).await })
            .await
    }

    /// Load up to `shards` more metadata shards. Returns the number of
    /// entries added.
    pub async fn load_more_remote_entries(&self, shards: usize) -> Result<usize> {
        self.submit("load_shards", move |inner| async move {
            Ok(inner.metadata.load_next_shards(shards).await?)
        })
        .await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// In-memory remote entries, newest first. Bootstraps the metadata store
    /// through the queue on first use.
    pub async fn list_remote_entries(
        &self,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<CachedEntry>> {
        self.bootstrap_remote_entries().await?;
        Ok(self.inner.metadata.cached_entries(offset, limit).await)
    }

    /// Load the metadata manifest and the freshest shards unless already
    /// loaded.
    pub async fn bootstrap_remote_entries(&self) -> Result<()> {
        if self.inner.metadata.is_bootstrapped().await {
            return Ok(());
        }
        self.submit("bootstrap", |inner| async move { inner.ensure_metadata().await })
            .await
    }

    pub async fn has_more_remote_entries(&self) -> bool {
        self.inner.metadata.has_unloaded_shards().await
    }

    pub async fn asset_status_by_fingerprint(&self, fingerprint: &str) -> Result<AssetStatus> {
        let index = &self.inner.index;
        let record = index.assets().get(fingerprint).await?;
        let blocked = index.blocklist().contains(fingerprint).await?;
        Ok(AssetStatus::resolve(
            Some(fingerprint.to_string()),
            record,
            blocked,
        ))
    }

    /// Status of a device asset. Falls back to its fingerprint when no record
    /// carries the asset id.
    pub async fn asset_status_by_asset_id(&self, asset_id: &str) -> Result<AssetStatus> {
        let index = &self.inner.index;
        let fingerprint = match index.assets().find_by_asset_id(asset_id).await? {
            Some(record) => record.fingerprint,
            None => match self.inner.media.get_asset(asset_id).await? {
                Some(asset) => fingerprint_for(&asset),
                None => return Ok(AssetStatus::resolve(None, None, false)),
            },
        };
        self.asset_status_by_fingerprint(&fingerprint).await
    }
}

fn dedup(fingerprints: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    fingerprints
        .iter()
        .filter(|fp| !fp.trim().is_empty() && seen.insert(fp.as_str()))
        .cloned()
        .collect()
}

impl OrchestratorInner {
    pub(crate) fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    pub(crate) async fn ensure_metadata(&self) -> Result<()> {
        if !self.metadata.is_bootstrapped().await {
            self.metadata.bootstrap().await?;
        }
        Ok(())
    }

    // ========================================================================
    // Batch lifecycle
    // ========================================================================

    fn update_status(&self, apply: impl FnOnce(&mut SyncStatus)) {
        let snapshot = {
            let mut status = self.status.lock();
            apply(&mut status);
            status.clone()
        };
        self.signals.publish_status(&snapshot);
    }

    pub(crate) fn begin_batch(&self, kind: BatchKind, total: u64) -> BatchHandle {
        let handle = BatchHandle {
            id: BatchId::new(),
            kind,
            token: CancellationToken::new(),
            started: Instant::now(),
        };
        *self.active.lock() = Some(ActiveBatch {
            batch_id: handle.id,
            kind,
            cancellation_token: handle.token.clone(),
        });

        info!(batch_id = %handle.id, kind = %kind, total, "Batch started");
        self.update_status(|status| status.begin(handle.id, kind, total));
        self.signals.publish_sync_event(SyncEvent::BatchStarted {
            batch_id: handle.id.to_string(),
            kind: kind.to_string(),
            total,
        });
        handle
    }

    pub(crate) fn progress(&self, processed: u64, phase: &str) {
        self.update_status(|status| status.update(processed, phase));
    }

    pub(crate) fn set_phase(&self, phase: &str) {
        self.update_status(|status| status.phase = Some(phase.to_string()));
    }

    fn set_total(&self, total: u64) {
        self.update_status(|status| status.total = total);
    }

    fn release(&self, batch: &BatchHandle) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.batch_id == batch.id) {
            *active = None;
        }
    }

    fn finish_batch(
        &self,
        batch: &BatchHandle,
        tally: Tally,
        message: String,
        upload_counters: Option<(u64, u64)>,
    ) {
        self.release(batch);
        let state = if tally.cancelled {
            SyncState::Cancelled
        } else {
            SyncState::Completed
        };
        let duration_ms = batch.started.elapsed().as_millis() as u64;

        info!(
            batch_id = %batch.id,
            kind = %batch.kind,
            succeeded = tally.succeeded,
            skipped = tally.skipped,
            failed = tally.failed,
            cancelled = tally.cancelled,
            duration_ms,
            "Batch finished"
        );

        self.update_status(|status| {
            if let Some((uploaded, failed)) = upload_counters {
                status.last_batch_uploaded = uploaded;
                status.last_batch_failed = failed;
            }
            status.finish(state, Some(message));
        });
        self.signals.publish_batch(BatchSummary {
            batch_id: batch.id,
            kind: batch.kind,
            succeeded: tally.succeeded,
            skipped: tally.skipped,
            failed: tally.failed,
            cancelled: tally.cancelled,
            duration_ms,
        });
    }

    fn fail_batch(&self, batch: &BatchHandle, error: &SyncError) {
        self.release(batch);
        error!(batch_id = %batch.id, kind = %batch.kind, error = %error, "Batch failed");
        self.update_status(|status| status.finish(SyncState::Failed, Some(error.to_string())));
        self.signals.publish_sync_event(SyncEvent::Failed {
            batch_id: batch.id.to_string(),
            message: error.to_string(),
        });
    }

    /// Batch-level failure before anything was started.
    fn reject_batch(&self, kind: BatchKind, error: &SyncError) {
        let batch_id = BatchId::new();
        warn!(batch_id = %batch_id, kind = %kind, error = %error, "Batch rejected");
        self.update_status(|status| {
            status.batch_id = Some(batch_id);
            status.kind = Some(kind);
            status.processed = 0;
            status.total = 0;
            status.finish(SyncState::Failed, Some(error.to_string()));
        });
        self.signals.publish_sync_event(SyncEvent::Failed {
            batch_id: batch_id.to_string(),
            message: error.to_string(),
        });
    }

    pub(crate) fn record_failure(&self, batch: &BatchHandle, failure: &AssetFailure) {
        match failure.kind {
            crate::error::FailureKind::NotFound => debug!(
                fingerprint = %failure.fingerprint,
                message = %failure.message,
                "Asset not found"
            ),
            _ => warn!(
                fingerprint = %failure.fingerprint,
                step = ?failure.step,
                kind = %failure.kind,
                message = %failure.message,
                "Asset failed"
            ),
        }
        self.signals.publish_sync_event(SyncEvent::AssetFailed {
            batch_id: batch.id.to_string(),
            fingerprint: failure.fingerprint.clone(),
            message: failure.message.clone(),
        });
    }

    // ========================================================================
    // Upload
    // ========================================================================

    async fn check_media_access(&self) -> Result<()> {
        let status = self.media.permission_status().await?;
        if !status.allows_read() {
            return Err(SyncError::PermissionDenied(
                "media library access has not been granted".to_string(),
            ));
        }
        Ok(())
    }

    /// Everything that must succeed before an upload batch may touch the
    /// remote.
    async fn prepare_upload(&self, source: UploadSource) -> Result<(Vec<DeviceAsset>, u64)> {
        self.check_media_access().await?;
        self.ensure_metadata().await?;
        self.resolve_assets(source).await
    }

    async fn resolve_assets(&self, source: UploadSource) -> Result<(Vec<DeviceAsset>, u64)> {
        match source {
            UploadSource::All => Ok((self.media.list_assets().await?, 0)),
            UploadSource::Assets(ids) => {
                let mut assets = Vec::with_capacity(ids.len());
                let mut missing = 0;
                for id in dedup(&ids) {
                    match self.media.get_asset(&id).await? {
                        Some(asset) => assets.push(asset),
                        None => {
                            debug!(asset_id = %id, "Asset no longer in the media library");
                            missing += 1;
                        }
                    }
                }
                Ok((assets, missing))
            }
        }
    }

    pub(crate) async fn run_upload(
        &self,
        source: UploadSource,
        options: UploadOptions,
    ) -> Result<BatchReport> {
        let (assets, missing) = match self.prepare_upload(source).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.reject_batch(BatchKind::Upload, &e);
                return Err(e);
            }
        };

        if assets.is_empty() {
            info!("No assets to sync");
            self.update_status(|status| {
                status.finish(status.state, Some("No assets to sync".to_string()))
            });
            return Ok(BatchReport {
                skipped: missing,
                ..BatchReport::default()
            });
        }

        let batch = self.begin_batch(BatchKind::Upload, assets.len() as u64);
        let mut report = BatchReport {
            skipped: missing,
            ..BatchReport::default()
        };
        let mut uploaded_ids = Vec::new();
        let mut changed = Vec::new();

        for (position, asset) in assets.iter().enumerate() {
            if batch.token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += 1;

            let outcome = self.upload_asset(&batch, asset, options).await;
            match outcome.result {
                AssetOutcome::Uploaded => {
                    report.uploaded += 1;
                    uploaded_ids.push(asset.id.clone());
                    changed.push(outcome.fingerprint);
                }
                AssetOutcome::Skipped { reason } => {
                    debug!(asset_id = %asset.id, reason = %reason, "Asset skipped");
                    report.skipped += 1;
                    if outcome.touched_index {
                        changed.push(outcome.fingerprint);
                    }
                }
                AssetOutcome::Failed { kind, message } => {
                    let failure = AssetFailure {
                        fingerprint: outcome.fingerprint.clone(),
                        asset_id: Some(asset.id.clone()),
                        step: Some(outcome.step),
                        kind,
                        message,
                    };
                    self.record_failure(&batch, &failure);
                    report.failed.push(failure);
                    changed.push(outcome.fingerprint);
                }
                AssetOutcome::Aborted => {
                    report.cancelled = true;
                    if outcome.touched_index {
                        changed.push(outcome.fingerprint);
                    }
                    break;
                }
            }
            self.progress(position as u64 + 1, Step::Finalize.as_str());
        }

        if self.config.auto_delete_after_sync && !uploaded_ids.is_empty() {
            match self.media.delete_assets(&uploaded_ids).await {
                Ok(()) => info!(count = uploaded_ids.len(), "Queued uploaded assets for deletion"),
                Err(e) => warn!(error = %e, "Failed to delete uploaded assets from the device"),
            }
        }

        if let Err(e) = self
            .index
            .kv()
            .set(keys::LAST_SYNC_AT, &self.now().to_string())
            .await
        {
            warn!(error = %e, "Failed to record last sync time");
        }

        self.signals.publish_index(IndexEvent::Changed {
            fingerprints: changed,
        });

        let message = if report.cancelled {
            format!("Cancelled after {} of {} assets", report.uploaded, assets.len())
        } else {
            format!("Uploaded {} of {} assets", report.uploaded, assets.len())
        };
        self.finish_batch(
            &batch,
            Tally {
                succeeded: report.uploaded,
                skipped: report.skipped,
                failed: report.failed_count(),
                cancelled: report.cancelled,
            },
            message,
            Some((report.uploaded, report.failed_count())),
        );
        Ok(report)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    pub(crate) async fn run_delete(&self, fingerprints: Vec<String>) -> Result<DeleteReport> {
        if fingerprints.is_empty() {
            return Ok(DeleteReport::default());
        }
        if let Err(e) = self.ensure_metadata().await {
            self.reject_batch(BatchKind::Delete, &e);
            return Err(e);
        }

        let batch = self.begin_batch(BatchKind::Delete, fingerprints.len() as u64);
        let mut report = DeleteReport::default();
        let mut removed_remote = Vec::new();
        let mut asset_ids = Vec::new();

        for (position, fingerprint) in fingerprints.iter().enumerate() {
            if batch.token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += 1;

            match self.delete_remote_files(fingerprint).await {
                Ok(asset_id) => {
                    removed_remote.push(fingerprint.clone());
                    asset_ids.push(asset_id);
                }
                Err(e) => {
                    let failure = AssetFailure {
                        fingerprint: fingerprint.clone(),
                        asset_id: None,
                        step: None,
                        kind: e.kind(),
                        message: e.to_string(),
                    };
                    self.record_failure(&batch, &failure);
                    report.failed.push(failure);
                }
            }
            self.progress(position as u64 + 1, "delete");
        }

        if !removed_remote.is_empty() {
            match self.metadata.remove(&removed_remote).await {
                Ok(outcome) if !outcome.missing.is_empty() => {
                    debug!(missing = outcome.missing.len(), "Some entries had no metadata");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Remote metadata not fully updated after delete");
                    report.metadata_error = Some(e.to_string());
                }
            }
        }

        let repo = self.remote.repo().clone();
        for (fingerprint, asset_id) in removed_remote.iter().zip(&asset_ids) {
            if let Err(e) = self.index.assets().delete(fingerprint).await {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to drop local record");
            }
            if let Err(e) = self
                .index
                .blocklist()
                .add(fingerprint, asset_id.as_deref(), Some("deleted from remote"))
                .await
            {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to blocklist deleted asset");
            }
            if let Err(e) = self.cache.invalidate(&repo, fingerprint).await {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to invalidate cached content");
            }
        }

        if !removed_remote.is_empty() {
            self.signals.publish_index(IndexEvent::Changed {
                fingerprints: removed_remote.clone(),
            });
            self.signals.publish_cache(CacheEvent::Invalidated {
                repo: repo.cache_key(),
                fingerprints: removed_remote.clone(),
            });
        }

        report.deleted = removed_remote;
        let message = format!("Deleted {} of {} assets", report.deleted.len(), fingerprints.len());
        self.finish_batch(
            &batch,
            Tally {
                succeeded: report.deleted.len() as u64,
                skipped: 0,
                failed: report.failed.len() as u64,
                cancelled: report.cancelled,
            },
            message,
            None,
        );
        Ok(report)
    }

    /// Delete the media file (and its preview) of `fingerprint`. Returns the
    /// device asset id known for it, if any.
    async fn delete_remote_files(&self, fingerprint: &str) -> Result<Option<String>> {
        let record = self.index.assets().get(fingerprint).await?;
        let entry = self.metadata.resolve(fingerprint).await?;

        let asset_id = entry
            .as_ref()
            .and_then(|cached| cached.entry.asset_id.clone())
            .or_else(|| record.as_ref().and_then(|r| r.asset_id.clone()));
        let mut paths: Vec<String> = Vec::new();
        if let Some(cached) = &entry {
            paths.push(cached.entry.repo_path.clone());
            paths.extend(cached.entry.preview_repo_path.clone());
        }
        if let Some(record) = &record {
            if !paths.contains(&record.repo_path) {
                paths.push(record.repo_path.clone());
            }
        }

        if paths.is_empty() {
            debug!(fingerprint = %fingerprint, "No remote path known; nothing to delete");
        }
        for path in paths {
            self.delete_remote_path(&path).await?;
        }
        Ok(asset_id)
    }

    async fn delete_remote_path(&self, path: &str) -> Result<()> {
        let Some(sha) = self.remote.file_sha(path).await? else {
            debug!(path = %path, "Remote file already gone");
            return Ok(());
        };
        match self.remote.delete_file(path, &sha).await {
            Ok(()) => {
                debug!(path = %path, "Deleted remote file");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Download
    // ========================================================================

    pub(crate) async fn run_download(&self, fingerprints: Vec<String>) -> Result<DownloadReport> {
        if fingerprints.is_empty() {
            return Ok(DownloadReport::default());
        }
        if let Err(e) = self.ensure_metadata().await {
            self.reject_batch(BatchKind::Download, &e);
            return Err(e);
        }

        let target = match self.index.download_directory().await {
            Ok(Some(dir)) => DownloadTarget::Directory(PathBuf::from(dir)),
            Ok(None) => DownloadTarget::Library,
            Err(e) => {
                warn!(error = %e, "Download directory unreadable; using the media library");
                DownloadTarget::Library
            }
        };

        let batch = self.begin_batch(BatchKind::Download, fingerprints.len() as u64);
        let mut report = DownloadReport::default();

        for (position, fingerprint) in fingerprints.iter().enumerate() {
            if batch.token.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += 1;

            match self.download_one(fingerprint, &target).await {
                Ok(location) => report.saved.push(SavedFile {
                    fingerprint: fingerprint.clone(),
                    location,
                }),
                Err(e) => {
                    let failure = AssetFailure {
                        fingerprint: fingerprint.clone(),
                        asset_id: None,
                        step: None,
                        kind: e.kind(),
                        message: e.to_string(),
                    };
                    self.record_failure(&batch, &failure);
                    report.failed.push(failure);
                }
            }
            self.progress(position as u64 + 1, "download");
        }

        let message = format!(
            "Downloaded {} of {} assets",
            report.saved.len(),
            fingerprints.len()
        );
        self.finish_batch(
            &batch,
            Tally {
                succeeded: report.saved.len() as u64,
                skipped: 0,
                failed: report.failed.len() as u64,
                cancelled: report.cancelled,
            },
            message,
            None,
        );
        Ok(report)
    }

    async fn download_one(
        &self,
        fingerprint: &str,
        target: &DownloadTarget,
    ) -> Result<SavedLocation> {
        let entry = self
            .metadata
            .get_entry(fingerprint)
            .await
            .ok_or_else(|| SyncError::NotFound(format!("no remote entry for {fingerprint}")))?;

        let cached = self.cache.ensure_original(self.remote.as_ref(), &entry).await?;
        let content = self.fs.read_file(&cached).await?;
        let file_name = download_file_name(&entry.entry.repo_path, fingerprint);

        match target {
            DownloadTarget::Directory(dir) => {
                match self.write_unique(dir, &file_name, content.clone()).await {
                    Ok(path) => return Ok(SavedLocation::Directory(path)),
                    Err(e) => warn!(
                        dir = %dir.display(),
                        error = %e,
                        "Download directory not writable; saving to app storage"
                    ),
                }
            }
            DownloadTarget::Library => {
                match self.media.save_to_library(&file_name, content.clone()).await {
                    Ok(()) => return Ok(SavedLocation::MediaLibrary),
                    Err(e) => debug!(error = %e, "Media library save unavailable; saving to app storage"),
                }
            }
        }

        let dir = self
            .fs
            .get_data_directory()
            .await?
            .join(&self.config.downloads_dir_name);
        self.fs.create_dir_all(&dir).await?;
        let path = self.write_unique(&dir, &file_name, content).await?;
        Ok(SavedLocation::AppStorage(path))
    }

    /// Write `content` as `file_name` in `dir`, adding ` (n)` before the
    /// extension when the name is taken.
    async fn write_unique(&self, dir: &Path, file_name: &str, content: Bytes) -> Result<PathBuf> {
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (file_name, None),
        };

        for attempt in 0..1000u32 {
            let candidate = match (attempt, extension) {
                (0, _) => file_name.to_string(),
                (n, Some(ext)) => format!("{stem} ({n}).{ext}"),
                (n, None) => format!("{stem} ({n})"),
            };
            let path = dir.join(candidate);
            if !self.fs.exists(&path).await? {
                self.fs.write_file(&path, content).await?;
                return Ok(path);
            }
        }
        Err(SyncError::Internal(format!(
            "no free file name for {file_name} in {}",
            dir.display()
        )))
    }

    // ========================================================================
    // Reconcile
    // ========================================================================

    pub(crate) async fn run_reconcile(&self) -> Result<ReconcileReport> {
        let batch = self.begin_batch(BatchKind::Reconcile, 0);
        match self.reconcile_records(&batch).await {
            Ok(report) => {
                let message = format!(
                    "Removed {} of {} local records",
                    report.removed.len(),
                    report.checked
                );
                self.finish_batch(
                    &batch,
                    Tally {
                        succeeded: report.removed.len() as u64,
                        skipped: report.checked - report.removed.len() as u64,
                        failed: 0,
                        cancelled: false,
                    },
                    message,
                    None,
                );
                Ok(report)
            }
            Err(e) => {
                self.fail_batch(&batch, &e);
                Err(e)
            }
        }
    }

    async fn reconcile_records(&self, batch: &BatchHandle) -> Result<ReconcileReport> {
        // Start from the remote state, and never from a partial view of it.
        self.metadata.bootstrap().await?;
        self.metadata.load_all().await?;

        let records = self.index.uploaded_records().await?;
        self.set_total(records.len() as u64);

        let repo = self.remote.repo().clone();
        let mut report = ReconcileReport {
            checked: records.len() as u64,
            removed: Vec::new(),
        };
        for (position, record) in records.iter().enumerate() {
            if self.metadata.get_entry(&record.fingerprint).await.is_none() {
                debug!(fingerprint = %record.fingerprint, "Remote entry gone; dropping local record");
                self.index.assets().delete(&record.fingerprint).await?;
                if let Err(e) = self.cache.invalidate(&repo, &record.fingerprint).await {
                    warn!(fingerprint = %record.fingerprint, error = %e, "Failed to invalidate cached content");
                }
                report.removed.push(record.fingerprint.clone());
            }
            if (position + 1) % 50 == 0 || position + 1 == records.len() {
                self.progress(position as u64 + 1, batch.kind.as_str());
            }
        }

        if !report.removed.is_empty() {
            self.signals.publish_index(IndexEvent::Changed {
                fingerprints: report.removed.clone(),
            });
            self.signals.publish_cache(CacheEvent::Invalidated {
                repo: repo.cache_key(),
                fingerprints: report.removed.clone(),
            });
        }
        info!(
            checked = report.checked,
            removed = report.removed.len(),
            "Reconciled local index with remote metadata"
        );
        Ok(report)
    }

    // ========================================================================
    // Reset
    // ========================================================================

    pub(crate) async fn run_reset(&self, message: String) -> Result<()> {
        let batch = self.begin_batch(BatchKind::Reset, 1);
        match self.reset_all(&message).await {
            Ok(()) => {
                self.finish_batch(
                    &batch,
                    Tally {
                        succeeded: 1,
                        skipped: 0,
                        failed: 0,
                        cancelled: false,
                    },
                    "Remote and local state reset".to_string(),
                    Some((0, 0)),
                );
                Ok(())
            }
            Err(e) => {
                self.fail_batch(&batch, &e);
                Err(e)
            }
        }
    }

    async fn reset_all(&self, message: &str) -> Result<()> {
        let repo = self.remote.repo().clone();
        self.remote
            .reset_branch(&self.config.commit_message(message))
            .await?;
        info!(repo = %repo, "Remote branch reset");

        self.metadata.reset().await;
        self.index.wipe().await?;
        self.signals.publish_index(IndexEvent::Wiped);

        if let Err(e) = self.cache.clear_repo(&repo).await {
            warn!(error = %e, "Failed to clear content cache after reset");
        }
        self.signals.publish_cache(CacheEvent::Cleared {
            repo: repo.cache_key(),
        });
        Ok(())
    }
}

/// File name a download is saved under: the last segment of its remote path.
fn download_file_name(repo_path: &str, fingerprint: &str) -> String {
    repo_path
        .rsplit('/')
        .next()
        .map(sanitize_component)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| {
            format!(
                "asset-{}.{}",
                sanitize_component(fingerprint),
                FALLBACK_EXTENSION
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let input = vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
            " ".to_string(),
        ];
        assert_eq!(dedup(&input), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_download_file_name() {
        assert_eq!(
            download_file_name("images/Camera Roll/IMG_0001.HEIC", "fp"),
            "IMG_0001.HEIC"
        );
        assert_eq!(download_file_name("images/", "a_1_2"), "asset-a_1_2.jpg");
    }
}
