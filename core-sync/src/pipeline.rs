//! Per-asset upload steps.
//!
//! [`OrchestratorInner::upload_asset`] walks one asset through
//! [`Step::ORDER`], asking the [`crate::job::StepTable`] what to do whenever a
//! step fails.

use crate::coordinator::{BatchHandle, OrchestratorInner};
use crate::job::{AssetOutcome, Step, StepDecision, StepResult, UploadOptions};
use crate::{Result, SyncError};
use bridge_traits::DeviceAsset;
use bytes::Bytes;
use core_index::{AssetPatch, AssetSyncRecord};
use core_metadata::identity::{content_hash, fingerprint_for, repo_path_in};
use core_metadata::MetaEntry;
use tracing::{debug, warn};

/// How one asset left the step machine.
pub(crate) struct UploadOutcome {
    pub(crate) fingerprint: String,
    /// Last step that ran.
    pub(crate) step: Step,
    pub(crate) result: AssetOutcome,
    /// Whether the local record was created or changed.
    pub(crate) touched_index: bool,
}

struct AssetJob<'a> {
    asset: &'a DeviceAsset,
    fingerprint: String,
    repo_path: String,
    options: UploadOptions,
    existing: Option<AssetSyncRecord>,
    content: Option<Bytes>,
    content_hash: Option<String>,
    uploaded_at: Option<i64>,
    touched_index: bool,
}

impl AssetJob<'_> {
    fn outcome(self, step: Step, result: AssetOutcome) -> UploadOutcome {
        UploadOutcome {
            fingerprint: self.fingerprint,
            step,
            result,
            touched_index: self.touched_index,
        }
    }

    fn pending_record(&self, now: i64) -> AssetSyncRecord {
        let mut record = AssetSyncRecord::pending(&self.fingerprint, &self.repo_path, now)
            .with_asset_id(&self.asset.id);
        record.file_size = i64::try_from(self.asset.file_size).ok();
        record.created_at = self.asset.created_at.or(self.asset.modified_at);
        record.content_hash = self.content_hash.clone();
        record
    }
}

impl OrchestratorInner {
    pub(crate) async fn upload_asset(
        &self,
        batch: &BatchHandle,
        asset: &DeviceAsset,
        options: UploadOptions,
    ) -> UploadOutcome {
        let fingerprint = fingerprint_for(asset);
        let repo_path = repo_path_in(
            &self.config.images_root,
            asset.album.as_deref(),
            &asset.filename,
            &fingerprint,
        );
        let mut job = AssetJob {
            asset,
            fingerprint,
            repo_path,
            options,
            existing: None,
            content: None,
            content_hash: None,
            uploaded_at: None,
            touched_index: false,
        };

        match self.skip_reason(&mut job).await {
            Ok(Some(reason)) => {
                return job.outcome(Step::Prepare, AssetOutcome::Skipped { reason });
            }
            Ok(None) => {}
            Err(e) => {
                return job.outcome(
                    Step::Prepare,
                    AssetOutcome::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                );
            }
        }

        let mut step = Step::Prepare;
        let mut attempt = 0u32;
        loop {
            self.set_phase(step.as_str());

            let result = if step == Step::Upload && batch.token.is_cancelled() {
                Err(SyncError::Cancelled)
            } else {
                self.run_step(step, &mut job).await
            };

            let error = match result {
                Ok(StepResult::Continue) => match step.next() {
                    Some(next) => {
                        step = next;
                        attempt = 0;
                        continue;
                    }
                    None => {
                        debug!(fingerprint = %job.fingerprint, path = %job.repo_path, "Asset uploaded");
                        return job.outcome(step, AssetOutcome::Uploaded);
                    }
                },
                Ok(StepResult::Finished(result)) => return job.outcome(step, result),
                Err(e) => e,
            };

            match self.steps.decide(step, &error, attempt) {
                StepDecision::Retry { delay } => {
                    attempt += 1;
                    debug!(
                        asset_id = %asset.id,
                        step = %step,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Requesting materialization before retrying"
                    );
                    if let Err(e) = self.media.request_materialize(&asset.id).await {
                        warn!(asset_id = %asset.id, error = %e, "Materialization request failed");
                    }
                    tokio::select! {
                        _ = batch.token.cancelled() => {
                            return job.outcome(step, AssetOutcome::Aborted);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                StepDecision::Skip => {
                    let message = error.to_string();
                    self.record_asset_error(&mut job, step, &message).await;
                    return job.outcome(step, AssetOutcome::Skipped { reason: message });
                }
                StepDecision::Fail => {
                    let message = error.to_string();
                    self.record_asset_error(&mut job, step, &message).await;
                    return job.outcome(
                        step,
                        AssetOutcome::Failed {
                            kind: error.kind(),
                            message,
                        },
                    );
                }
                StepDecision::Abort => return job.outcome(step, AssetOutcome::Aborted),
            }
        }
    }

    /// Why the asset should not be uploaded at all, if anything.
    async fn skip_reason(&self, job: &mut AssetJob<'_>) -> Result<Option<String>> {
        job.existing = self.index.assets().get(&job.fingerprint).await?;
        if job.options.override_existing {
            return Ok(None);
        }

        if self.index.blocklist().contains(&job.fingerprint).await? {
            return Ok(Some("deleted from remote by the user".to_string()));
        }
        if job.existing.as_ref().is_some_and(|record| record.uploaded) {
            self.index
                .assets()
                .touch(&job.fingerprint, &AssetPatch::seen_at(self.now()))
                .await?;
            return Ok(Some("already uploaded".to_string()));
        }
        Ok(None)
    }

    async fn run_step(&self, step: Step, job: &mut AssetJob<'_>) -> Result<StepResult> {
        match step {
            Step::Prepare => self.prepare(job).await,
            Step::WritePending => self.write_pending(job).await,
            Step::Upload => self.upload(job).await,
            Step::MarkUploaded => self.mark_uploaded(job).await,
            Step::UpsertMeta => self.upsert_meta(job).await,
            Step::Finalize => self.finalize(job).await,
        }
    }

    async fn prepare(&self, job: &mut AssetJob<'_>) -> Result<StepResult> {
        let asset_id = &job.asset.id;
        let content = self
            .media
            .read_asset(asset_id)
            .await
            .map_err(|e| SyncError::Prepare {
                asset_id: asset_id.clone(),
                message: e.to_string(),
            })?;
        if content.is_empty() {
            return Err(SyncError::Prepare {
                asset_id: asset_id.clone(),
                message: "asset content is empty".to_string(),
            });
        }

        let hash = content_hash(&content);
        job.content = Some(content);
        job.content_hash = Some(hash.clone());

        if job.options.override_existing {
            return Ok(StepResult::Continue);
        }

        // Same bytes already listed remotely (e.g. after a reinstall).
        let Some(remote) = self.metadata.get_entry(&job.fingerprint).await else {
            return Ok(StepResult::Continue);
        };
        if remote.entry.content_hash.as_deref() != Some(hash.as_str()) {
            return Ok(StepResult::Continue);
        }

        let now = self.now();
        let mut record = job.pending_record(now);
        record.repo_path = remote.entry.repo_path.clone();
        record.uploaded = true;
        record.last_uploaded_at = remote.entry.uploaded_at.or(Some(now));
        self.index.assets().upsert(&record).await?;
        job.touched_index = true;

        Ok(StepResult::Finished(AssetOutcome::Skipped {
            reason: "already on remote".to_string(),
        }))
    }

    async fn write_pending(&self, job: &mut AssetJob<'_>) -> Result<StepResult> {
        let now = self.now();
        match &job.existing {
            Some(_) => {
                let patch = AssetPatch {
                    asset_id: Some(job.asset.id.clone()),
                    repo_path: Some(job.repo_path.clone()),
                    file_size: i64::try_from(job.asset.file_size).ok(),
                    created_at: job.asset.created_at.or(job.asset.modified_at),
                    content_hash: job.content_hash.clone(),
                    last_seen_at: Some(now),
                    ..AssetPatch::default()
                };
                self.index.assets().touch(&job.fingerprint, &patch).await?;
            }
            None => {
                self.index.assets().upsert(&job.pending_record(now)).await?;
            }
        }
        job.touched_index = true;
        Ok(StepResult::Continue)
    }

    async fn upload(&self, job: &mut AssetJob<'_>) -> Result<StepResult> {
        let content = job
            .content
            .clone()
            .ok_or_else(|| SyncError::Internal("upload before prepare".to_string()))?;

        // Without override the PUT is create-only, so an existing file at the
        // same path surfaces as a version conflict.
        let expected_sha = if job.options.override_existing {
            self.remote.file_sha(&job.repo_path).await?
        } else {
            None
        };

        match self
            .remote
            .put_file(&job.repo_path, content, expected_sha.as_deref())
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_version_conflict() && expected_sha.is_none() => {
                if !self.remote_holds_same_bytes(job).await? {
                    return Err(e.into());
                }
                debug!(path = %job.repo_path, "Remote file already holds these bytes; adopting it");
            }
            Err(e) => return Err(e.into()),
        }
        job.uploaded_at = Some(self.now());
        // Release the bytes before the metadata round trips.
        job.content = None;
        Ok(StepResult::Continue)
    }

    /// Whether the file at the asset's path is a previous upload of the same
    /// content, e.g. one whose metadata write failed.
    async fn remote_holds_same_bytes(&self, job: &AssetJob<'_>) -> Result<bool> {
        let Some(hash) = job.content_hash.as_deref() else {
            return Ok(false);
        };
        Ok(self
            .remote
            .get_file(&job.repo_path)
            .await?
            .is_some_and(|file| content_hash(&file.content) == hash))
    }

    async fn mark_uploaded(&self, job: &mut AssetJob<'_>) -> Result<StepResult> {
        let at = job.uploaded_at.unwrap_or_else(|| self.now());
        let updated = self
            .index
            .assets()
            .touch(&job.fingerprint, &AssetPatch::uploaded_at(at))
            .await?;
        if !updated {
            let mut record = job.pending_record(at);
            record.uploaded = true;
            record.last_uploaded_at = Some(at);
            self.index.assets().upsert(&record).await?;
        }
        Ok(StepResult::Continue)
    }

    async fn upsert_meta(&self, job: &mut AssetJob<'_>) -> Result<StepResult> {
        let previous = self.metadata.get_entry(&job.fingerprint).await;

        let mut entry = MetaEntry::new(&job.repo_path);
        entry.preview_repo_path = previous.and_then(|cached| cached.entry.preview_repo_path);
        entry.created_at = job.asset.created_at.or(job.asset.modified_at);
        entry.file_size = Some(job.asset.file_size);
        entry.content_hash = job.content_hash.clone();
        entry.uploaded_at = job.uploaded_at;
        entry.asset_id = Some(job.asset.id.clone());

        self.metadata.upsert(&job.fingerprint, entry).await?;
        Ok(StepResult::Continue)
    }

    async fn finalize(&self, job: &mut AssetJob<'_>) -> Result<StepResult> {
        if self.index.blocklist().remove(&job.fingerprint).await? {
            debug!(fingerprint = %job.fingerprint, "Lifted blocklist entry after upload");
        }
        Ok(StepResult::Continue)
    }

    /// Keep the failure on the local record so the UI can show it.
    ///
    /// A failure between the PUT and the metadata write leaves the record
    /// pending: the next batch adopts the remote file and writes the entry.
    async fn record_asset_error(&self, job: &mut AssetJob<'_>, step: Step, message: &str) {
        let mut patch = AssetPatch::failed(message);
        if matches!(step, Step::MarkUploaded | Step::UpsertMeta) {
            patch.uploaded = Some(false);
        }

        let assets = self.index.assets();
        let stored = match assets.touch(&job.fingerprint, &patch).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                let mut record = job.pending_record(self.now());
                record.last_error = Some(message.to_string());
                assets.upsert(&record).await
            }
            Err(e) => Err(e),
        };
        match stored {
            Ok(()) => job.touched_index = true,
            Err(e) => warn!(fingerprint = %job.fingerprint, error = %e, "Failed to record asset error"),
        }
    }
}
