//! # Batch and Step State Machines
//!
//! Types describing one sync batch and the per-asset step machine that an
//! upload batch drives.
//!
//! ## Per-asset steps
//!
//! ```text
//! Prepare → WritePending → Upload → MarkUploaded → UpsertMeta → Finalize
//!    │ PrepareFailure (first time): materialize, wait, retry Prepare
//!    │ PrepareFailure (again):      skip, error recorded
//!    └ Cancelled (any step):        abort the batch
//! ```
//!
//! Every other failure ends the asset with `Fail`: the error is recorded on
//! the local record and the batch moves on. Retry and skip choices live in
//! [`StepTable::decide`] instead of inside the workflow code.
//!
//! ## Batch status
//!
//! ```text
//! Idle → Running → Completed
//!           ↓  ↘
//!       Cancelled  Failed
//! ```

use crate::error::FailureKind;
use crate::{Result, SyncError};
use core_index::AssetSyncRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Identifier of one queued batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidValue(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Batch Kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Upload,
    Delete,
    Download,
    Reconcile,
    Reset,
}

impl BatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchKind::Upload => "upload",
            BatchKind::Delete => "delete",
            BatchKind::Download => "download",
            BatchKind::Reconcile => "reconcile",
            BatchKind::Reset => "reset",
        }
    }
}

impl FromStr for BatchKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "upload" => Ok(BatchKind::Upload),
            "delete" => Ok(BatchKind::Delete),
            "download" => Ok(BatchKind::Download),
            "reconcile" => Ok(BatchKind::Reconcile),
            "reset" => Ok(BatchKind::Reset),
            _ => Err(SyncError::InvalidValue(format!("batch kind {s}"))),
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Nothing has run yet.
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncState::Completed | SyncState::Failed | SyncState::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Running => "running",
            SyncState::Completed => "completed",
            SyncState::Failed => "failed",
            SyncState::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SyncState::Idle),
            "running" => Ok(SyncState::Running),
            "completed" => Ok(SyncState::Completed),
            "failed" => Ok(SyncState::Failed),
            "cancelled" => Ok(SyncState::Cancelled),
            _ => Err(SyncError::InvalidValue(format!("sync state {s}"))),
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the orchestrator, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub batch_id: Option<BatchId>,
    pub kind: Option<BatchKind>,
    /// Current step of the running batch, e.g. `upload` or `finalize`.
    pub phase: Option<String>,
    pub processed: u64,
    pub total: u64,
    /// Assets uploaded by the most recent upload batch.
    pub last_batch_uploaded: u64,
    /// Assets that failed in the most recent upload batch.
    pub last_batch_failed: u64,
    pub message: Option<String>,
}

impl SyncStatus {
    pub fn idle() -> Self {
        Self {
            state: SyncState::Idle,
            batch_id: None,
            kind: None,
            phase: None,
            processed: 0,
            total: 0,
            last_batch_uploaded: 0,
            last_batch_failed: 0,
            message: None,
        }
    }

    /// Enter `Running` for a new batch. Last-batch counters are kept until the
    /// next upload batch finishes.
    pub fn begin(&mut self, batch_id: BatchId, kind: BatchKind, total: u64) {
        self.state = SyncState::Running;
        self.batch_id = Some(batch_id);
        self.kind = Some(kind);
        self.phase = None;
        self.processed = 0;
        self.total = total;
        self.message = None;
    }

    pub fn update(&mut self, processed: u64, phase: &str) {
        self.processed = processed;
        self.phase = Some(phase.to_string());
    }

    pub fn finish(&mut self, state: SyncState, message: Option<String>) {
        self.state = state;
        self.phase = None;
        self.message = message;
    }

    /// Progress percentage (0-100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.processed as f64 / self.total as f64) * 100.0).min(100.0) as u8
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::idle()
    }
}

// ============================================================================
// Step Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Read and encode the device content, compute the content hash.
    Prepare,
    /// Record the asset locally as not yet uploaded.
    WritePending,
    /// Conditional PUT of the file to the remote.
    Upload,
    MarkUploaded,
    /// Add the entry to its date-bucketed metadata shard.
    UpsertMeta,
    /// Lift any blocklist entry and queue auto-delete.
    Finalize,
}

impl Step {
    pub const ORDER: [Step; 6] = [
        Step::Prepare,
        Step::WritePending,
        Step::Upload,
        Step::MarkUploaded,
        Step::UpsertMeta,
        Step::Finalize,
    ];

    pub fn next(self) -> Option<Step> {
        let position = Self::ORDER.iter().position(|step| *step == self)?;
        Self::ORDER.get(position + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Prepare => "prepare",
            Step::WritePending => "write_pending",
            Step::Upload => "upload",
            Step::MarkUploaded => "mark_uploaded",
            Step::UpsertMeta => "upsert_meta",
            Step::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// Go on with [`Step::next`].
    Continue,
    /// Stop here; the asset needs no further steps.
    Finished(AssetOutcome),
}

/// What to do after a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    /// Run the same step again after `delay`.
    Retry { delay: Duration },
    /// Give up on this asset without counting it as failed.
    Skip,
    /// Record the failure and continue with the next asset.
    Fail,
    /// Stop the whole batch.
    Abort,
}

/// Retry/skip table for the per-asset step machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTable {
    /// Wait between requesting materialization and retrying `Prepare`.
    pub materialize_retry_delay: Duration,
}

impl StepTable {
    pub fn new(materialize_retry_delay: Duration) -> Self {
        Self {
            materialize_retry_delay,
        }
    }

    /// `attempt` counts previous failures of `step` for the current asset.
    pub fn decide(&self, step: Step, error: &SyncError, attempt: u32) -> StepDecision {
        match (step, error.kind()) {
            (_, FailureKind::Cancelled) => StepDecision::Abort,
            (Step::Prepare, FailureKind::PrepareFailure) if attempt == 0 => StepDecision::Retry {
                delay: self.materialize_retry_delay,
            },
            (Step::Prepare, FailureKind::PrepareFailure) => StepDecision::Skip,
            _ => StepDecision::Fail,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Terminal state of one asset within an upload batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AssetOutcome {
    Uploaded,
    Skipped { reason: String },
    Failed { kind: FailureKind, message: String },
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFailure {
    pub fingerprint: String,
    pub asset_id: Option<String>,
    pub step: Option<Step>,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Assets the batch started on, skipped ones included.
    pub attempted: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: Vec<AssetFailure>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn failed_count(&self) -> u64 {
        self.failed.len() as u64
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub attempted: u64,
    pub deleted: Vec<String>,
    pub failed: Vec<AssetFailure>,
    pub cancelled: bool,
    /// Set when files were deleted but their metadata shards could not be
    /// rewritten.
    pub metadata_error: Option<String>,
}

/// Where a downloaded file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum SavedLocation {
    /// The user-chosen external directory.
    Directory(PathBuf),
    MediaLibrary,
    /// App-private storage under the data directory.
    AppStorage(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFile {
    pub fingerprint: String,
    pub location: SavedLocation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadReport {
    pub attempted: u64,
    pub saved: Vec<SavedFile>,
    pub failed: Vec<AssetFailure>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Uploaded local records compared against the remote metadata.
    pub checked: u64,
    /// Fingerprints dropped locally because the remote no longer has them.
    pub removed: Vec<String>,
}

/// Payload of the batch-completed signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: BatchId,
    pub kind: BatchKind,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub cancelled: bool,
    pub duration_ms: u64,
}

// ============================================================================
// Asset State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum AssetSyncState {
    NotSynced,
    /// Known locally but not uploaded; `last_error` explains the last attempt.
    Pending { last_error: Option<String> },
    Uploaded,
    /// Deleted from the remote by the user; automatic sync leaves it alone.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetStatus {
    pub fingerprint: Option<String>,
    pub state: AssetSyncState,
    pub record: Option<AssetSyncRecord>,
}

impl AssetStatus {
    pub fn resolve(
        fingerprint: Option<String>,
        record: Option<AssetSyncRecord>,
        blocked: bool,
    ) -> Self {
        let state = match &record {
            Some(record) if record.uploaded => AssetSyncState::Uploaded,
            _ if blocked => AssetSyncState::Blocked,
            Some(record) => AssetSyncState::Pending {
                last_error: record.last_error.clone(),
            },
            None => AssetSyncState::NotSynced,
        };
        Self {
            fingerprint,
            state,
            record,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOptions {
    /// Upload even when the asset is blocklisted or already uploaded, replacing
    /// the remote file.
    pub override_existing: bool,
}

impl UploadOptions {
    pub fn overriding() -> Self {
        Self {
            override_existing: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StepTable {
        StepTable::new(Duration::from_millis(250))
    }

    fn prepare_failure() -> SyncError {
        SyncError::Prepare {
            asset_id: "1".into(),
            message: "offloaded".into(),
        }
    }

    #[test]
    fn test_step_order() {
        assert_eq!(Step::Prepare.next(), Some(Step::WritePending));
        assert_eq!(Step::UpsertMeta.next(), Some(Step::Finalize));
        assert_eq!(Step::Finalize.next(), None);
    }

    #[test]
    fn test_prepare_failure_retries_once_then_skips() {
        assert_eq!(
            table().decide(Step::Prepare, &prepare_failure(), 0),
            StepDecision::Retry {
                delay: Duration::from_millis(250)
            }
        );
        assert_eq!(
            table().decide(Step::Prepare, &prepare_failure(), 1),
            StepDecision::Skip
        );
    }

    #[test]
    fn test_cancellation_aborts_from_any_step() {
        for step in Step::ORDER {
            assert_eq!(
                table().decide(step, &SyncError::Cancelled, 0),
                StepDecision::Abort
            );
        }
    }

    #[test]
    fn test_remote_failures_fail_the_asset() {
        let conflict = SyncError::VersionConflict {
            path: "images/a.jpg".into(),
        };
        assert_eq!(table().decide(Step::Upload, &conflict, 0), StepDecision::Fail);

        let network = SyncError::Network("timeout".into());
        assert_eq!(table().decide(Step::Upload, &network, 0), StepDecision::Fail);
        assert_eq!(
            table().decide(Step::UpsertMeta, &network, 0),
            StepDecision::Fail
        );
    }

    #[test]
    fn test_status_transitions() {
        let mut status = SyncStatus::idle();
        let id = BatchId::new();
        status.begin(id, BatchKind::Upload, 4);
        assert!(status.state.is_active());

        status.update(1, Step::Upload.as_str());
        assert_eq!(status.percent(), 25);
        assert_eq!(status.phase.as_deref(), Some("upload"));

        status.finish(SyncState::Completed, None);
        assert!(status.state.is_terminal());
        assert_eq!(status.batch_id, Some(id));
    }

    #[test]
    fn test_batch_kind_round_trip() {
        for kind in [
            BatchKind::Upload,
            BatchKind::Delete,
            BatchKind::Download,
            BatchKind::Reconcile,
            BatchKind::Reset,
        ] {
            assert_eq!(kind.as_str().parse::<BatchKind>().unwrap(), kind);
        }
        assert!("merge".parse::<BatchKind>().is_err());
    }

    #[test]
    fn test_asset_status_resolution() {
        let mut record = AssetSyncRecord::pending("a_1_2", "images/Unsorted/a.jpg", 1);
        record.last_error = Some("timeout".into());

        let pending = AssetStatus::resolve(Some("a_1_2".into()), Some(record.clone()), false);
        assert_eq!(
            pending.state,
            AssetSyncState::Pending {
                last_error: Some("timeout".into())
            }
        );

        record.uploaded = true;
        let uploaded = AssetStatus::resolve(Some("a_1_2".into()), Some(record), true);
        assert_eq!(uploaded.state, AssetSyncState::Uploaded);

        let blocked = AssetStatus::resolve(Some("a_1_2".into()), None, true);
        assert_eq!(blocked.state, AssetSyncState::Blocked);

        let unknown = AssetStatus::resolve(None, None, false);
        assert_eq!(unknown.state, AssetSyncState::NotSynced);
    }
}
