//! # Sync Orchestration
//!
//! Moves photos between the device media library and the remote repository.
//!
//! ## Overview
//!
//! The [`SyncOrchestrator`] owns a single FIFO [`JobQueue`] and runs every
//! batch (upload, delete, download, reconcile, reset) through it. Uploads
//! drive each asset through a fixed step machine whose retry and skip choices
//! come from a [`StepTable`].
//!
//! ## Components
//!
//! - **Orchestrator** (`coordinator`): public operations and batch lifecycle
//! - **Upload pipeline** (`pipeline`): per-asset steps
//! - **Batch types** (`job`): status, steps, reports and asset state
//! - **Job queue** (`queue`): one-at-a-time async job runner
//! - **Signals** (`signals`): observer registries for the UI layer

pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
mod pipeline;
pub mod queue;
pub mod signals;

pub use config::SyncConfig;
pub use coordinator::SyncOrchestrator;
pub use error::{FailureKind, Result, SyncError};
pub use job::{
    AssetFailure, AssetOutcome, AssetStatus, AssetSyncState, BatchId, BatchKind, BatchReport,
    BatchSummary, DeleteReport, DownloadReport, ReconcileReport, SavedFile, SavedLocation, Step,
    StepDecision, StepResult, StepTable, SyncState, SyncStatus, UploadOptions,
};
pub use queue::JobQueue;
pub use signals::SyncSignals;
