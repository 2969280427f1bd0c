//! # Host Bridge Traits
//!
//! Capability traits the sync core needs from its host, plus the shared
//! [`BridgeError`] type.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP used by remote providers
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Local files for the content cache and downloads
//! - [`RemoteStorage`](remote::RemoteStorage) - Versioned remote file store with conditional writes
//!
//! ### Device Integration
//! - [`MediaLibrary`](media::MediaLibrary) - Device photo library enumeration, reads, materialization
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Adapters convert platform errors into [`BridgeError`]. The variants
//! `NotFound`, `VersionConflict`, `PermissionDenied` and `Network` carry
//! meaning the sync engine acts on, so adapters must pick them precisely
//! instead of folding everything into `OperationFailed`.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; implementations are shared behind `Arc`
//! across tasks.
//!
//! ## Testing
//!
//! The `test-utils` feature exposes [`testing`] with in-memory implementations
//! of [`RemoteStorage`](remote::RemoteStorage), [`MediaLibrary`](media::MediaLibrary)
//! and [`Clock`](time::Clock).

pub mod error;
pub mod http;
pub mod media;
pub mod remote;
pub mod storage;
pub mod time;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use media::{DeviceAsset, MediaLibrary, PermissionStatus};
pub use remote::{RemoteEntry, RemoteEntryKind, RemoteFile, RemoteStorage, RepoRef};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
