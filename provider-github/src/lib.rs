//! # GitHub Provider
//!
//! Implements [`RemoteStorage`](bridge_traits::RemoteStorage) on top of the
//! GitHub contents API.
//!
//! ## Overview
//!
//! This module provides:
//! - File reads with base64 decoding and a blob fallback for large files
//! - Conditional create/update/delete keyed on the blob SHA
//! - Directory listings for metadata bootstrap
//! - Branch reset to a single empty commit
//! - Exponential backoff for rate limiting and server errors
//!
//! Every request goes through the injected `HttpClient`; the connector
//! itself holds no connection state.

pub mod config;
pub mod connector;
pub mod error;
pub mod types;

pub use config::GitHubConfig;
pub use connector::GitHubConnector;
pub use error::{GitHubError, Result};
