//! # Remote Metadata
//!
//! Identity rules and the sharded metadata mirror kept inside the remote
//! repository.
//!
//! ## Overview
//!
//! - [`identity`]: fingerprint, content hash and canonical repo path
//! - [`bucket`]: date buckets and shard file locations
//! - [`documents`]: manifest and shard JSON schemas
//! - [`store`]: [`MetadataStore`], the lazily loaded in-memory mirror
//!
//! The store answers "is this file on the remote" without downloading media:
//! the manifest lists one shard per date bucket, and shards are pulled in
//! freshness order as the UI pages through them.

pub mod bucket;
pub mod config;
pub mod documents;
pub mod error;
pub mod identity;
pub mod store;

pub use bucket::{resolve_bucket, ShardLayout, UNKNOWN_BUCKET};
pub use config::MetadataConfig;
pub use documents::{CachedEntry, ManifestDocument, ManifestRow, MetaEntry, ShardDocument};
pub use error::{MetadataError, Result};
pub use store::{MetadataStore, RemoveOutcome, ShardState};
