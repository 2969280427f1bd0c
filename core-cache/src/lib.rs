//! # Local Content Cache
//!
//! Previews and originals downloaded from the remote, stored per repository
//! and fingerprint with a small JSON manifest next to the files.
//!
//! ## Overview
//!
//! - [`ContentCache`]: fetch-or-serve for previews and originals, invalidation,
//!   eviction and statistics
//! - [`KeyedLock`]: per-fingerprint async locks shared by fetch and eviction
//! - [`CacheManifest`]: what an entry directory holds and which remote file
//!   it was built from
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_cache::{CacheConfig, ContentCache};
//!
//! let cache = ContentCache::new(CacheConfig::new(cache_dir), fs, clock)?;
//! let preview = cache.ensure_preview(remote.as_ref(), &entry).await?;
//! let report = cache.evict(remote.repo()).await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod paths;
pub mod preview;
pub mod stats;

pub use cache::ContentCache;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use lock::{KeyGuard, KeyedLock};
pub use manifest::{cache_tag, CacheManifest, CachedFile};
pub use stats::{CacheStats, EvictionReport, PrefetchReport};
