//! # Local Sync Index
//!
//! Durable per-device sync state on SQLite.
//!
//! ## Tables
//!
//! - `assets`: one [`AssetSyncRecord`] per fingerprint
//! - `kv_store`: scalar state such as the last manifest SHA and the download
//!   directory bookmark
//! - `auto_sync_blocklist`: fingerprints automatic sync must not re-upload
//!
//! Opening the index applies embedded migrations and then folds the tables of
//! the previous schema into `assets` (see [`legacy`]).
//!
//! ```rust,ignore
//! let index = LocalIndex::open(DatabaseConfig::new(path)).await?;
//! if let Some(record) = index.assets().get(&fingerprint).await? {
//!     println!("{} uploaded: {}", record.repo_path, record.uploaded);
//! }
//! ```

pub mod db;
pub mod error;
pub mod index;
pub mod legacy;
pub mod models;
pub mod repositories;

pub use db::DatabaseConfig;
pub use error::{IndexError, Result};
pub use index::{keys, LocalIndex};
pub use models::{
    AssetCursor, AssetFilter, AssetPage, AssetPatch, AssetSyncRecord, BlocklistEntry,
};
pub use repositories::{AssetRepository, BlocklistRepository, KvStore};
