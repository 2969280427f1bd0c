//! Repository traits and their SQLite implementations.

pub mod assets;
pub mod blocklist;
pub mod kv;

pub use assets::{AssetRepository, SqliteAssetRepository};
pub use blocklist::{BlocklistRepository, SqliteBlocklistRepository};
pub use kv::{KvStore, SqliteKvStore};

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
