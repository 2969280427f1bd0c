//! Date buckets and shard paths.
//!
//! A bucket is a UTC `YYYY-MM-DD` string or `"unknown"`. Each bucket maps to
//! exactly one shard file:
//!
//! ```text
//! meta/2024/01/31/entries.json     date layout (always written)
//! meta/unknown/entries.json
//! meta/shards/2024-01-31.json      legacy flat layout (read only)
//! ```

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::documents::MetaEntry;
use crate::identity::parse_fingerprint;

pub const UNKNOWN_BUCKET: &str = "unknown";

/// Bucket for a Unix-millisecond timestamp, `None` when not a usable date.
pub fn bucket_for_timestamp(millis: i64) -> Option<String> {
    if millis <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis).map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// Resolve the bucket an entry belongs to.
///
/// Order: `createdAt`, `uploadedAt`, a date embedded in the repo path, the
/// timestamp inside the fingerprint, then `"unknown"`.
pub fn resolve_bucket(entry: &MetaEntry, fingerprint: &str) -> String {
    entry
        .created_at
        .and_then(bucket_for_timestamp)
        .or_else(|| entry.uploaded_at.and_then(bucket_for_timestamp))
        .or_else(|| bucket_from_repo_path(&entry.repo_path))
        .or_else(|| bucket_from_fingerprint(fingerprint))
        .unwrap_or_else(|| UNKNOWN_BUCKET.to_string())
}

pub fn bucket_from_fingerprint(fingerprint: &str) -> Option<String> {
    parse_fingerprint(fingerprint).and_then(|parts| bucket_for_timestamp(parts.timestamp_millis))
}

/// First plausible date in a path, e.g. `IMG_20240131_120000.jpg` or
/// `2024/01/31/a.jpg`.
pub fn bucket_from_repo_path(path: &str) -> Option<String> {
    let bytes = path.as_bytes();
    (0..bytes.len())
        .filter(|&start| start == 0 || !bytes[start - 1].is_ascii_digit())
        .find_map(|start| date_at(&bytes[start..]))
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn date_at(bytes: &[u8]) -> Option<NaiveDate> {
    let year = digits(bytes, 0, 4)?;
    let mut i = 4;

    let separator = bytes
        .get(i)
        .copied()
        .filter(|c| matches!(*c, b'-' | b'_' | b'/' | b'.'));
    if separator.is_some() {
        i += 1;
    }

    let month = digits(bytes, i, 2)?;
    i += 2;

    if let Some(separator) = separator {
        if bytes.get(i) != Some(&separator) {
            return None;
        }
        i += 1;
    }

    let day = digits(bytes, i, 2)?;
    i += 2;

    if bytes.get(i).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    if !(1970..=2100).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month, day)
}

fn digits(bytes: &[u8], start: usize, len: usize) -> Option<u32> {
    let slice = bytes.get(start..start + len)?;
    if !slice.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(slice).ok()?.parse().ok()
}

pub fn is_valid_bucket(bucket: &str) -> bool {
    bucket == UNKNOWN_BUCKET || NaiveDate::parse_from_str(bucket, "%Y-%m-%d").is_ok()
}

/// Where shard files live under the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardLayout {
    pub root: String,
    pub file_name: String,
    pub legacy_dir: String,
}

impl Default for ShardLayout {
    fn default() -> Self {
        Self {
            root: "meta".to_string(),
            file_name: "entries.json".to_string(),
            legacy_dir: "shards".to_string(),
        }
    }
}

impl ShardLayout {
    /// Date-layout path for `bucket`.
    pub fn shard_path(&self, bucket: &str) -> String {
        match NaiveDate::parse_from_str(bucket, "%Y-%m-%d") {
            Ok(date) => format!(
                "{}/{:04}/{:02}/{:02}/{}",
                self.root,
                date.year(),
                date.month(),
                date.day(),
                self.file_name
            ),
            Err(_) => format!("{}/{}/{}", self.root, UNKNOWN_BUCKET, self.file_name),
        }
    }

    pub fn legacy_path(&self, bucket: &str) -> String {
        format!("{}/{}/{}.json", self.root, self.legacy_dir, bucket)
    }

    pub fn is_legacy_path(&self, path: &str) -> bool {
        path.starts_with(&format!("{}/{}/", self.root, self.legacy_dir))
    }

    /// Bucket encoded in a shard path of either layout.
    pub fn bucket_from_path(&self, path: &str) -> Option<String> {
        let rest = path.strip_prefix(&self.root)?.strip_prefix('/')?;
        let segments: Vec<&str> = rest.split('/').collect();

        match segments.as_slice() {
            [dir, file] if *dir == self.legacy_dir => {
                let bucket = file.strip_suffix(".json")?;
                is_valid_bucket(bucket).then(|| bucket.to_string())
            }
            [dir, file] if *dir == UNKNOWN_BUCKET && *file == self.file_name => {
                Some(UNKNOWN_BUCKET.to_string())
            }
            [year, month, day, file] if *file == self.file_name => {
                let bucket = format!("{year}-{month}-{day}");
                let valid = year.len() == 4 && month.len() == 2 && day.len() == 2;
                (valid && is_valid_bucket(&bucket)).then_some(bucket)
            }
            _ => None,
        }
    }
}
