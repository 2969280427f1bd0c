//! # Asset Identity
//!
//! Pure functions for an asset's cross-store identity and its canonical remote
//! path. The fingerprint is the join key between the local index, the remote
//! metadata shards and the content cache.
//!
//! ```text
//! fingerprint("IMG_0001.HEIC", 1706659200000, 2048000)
//!     = "IMG_0001.HEIC_1706659200000_2048000"
//! repo_path(Some("Camera Roll"), "IMG_0001.HEIC", fp)
//!     = "images/Camera Roll/IMG_0001.HEIC"
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::media::DeviceAsset;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

pub const IMAGES_ROOT: &str = "images";
pub const FALLBACK_FOLDER: &str = "Unsorted";
pub const FALLBACK_EXTENSION: &str = "jpg";

/// Characters the backend or common filesystems reject in a path segment.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '#', '%'];

/// Decoded parts of a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintParts {
    pub name: String,
    pub timestamp_millis: i64,
    pub size: u64,
}

/// Deterministic identity from filename, timestamp (ms) and size.
///
/// The name is NFC-normalized so the same file reported with decomposed and
/// composed characters maps to one identity.
pub fn fingerprint(name: &str, timestamp_millis: i64, size: u64) -> String {
    let name: String = name.nfc().collect();
    format!("{name}_{timestamp_millis}_{size}")
}

pub fn fingerprint_for(asset: &DeviceAsset) -> String {
    fingerprint(&asset.filename, asset.timestamp_millis(), asset.file_size)
}

/// Split a fingerprint back into its parts.
///
/// The name may itself contain `_`; the last two segments are always numeric.
pub fn parse_fingerprint(fingerprint: &str) -> Option<FingerprintParts> {
    let mut parts = fingerprint.rsplitn(3, '_');
    let size = parts.next()?.parse::<u64>().ok()?;
    let timestamp_millis = parts.next()?.parse::<i64>().ok()?;
    let name = parts.next()?.to_string();

    Some(FingerprintParts {
        name,
        timestamp_millis,
        size,
    })
}

/// Base64 transport encoding used for upload bodies.
pub fn encode_content(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// SHA-256 hex digest of the base64 encoding of `bytes`.
///
/// Hashes the transport text, not the raw bytes, to stay comparable with
/// `contentHash` values already stored in remote metadata.
pub fn content_hash(bytes: &[u8]) -> String {
    content_hash_of_encoded(&encode_content(bytes))
}

pub fn content_hash_of_encoded(encoded: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical remote path under [`IMAGES_ROOT`].
pub fn repo_path(folder: Option<&str>, filename: &str, fingerprint: &str) -> String {
    repo_path_in(IMAGES_ROOT, folder, filename, fingerprint)
}

/// Canonical remote path `<root>/<folder>/<file>`.
///
/// Never yields a `..` segment or a backslash. Distinct fingerprints can map
/// to the same path; the later write replaces the earlier one.
pub fn repo_path_in(root: &str, folder: Option<&str>, filename: &str, fingerprint: &str) -> String {
    let root = root
        .split('/')
        .map(sanitize_component)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let folder = folder
        .map(sanitize_component)
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| FALLBACK_FOLDER.to_string());

    let file = sanitize_component(filename);
    let file = if file.is_empty() {
        format!("asset-{}.{}", sanitize_component(fingerprint), FALLBACK_EXTENSION)
    } else if has_extension(&file) {
        file
    } else {
        format!("{file}.{FALLBACK_EXTENSION}")
    };

    if root.is_empty() {
        format!("{folder}/{file}")
    } else {
        format!("{root}/{folder}/{file}")
    }
}

/// Make one path segment safe: NFC, no control or separator characters, no
/// leading/trailing whitespace or dots, never `.` or `..`.
pub fn sanitize_component(raw: &str) -> String {
    let normalized: String = raw
        .nfc()
        .filter(|c| !c.is_control())
        .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
        .collect();

    let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());

    trimmed.to_string()
}

fn has_extension(file: &str) -> bool {
    match file.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}
