//! In-memory fakes for the host capabilities.
//!
//! Enabled with the `test-utils` feature. Downstream crates pull this in from
//! `[dev-dependencies]` to drive their workflows without a network or device.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::media::{DeviceAsset, MediaLibrary, PermissionStatus};
use crate::remote::{RemoteEntry, RemoteEntryKind, RemoteFile, RemoteStorage, RepoRef};
use crate::time::Clock;

// ============================================================================
// Remote storage
// ============================================================================

/// A mutation observed by [`MemoryRemoteStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteWrite {
    Put(String),
    Delete(String),
    Reset,
}

type PutHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct RemoteState {
    files: BTreeMap<String, (String, Bytes)>,
    next_sha: u64,
    writes: Vec<RemoteWrite>,
    failing_prefixes: Vec<String>,
    reads: u64,
}

/// Remote store with real compare-and-swap semantics.
///
/// SHAs are opaque counters, so any two writes yield different SHAs even for
/// identical content.
pub struct MemoryRemoteStorage {
    repo: RepoRef,
    state: Mutex<RemoteState>,
    put_hook: Mutex<Option<PutHook>>,
}

impl MemoryRemoteStorage {
    pub fn new(repo: RepoRef) -> Self {
        Self {
            repo,
            state: Mutex::new(RemoteState::default()),
            put_hook: Mutex::new(None),
        }
    }

    /// Seed a file without recording a write. Returns its SHA.
    pub fn insert(&self, path: &str, content: impl Into<Bytes>) -> String {
        let mut state = self.state.lock();
        let sha = Self::mint_sha(&mut state);
        state
            .files
            .insert(path.to_string(), (sha.clone(), content.into()));
        sha
    }

    /// Drop a file without recording a write.
    pub fn remove(&self, path: &str) {
        self.state.lock().files.remove(path);
    }

    pub fn content(&self, path: &str) -> Option<Bytes> {
        self.state.lock().files.get(path).map(|(_, c)| c.clone())
    }

    pub fn sha(&self, path: &str) -> Option<String> {
        self.state.lock().files.get(path).map(|(s, _)| s.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().files.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    pub fn writes(&self) -> Vec<RemoteWrite> {
        self.state.lock().writes.clone()
    }

    /// Number of `put_file` calls that reached storage under `prefix`.
    pub fn put_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| matches!(w, RemoteWrite::Put(p) if p.starts_with(prefix)))
            .count()
    }

    pub fn read_count(&self) -> u64 {
        self.state.lock().reads
    }

    /// Make every write under `prefix` fail with a network error.
    pub fn fail_writes_under(&self, prefix: &str) {
        self.state.lock().failing_prefixes.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing_prefixes.clear();
    }

    /// Invoke `hook` after every successful put, outside the state lock.
    pub fn on_put(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.put_hook.lock() = Some(Box::new(hook));
    }

    fn mint_sha(state: &mut RemoteState) -> String {
        state.next_sha += 1;
        format!("{:040x}", state.next_sha)
    }

    fn check_failure(state: &RemoteState, path: &str) -> Result<()> {
        if state.failing_prefixes.iter().any(|p| path.starts_with(p)) {
            return Err(BridgeError::Network(format!(
                "injected failure writing {}",
                path
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemoteStorage {
    fn repo(&self) -> &RepoRef {
        &self.repo
    }

    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>> {
        let mut state = self.state.lock();
        state.reads += 1;
        Ok(state.files.get(path).map(|(sha, content)| RemoteFile {
            path: path.to_string(),
            sha: sha.clone(),
            content: content.clone(),
        }))
    }

    async fn put_file(
        &self,
        path: &str,
        content: Bytes,
        expected_sha: Option<&str>,
    ) -> Result<String> {
        let sha = {
            let mut state = self.state.lock();
            Self::check_failure(&state, path)?;

            let current = state.files.get(path).map(|(s, _)| s.as_str());
            if current != expected_sha {
                return Err(BridgeError::VersionConflict {
                    path: path.to_string(),
                });
            }

            let sha = Self::mint_sha(&mut state);
            state
                .files
                .insert(path.to_string(), (sha.clone(), content));
            state.writes.push(RemoteWrite::Put(path.to_string()));
            sha
        };

        if let Some(hook) = self.put_hook.lock().as_ref() {
            hook(path);
        }
        Ok(sha)
    }

    async fn delete_file(&self, path: &str, sha: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_failure(&state, path)?;

        match state.files.get(path) {
            None => Err(BridgeError::NotFound(path.to_string())),
            Some((current, _)) if current != sha => Err(BridgeError::VersionConflict {
                path: path.to_string(),
            }),
            Some(_) => {
                state.files.remove(path);
                state.writes.push(RemoteWrite::Delete(path.to_string()));
                Ok(())
            }
        }
    }

    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let state = self.state.lock();
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };

        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for (file_path, (sha, content)) in state.files.range(prefix.clone()..) {
            let Some(rest) = file_path.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => entries.push(RemoteEntry {
                    name: rest.to_string(),
                    path: file_path.clone(),
                    sha: sha.clone(),
                    size: content.len() as u64,
                    kind: RemoteEntryKind::File,
                }),
            }
        }

        entries.extend(dirs.into_iter().map(|dir| RemoteEntry {
            path: format!("{}{}", prefix, dir),
            name: dir,
            sha: String::new(),
            size: 0,
            kind: RemoteEntryKind::Directory,
        }));
        Ok(entries)
    }

    async fn reset_branch(&self, _message: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.files.clear();
        state.writes.push(RemoteWrite::Reset);
        Ok(())
    }
}

// ============================================================================
// Media library
// ============================================================================

#[derive(Default)]
struct MediaState {
    assets: Vec<DeviceAsset>,
    contents: HashMap<String, Bytes>,
    /// Readable only after a materialize request.
    offloaded: HashSet<String>,
    /// Never readable.
    broken: HashSet<String>,
    materialize_requests: Vec<String>,
    deleted: Vec<String>,
    saved: Vec<(String, Bytes)>,
}

/// Device library backed by a vector of assets.
pub struct MemoryMediaLibrary {
    permission: Mutex<PermissionStatus>,
    save_supported: bool,
    state: Mutex<MediaState>,
}

impl MemoryMediaLibrary {
    pub fn new() -> Self {
        Self {
            permission: Mutex::new(PermissionStatus::Granted),
            save_supported: true,
            state: Mutex::new(MediaState::default()),
        }
    }

    /// Library whose `save_to_library` keeps the trait's default behavior.
    pub fn without_library_writes() -> Self {
        Self {
            save_supported: false,
            ..Self::new()
        }
    }

    pub fn add_asset(&self, asset: DeviceAsset, content: impl Into<Bytes>) {
        let mut state = self.state.lock();
        state.contents.insert(asset.id.clone(), content.into());
        state.assets.push(asset);
    }

    pub fn set_permission(&self, status: PermissionStatus) {
        *self.permission.lock() = status;
    }

    /// Content lives in network storage until materialized.
    pub fn mark_offloaded(&self, id: &str) {
        self.state.lock().offloaded.insert(id.to_string());
    }

    pub fn mark_unreadable(&self, id: &str) {
        self.state.lock().broken.insert(id.to_string());
    }

    pub fn materialize_requests(&self) -> Vec<String> {
        self.state.lock().materialize_requests.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn saved(&self) -> Vec<(String, Bytes)> {
        self.state.lock().saved.clone()
    }
}

impl Default for MemoryMediaLibrary {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaLibrary for MemoryMediaLibrary {
    async fn permission_status(&self) -> Result<PermissionStatus> {
        Ok(*self.permission.lock())
    }

    async fn list_assets(&self) -> Result<Vec<DeviceAsset>> {
        let state = self.state.lock();
        Ok(state
            .assets
            .iter()
            .filter(|a| !state.deleted.contains(&a.id))
            .cloned()
            .collect())
    }

    async fn get_asset(&self, id: &str) -> Result<Option<DeviceAsset>> {
        let state = self.state.lock();
        Ok(state
            .assets
            .iter()
            .find(|a| a.id == id && !state.deleted.contains(&a.id))
            .cloned())
    }

    async fn read_asset(&self, id: &str) -> Result<Bytes> {
        let state = self.state.lock();
        if state.broken.contains(id) || state.offloaded.contains(id) {
            return Err(BridgeError::OperationFailed(format!(
                "asset {} is not available locally",
                id
            )));
        }
        state
            .contents
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    async fn request_materialize(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.materialize_requests.push(id.to_string());
        state.offloaded.remove(id);
        Ok(())
    }

    async fn delete_assets(&self, ids: &[String]) -> Result<()> {
        self.state.lock().deleted.extend(ids.iter().cloned());
        Ok(())
    }

    async fn save_to_library(&self, filename: &str, content: Bytes) -> Result<()> {
        if !self.save_supported {
            return Err(BridgeError::NotAvailable("library writes".to_string()));
        }
        self.state
            .lock()
            .saved
            .push((filename.to_string(), content));
        Ok(())
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn at_millis(millis: i64) -> Self {
        let start = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoRef {
        RepoRef::new("octo", "photos", "main")
    }

    #[tokio::test]
    async fn test_stale_sha_is_a_conflict_and_keeps_first_write() {
        let remote = MemoryRemoteStorage::new(repo());
        let first = remote
            .put_file("images/a.jpg", Bytes::from_static(b"one"), None)
            .await
            .unwrap();
        remote
            .put_file("images/a.jpg", Bytes::from_static(b"two"), Some(&first))
            .await
            .unwrap();

        let err = remote
            .put_file("images/a.jpg", Bytes::from_static(b"three"), Some(&first))
            .await
            .unwrap_err();

        assert!(err.is_version_conflict());
        assert_eq!(
            remote.content("images/a.jpg"),
            Some(Bytes::from_static(b"two"))
        );
    }

    #[tokio::test]
    async fn test_list_directory_groups_children() {
        let remote = MemoryRemoteStorage::new(repo());
        remote.insert("meta/2024/01/02/entries.json", "{}");
        remote.insert("meta/manifest.json", "{}");
        remote.insert("metadata.txt", "x");

        let entries = remote.list_directory("meta").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();

        assert_eq!(
            names,
            vec![
                ("manifest.json", RemoteEntryKind::File),
                ("2024", RemoteEntryKind::Directory)
            ]
        );
        assert!(remote.list_directory("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offloaded_asset_readable_after_materialize() {
        let library = MemoryMediaLibrary::new();
        library.add_asset(
            DeviceAsset {
                id: "a".into(),
                filename: "a.jpg".into(),
                album: None,
                created_at: None,
                modified_at: None,
                file_size: 3,
                mime_type: None,
            },
            Bytes::from_static(b"abc"),
        );
        library.mark_offloaded("a");

        assert!(library.read_asset("a").await.is_err());
        library.request_materialize("a").await.unwrap();
        assert_eq!(library.read_asset("a").await.unwrap().as_ref(), b"abc");
    }
}
