//! # Sharded Metadata Store
//!
//! In-memory mirror of the remote metadata tree: one manifest plus one shard
//! file per date bucket. Shards are loaded lazily; bootstrap only pulls the
//! freshest ones until [`MetadataConfig::preload_entry_target`] entries are in
//! memory.
//!
//! ## Shard lifecycle
//!
//! ```text
//! Unknown ──> NotLoaded ──> Loaded ──> Dirty ──> Persisted
//!                 ^                      │           │
//!                 └──── write failed ────┘           └──> Dirty (next mutation)
//! ```
//!
//! Every remote write is conditional on the SHA last observed for that file.
//! A failed shard write drops the in-memory document so the next mutation
//! starts from a fresh read.
//!
//! ## Consistency
//!
//! - A manifest row exists only for buckets with at least one entry, and its
//!   `sha` is the last SHA this store wrote or read for that shard.
//! - A manifest write that loses a race re-reads the remote manifest, keeps
//!   the rows of buckets this store wrote and takes every other row from the
//!   remote, then retries once on the fresh SHA.
//! - Fingerprints passed to [`MetadataStore::remove`] are purged from the
//!   reverse indices even when the remote write fails.

use bridge_traits::remote::RemoteStorage;
use bridge_traits::time::Clock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::bucket::{bucket_from_fingerprint, is_valid_bucket, resolve_bucket};
use crate::config::MetadataConfig;
use crate::documents::{
    CachedEntry, ManifestDocument, ManifestRow, MetaEntry, ShardDocument, ShardEntry,
};
use crate::error::{MetadataError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardState {
    /// Not referenced by the manifest or any mutation yet.
    Unknown,
    /// Listed in the manifest, document not in memory.
    NotLoaded,
    Loaded,
    /// Mutated in memory, write pending.
    Dirty,
    Persisted,
}

impl ShardState {
    pub fn can_transition(self, to: ShardState) -> bool {
        use ShardState::*;
        matches!(
            (self, to),
            (Unknown, NotLoaded)
                | (NotLoaded, Loaded)
                | (Loaded, Dirty)
                | (Persisted, Dirty)
                | (Dirty, Persisted)
                | (Dirty, NotLoaded)
                | (Loaded, NotLoaded)
                | (Persisted, NotLoaded)
                | (_, Unknown)
        )
    }

    pub fn is_loaded(self) -> bool {
        matches!(self, ShardState::Loaded | ShardState::Dirty | ShardState::Persisted)
    }
}

struct ShardSlot {
    bucket: String,
    state: ShardState,
    path: String,
    sha: Option<String>,
    doc: Option<ShardDocument>,
}

impl ShardSlot {
    fn new(bucket: &str, path: String, sha: Option<String>) -> Self {
        Self {
            bucket: bucket.to_string(),
            state: ShardState::Unknown,
            path,
            sha,
            doc: None,
        }
    }

    fn transition(&mut self, to: ShardState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(MetadataError::InvalidTransition {
                bucket: self.bucket.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Forget the in-memory document; the next access re-reads the remote.
    fn discard(&mut self) -> Result<()> {
        self.doc = None;
        if self.state.is_loaded() {
            self.transition(ShardState::NotLoaded)?;
        }
        Ok(())
    }
}

struct StoreState {
    bootstrapped: bool,
    manifest: ManifestDocument,
    manifest_sha: Option<String>,
    manifest_dirty: bool,
    /// Buckets whose manifest row this store changed since its last
    /// manifest write.
    touched: BTreeSet<String>,
    slots: HashMap<String, ShardSlot>,
    entries: HashMap<String, CachedEntry>,
    by_path: HashMap<String, String>,
    by_bucket: HashMap<String, BTreeSet<String>>,
}

impl StoreState {
    fn new(now: i64) -> Self {
        Self {
            bootstrapped: false,
            manifest: ManifestDocument::empty(now),
            manifest_sha: None,
            manifest_dirty: false,
            touched: BTreeSet::new(),
            slots: HashMap::new(),
            entries: HashMap::new(),
            by_path: HashMap::new(),
            by_bucket: HashMap::new(),
        }
    }

    fn index(&mut self, cached: CachedEntry) {
        self.unindex(&cached.fingerprint);
        self.by_path
            .insert(cached.entry.repo_path.clone(), cached.fingerprint.clone());
        self.by_bucket
            .entry(cached.bucket.clone())
            .or_default()
            .insert(cached.fingerprint.clone());
        self.entries.insert(cached.fingerprint.clone(), cached);
    }

    fn unindex(&mut self, fingerprint: &str) -> Option<CachedEntry> {
        let previous = self.entries.remove(fingerprint)?;
        if self.by_path.get(&previous.entry.repo_path).map(String::as_str) == Some(fingerprint) {
            self.by_path.remove(&previous.entry.repo_path);
        }
        if let Some(members) = self.by_bucket.get_mut(&previous.bucket) {
            members.remove(fingerprint);
            if members.is_empty() {
                self.by_bucket.remove(&previous.bucket);
            }
        }
        Some(previous)
    }

    /// Replace everything indexed under `bucket` with the slot's document.
    fn reindex_bucket(&mut self, bucket: &str) {
        let stale: Vec<String> = self
            .by_bucket
            .get(bucket)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        for fingerprint in stale {
            self.unindex(&fingerprint);
        }

        let fresh: Vec<CachedEntry> = self
            .slots
            .get(bucket)
            .and_then(|slot| slot.doc.as_ref())
            .map(|doc| {
                doc.entries
                    .iter()
                    .map(|(fingerprint, shard_entry)| CachedEntry {
                        fingerprint: fingerprint.clone(),
                        bucket: bucket.to_string(),
                        entry: shard_entry.entry.clone(),
                        updated_at: shard_entry.updated_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        for cached in fresh {
            self.index(cached);
        }
    }

    /// Fold a manifest another writer published into this view. Rows of
    /// touched buckets stay as this store wrote them; every other bucket
    /// follows the remote, and shards whose SHA moved are dropped from memory.
    fn merge_manifest(&mut self, remote: ManifestDocument) -> Result<()> {
        let mut merged = BTreeMap::new();
        for (bucket, row) in remote.shards {
            if self.touched.contains(&bucket) || !is_valid_bucket(&bucket) || row.count == 0 {
                continue;
            }
            let moved = self
                .manifest
                .shards
                .get(&bucket)
                .map_or(true, |local| local.sha != row.sha);
            if moved {
                let slot = self
                    .slots
                    .entry(bucket.clone())
                    .or_insert_with(|| ShardSlot::new(&bucket, row.path.clone(), None));
                slot.discard()?;
                if slot.state == ShardState::Unknown {
                    slot.transition(ShardState::NotLoaded)?;
                }
                slot.path = row.path.clone();
                slot.sha = Some(row.sha.clone());
                self.reindex_bucket(&bucket);
            }
            merged.insert(bucket, row);
        }

        for bucket in &self.touched {
            if let Some(row) = self.manifest.shards.get(bucket) {
                merged.insert(bucket.clone(), row.clone());
            }
        }

        // Untouched rows missing remotely were deleted by the other writer.
        let gone: Vec<String> = self
            .manifest
            .shards
            .keys()
            .filter(|bucket| !merged.contains_key(*bucket))
            .cloned()
            .collect();
        for bucket in gone {
            self.slots.remove(&bucket);
            self.reindex_bucket(&bucket);
        }

        self.manifest.shards = merged;
        Ok(())
    }

    /// Unloaded manifest buckets, freshest first (`updatedAt` desc, bucket desc).
    fn unloaded_by_freshness(&self) -> Vec<String> {
        let mut order: Vec<(i64, &String)> = self
            .manifest
            .shards
            .iter()
            .filter(|(bucket, _)| {
                self.slots
                    .get(*bucket)
                    .map_or(true, |slot| !slot.state.is_loaded())
            })
            .map(|(bucket, row)| (row.updated_at, bucket))
            .collect();
        order.sort_by(|a, b| b.cmp(a));
        order.into_iter().map(|(_, bucket)| bucket.clone()).collect()
    }
}

/// Summary of a [`MetadataStore::remove`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub removed: Vec<String>,
    /// Fingerprints with no known entry.
    pub missing: Vec<String>,
}

pub struct MetadataStore {
    remote: Arc<dyn RemoteStorage>,
    clock: Arc<dyn Clock>,
    config: MetadataConfig,
    state: Mutex<StoreState>,
}

impl MetadataStore {
    pub fn new(
        remote: Arc<dyn RemoteStorage>,
        clock: Arc<dyn Clock>,
        config: MetadataConfig,
    ) -> Result<Self> {
        config.validate()?;
        let now = clock.unix_timestamp_millis();
        Ok(Self {
            remote,
            clock,
            config,
            state: Mutex::new(StoreState::new(now)),
        })
    }

    pub fn config(&self) -> &MetadataConfig {
        &self.config
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    /// Read (or rebuild) the manifest and preload the freshest shards.
    ///
    /// Safe to call repeatedly; every call starts from the remote state.
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.bootstrap_locked(&mut state).await
    }

    pub async fn is_bootstrapped(&self) -> bool {
        self.state.lock().await.bootstrapped
    }

    async fn ensure_bootstrapped(&self, state: &mut StoreState) -> Result<()> {
        if state.bootstrapped {
            return Ok(());
        }
        self.bootstrap_locked(state).await
    }

    async fn bootstrap_locked(&self, state: &mut StoreState) -> Result<()> {
        *state = StoreState::new(self.now());

        match self.remote.get_file(&self.config.manifest_path).await? {
            Some(file) => {
                state.manifest_sha = Some(file.sha);
                match serde_json::from_slice::<ManifestDocument>(&file.content) {
                    Ok(manifest) => self.adopt_manifest(state, manifest)?,
                    Err(e) => {
                        warn!(error = %e, "Manifest unreadable; rebuilding from shard files");
                        self.rebuild_manifest(state).await?;
                    }
                }
            }
            None => {
                debug!(path = %self.config.manifest_path, "Manifest missing; rebuilding from shard files");
                self.rebuild_manifest(state).await?;
            }
        }

        state.bootstrapped = true;
        self.preload(state).await;

        info!(
            shards = state.manifest.shards.len(),
            remote_entries = state.manifest.total_entries(),
            cached_entries = state.entries.len(),
            "Metadata store ready"
        );
        Ok(())
    }

    fn adopt_manifest(&self, state: &mut StoreState, mut manifest: ManifestDocument) -> Result<()> {
        manifest.shards.retain(|bucket, row| {
            let keep = is_valid_bucket(bucket) && row.count > 0;
            if !keep {
                warn!(bucket = %bucket, count = row.count, "Dropping invalid manifest row");
                state.manifest_dirty = true;
            }
            keep
        });

        for (bucket, row) in &manifest.shards {
            let mut slot = ShardSlot::new(bucket, row.path.clone(), Some(row.sha.clone()));
            slot.transition(ShardState::NotLoaded)?;
            state.slots.insert(bucket.clone(), slot);
        }
        state.manifest = manifest;
        Ok(())
    }

    /// Walk the metadata tree and rebuild the manifest from the shard files
    /// found there. Shards whose embedded bucket disagrees with their path are
    /// skipped. A date-layout shard wins over a legacy one for the same bucket.
    async fn rebuild_manifest(&self, state: &mut StoreState) -> Result<()> {
        let layout = &self.config.layout;
        let mut files = self.walk_shard_files().await?;
        files.sort_by_key(|path| !layout.is_legacy_path(path));

        for path in files {
            let Some(bucket) = layout.bucket_from_path(&path) else {
                continue;
            };
            let Some(file) = self.remote.get_file(&path).await? else {
                continue;
            };
            let doc = match serde_json::from_slice::<ShardDocument>(&file.content) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping unreadable shard");
                    continue;
                }
            };
            if doc.bucket != bucket {
                warn!(path = %path, embedded = %doc.bucket, expected = %bucket, "Skipping shard with mismatched bucket");
                continue;
            }
            if doc.entries.is_empty() {
                continue;
            }

            state.manifest.shards.insert(
                bucket.clone(),
                ManifestRow {
                    path: path.clone(),
                    count: doc.entries.len(),
                    updated_at: doc.generated_at,
                    sha: file.sha.clone(),
                },
            );

            let mut slot = ShardSlot::new(&bucket, path, Some(file.sha));
            slot.transition(ShardState::NotLoaded)?;
            slot.doc = Some(doc);
            slot.transition(ShardState::Loaded)?;
            state.slots.insert(bucket.clone(), slot);
            state.reindex_bucket(&bucket);
            state.touched.insert(bucket);
        }

        if !state.manifest.shards.is_empty() {
            info!(shards = state.manifest.shards.len(), "Rebuilt manifest from shard files");
            state.manifest_dirty = true;
            self.persist_manifest(state).await?;
        }
        Ok(())
    }

    async fn walk_shard_files(&self) -> Result<Vec<String>> {
        let layout = &self.config.layout;
        let mut found = Vec::new();
        let mut queue = VecDeque::from([layout.root.clone()]);

        while let Some(dir) = queue.pop_front() {
            for child in self.remote.list_directory(&dir).await? {
                if child.is_file() {
                    if child.path != self.config.manifest_path
                        && layout.bucket_from_path(&child.path).is_some()
                    {
                        found.push(child.path);
                    }
                } else {
                    queue.push_back(child.path);
                }
            }
        }
        Ok(found)
    }

    async fn preload(&self, state: &mut StoreState) {
        let target = self.config.preload_entry_target;
        for bucket in state.unloaded_by_freshness() {
            if state.entries.len() >= target {
                break;
            }
            if let Err(e) = self.ensure_loaded(state, &bucket).await {
                warn!(bucket = %bucket, error = %e, "Failed to preload shard");
            }
        }
    }

    async fn ensure_loaded(&self, state: &mut StoreState, bucket: &str) -> Result<()> {
        let layout = &self.config.layout;
        let slot = state
            .slots
            .entry(bucket.to_string())
            .or_insert_with(|| ShardSlot::new(bucket, layout.shard_path(bucket), None));

        if slot.state.is_loaded() {
            return Ok(());
        }
        if slot.state == ShardState::Unknown {
            slot.transition(ShardState::NotLoaded)?;
        }

        let path = slot.path.clone();
        let fetched = self.remote.get_file(&path).await?;
        let now = self.now();

        let (doc, sha) = match fetched {
            None => (ShardDocument::empty(bucket, now), None),
            Some(file) => match serde_json::from_slice::<ShardDocument>(&file.content) {
                Ok(doc) if doc.bucket == bucket => (doc, Some(file.sha)),
                Ok(doc) => {
                    warn!(path = %path, embedded = %doc.bucket, "Shard bucket mismatch; starting empty");
                    (ShardDocument::empty(bucket, now), Some(file.sha))
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Shard unreadable; starting empty");
                    (ShardDocument::empty(bucket, now), Some(file.sha))
                }
            },
        };

        let count = doc.entries.len();
        if let Some(slot) = state.slots.get_mut(bucket) {
            slot.sha = sha;
            slot.doc = Some(doc);
            slot.transition(ShardState::Loaded)?;
        }
        state.reindex_bucket(bucket);

        // Keep the manifest row honest about what the file really holds.
        match state.manifest.shards.get(bucket).map(|row| row.count) {
            Some(_) if count == 0 => {
                state.manifest.shards.remove(bucket);
                state.touched.insert(bucket.to_string());
                state.manifest_dirty = true;
            }
            Some(listed) if listed != count => {
                if let Some(row) = state.manifest.shards.get_mut(bucket) {
                    row.count = count;
                }
                state.touched.insert(bucket.to_string());
                state.manifest_dirty = true;
            }
            _ => {}
        }

        debug!(bucket = %bucket, entries = count, "Loaded shard");
        Ok(())
    }

    /// Write a dirty shard, or delete it when it has no entries left.
    ///
    /// Shards read from the legacy layout are moved to the date layout.
    async fn persist_shard(&self, state: &mut StoreState, bucket: &str) -> Result<()> {
        let target = self.config.layout.shard_path(bucket);
        let now = self.now();

        let Some(slot) = state.slots.get_mut(bucket) else {
            return Ok(());
        };
        let Some(doc) = slot.doc.as_mut() else {
            return Ok(());
        };

        if doc.entries.is_empty() {
            if let Some(sha) = slot.sha.clone() {
                match self.remote.delete_file(&slot.path, &sha).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        slot.discard()?;
                        return Err(e.into());
                    }
                }
            }
            state.slots.remove(bucket);
            if state.manifest.shards.remove(bucket).is_some() {
                state.touched.insert(bucket.to_string());
                state.manifest_dirty = true;
            }
            debug!(bucket = %bucket, "Deleted empty shard");
            return Ok(());
        }

        doc.generated_at = now;
        let count = doc.entries.len();
        let body = serde_json::to_vec_pretty(doc)?;

        let migrating = slot.path != target;
        let expected = if migrating {
            self.remote.file_sha(&target).await?
        } else {
            slot.sha.clone()
        };

        match self
            .remote
            .put_file(&target, body.into(), expected.as_deref())
            .await
        {
            Ok(new_sha) => {
                if migrating {
                    if let Some(old_sha) = slot.sha.as_deref() {
                        if let Err(e) = self.remote.delete_file(&slot.path, old_sha).await {
                            if !e.is_not_found() {
                                warn!(path = %slot.path, error = %e, "Failed to delete legacy shard");
                            }
                        }
                    }
                    slot.path = target.clone();
                }
                slot.sha = Some(new_sha.clone());
                slot.transition(ShardState::Persisted)?;

                state.manifest.shards.insert(
                    bucket.to_string(),
                    ManifestRow {
                        path: target,
                        count,
                        updated_at: now,
                        sha: new_sha,
                    },
                );
                state.touched.insert(bucket.to_string());
                state.manifest_dirty = true;
                Ok(())
            }
            Err(e) => {
                slot.discard()?;
                Err(e.into())
            }
        }
    }

    async fn persist_manifest(&self, state: &mut StoreState) -> Result<()> {
        state.manifest.shards.retain(|_, row| row.count > 0);
        state.manifest.updated_at = self.now();

        let path = &self.config.manifest_path;
        let body = bytes::Bytes::from(serde_json::to_vec_pretty(&state.manifest)?);

        let written = match self
            .remote
            .put_file(path, body, state.manifest_sha.as_deref())
            .await
        {
            Err(e) if e.is_version_conflict() => {
                warn!(path = %path, "Manifest changed remotely; merging rows");
                self.merge_remote_manifest(state).await?
            }
            other => other?,
        };

        state.manifest_sha = Some(written);
        state.manifest_dirty = false;
        state.touched.clear();
        Ok(())
    }

    /// Re-read the manifest, merge its rows and write once more, conditional
    /// on the SHA just read. A second conflict is returned to the caller.
    async fn merge_remote_manifest(&self, state: &mut StoreState) -> Result<String> {
        let path = &self.config.manifest_path;
        let (remote, sha) = match self.remote.get_file(path).await? {
            Some(file) => match serde_json::from_slice::<ManifestDocument>(&file.content) {
                Ok(manifest) => (manifest, Some(file.sha)),
                Err(e) => {
                    warn!(path = %path, error = %e, "Remote manifest unreadable; keeping local rows");
                    (ManifestDocument::empty(self.now()), Some(file.sha))
                }
            },
            None => (ManifestDocument::empty(self.now()), None),
        };

        state.merge_manifest(remote)?;
        state.manifest.updated_at = self.now();
        let body = bytes::Bytes::from(serde_json::to_vec_pretty(&state.manifest)?);
        Ok(self.remote.put_file(path, body, sha.as_deref()).await?)
    }

    /// Insert or replace the entry for `fingerprint` in the shard of its bucket.
    ///
    /// If the entry previously lived in another bucket it is removed from that
    /// shard after the new shard is written.
    #[instrument(skip(self, entry), fields(repo_path = %entry.repo_path))]
    pub async fn upsert(&self, fingerprint: &str, entry: MetaEntry) -> Result<CachedEntry> {
        if fingerprint.trim().is_empty() {
            return Err(MetadataError::InvalidEntry("fingerprint is empty".into()));
        }
        if entry.repo_path.trim().is_empty() {
            return Err(MetadataError::InvalidEntry(format!(
                "entry {fingerprint} has an empty repoPath"
            )));
        }

        let mut state = self.state.lock().await;
        self.ensure_bootstrapped(&mut state).await?;

        let bucket = resolve_bucket(&entry, fingerprint);
        let previous_bucket = state
            .entries
            .get(fingerprint)
            .map(|cached| cached.bucket.clone())
            .filter(|previous| previous != &bucket);

        self.ensure_loaded(&mut state, &bucket).await?;

        let now = self.now();
        if let Some(slot) = state.slots.get_mut(&bucket) {
            if let Some(doc) = slot.doc.as_mut() {
                doc.entries.insert(
                    fingerprint.to_string(),
                    ShardEntry {
                        entry: entry.clone(),
                        updated_at: now,
                    },
                );
            }
            slot.transition(ShardState::Dirty)?;
        }
        self.persist_shard(&mut state, &bucket).await?;

        let mut move_error = None;
        if let Some(previous) = previous_bucket {
            if let Err(e) = self
                .remove_from_shard(&mut state, &previous, &[fingerprint.to_string()])
                .await
            {
                warn!(bucket = %previous, error = %e, "Failed to remove moved entry from its old shard");
                move_error = Some(e);
            }
        }

        let cached = CachedEntry {
            fingerprint: fingerprint.to_string(),
            bucket,
            entry,
            updated_at: now,
        };
        state.index(cached.clone());

        self.persist_manifest(&mut state).await?;
        match move_error {
            Some(e) => Err(e),
            None => Ok(cached),
        }
    }

    async fn remove_from_shard(
        &self,
        state: &mut StoreState,
        bucket: &str,
        fingerprints: &[String],
    ) -> Result<Vec<String>> {
        self.ensure_loaded(state, bucket).await?;

        let Some(slot) = state.slots.get_mut(bucket) else {
            return Ok(Vec::new());
        };
        let removed: Vec<String> = match slot.doc.as_mut() {
            Some(doc) => fingerprints
                .iter()
                .filter(|fingerprint| doc.entries.remove(*fingerprint).is_some())
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        if removed.is_empty() {
            return Ok(removed);
        }

        slot.transition(ShardState::Dirty)?;
        self.persist_shard(state, bucket).await?;
        Ok(removed)
    }

    /// Remove entries, grouped by bucket. Each affected shard is rewritten or
    /// deleted when empty; the manifest is written once at the end.
    ///
    /// Returns the first error after every group has been attempted.
    #[instrument(skip(self, fingerprints), fields(count = fingerprints.len()))]
    pub async fn remove(&self, fingerprints: &[String]) -> Result<RemoveOutcome> {
        let mut state = self.state.lock().await;
        self.ensure_bootstrapped(&mut state).await?;

        let mut outcome = RemoveOutcome::default();
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut seen = BTreeSet::new();

        for fingerprint in fingerprints {
            if !seen.insert(fingerprint.as_str()) {
                continue;
            }
            let bucket = match state.entries.get(fingerprint) {
                Some(cached) => Some(cached.bucket.clone()),
                // Not in memory: try the bucket its timestamp implies, if
                // that shard exists but has not been loaded.
                None => bucket_from_fingerprint(fingerprint).filter(|bucket| {
                    state
                        .slots
                        .get(bucket)
                        .is_some_and(|slot| !slot.state.is_loaded())
                }),
            };
            match bucket {
                Some(bucket) => groups.entry(bucket).or_default().push(fingerprint.clone()),
                None => outcome.missing.push(fingerprint.clone()),
            }
        }

        let mut first_error = None;
        for (bucket, group) in groups {
            match self.remove_from_shard(&mut state, &bucket, &group).await {
                Ok(removed) => {
                    for fingerprint in &group {
                        if !removed.contains(fingerprint) {
                            outcome.missing.push(fingerprint.clone());
                        }
                    }
                    outcome.removed.extend(removed);
                }
                Err(e) => {
                    warn!(bucket = %bucket, error = %e, "Failed to remove entries from shard");
                    first_error.get_or_insert(e);
                }
            }
            for fingerprint in &group {
                state.unindex(fingerprint);
            }
        }

        if state.manifest_dirty {
            if let Err(e) = self.persist_manifest(&mut state).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// Load up to `count` more shards, freshest first. Returns the number of
    /// entries added to memory.
    pub async fn load_next_shards(&self, count: usize) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.ensure_bootstrapped(&mut state).await?;

        let before = state.entries.len();
        for bucket in state.unloaded_by_freshness().into_iter().take(count) {
            self.ensure_loaded(&mut state, &bucket).await?;
        }
        self.flush_manifest_if_dirty(&mut state).await;
        Ok(state.entries.len().saturating_sub(before))
    }

    pub async fn load_all(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.ensure_bootstrapped(&mut state).await?;

        let before = state.entries.len();
        for bucket in state.unloaded_by_freshness() {
            self.ensure_loaded(&mut state, &bucket).await?;
        }
        self.flush_manifest_if_dirty(&mut state).await;
        Ok(state.entries.len().saturating_sub(before))
    }

    /// Loading can correct stale manifest rows; write those corrections back
    /// without failing the read.
    async fn flush_manifest_if_dirty(&self, state: &mut StoreState) {
        if state.manifest_dirty {
            if let Err(e) = self.persist_manifest(state).await {
                warn!(error = %e, "Failed to write corrected manifest");
            }
        }
    }

    pub async fn has_unloaded_shards(&self) -> bool {
        let state = self.state.lock().await;
        !state.unloaded_by_freshness().is_empty()
    }

    /// Entry for `fingerprint` if its shard is in memory.
    pub async fn get_entry(&self, fingerprint: &str) -> Option<CachedEntry> {
        self.state.lock().await.entries.get(fingerprint).cloned()
    }

    /// Entry for `fingerprint`, paging in the shard its timestamp implies
    /// when that shard is listed but not loaded yet.
    pub async fn resolve(&self, fingerprint: &str) -> Result<Option<CachedEntry>> {
        let mut state = self.state.lock().await;
        self.ensure_bootstrapped(&mut state).await?;
        if let Some(cached) = state.entries.get(fingerprint) {
            return Ok(Some(cached.clone()));
        }

        let Some(bucket) = bucket_from_fingerprint(fingerprint).filter(|bucket| {
            state
                .slots
                .get(bucket)
                .is_some_and(|slot| !slot.state.is_loaded())
        }) else {
            return Ok(None);
        };
        self.ensure_loaded(&mut state, &bucket).await?;
        self.flush_manifest_if_dirty(&mut state).await;
        Ok(state.entries.get(fingerprint).cloned())
    }

    pub async fn entry_by_path(&self, repo_path: &str) -> Option<CachedEntry> {
        let state = self.state.lock().await;
        state
            .by_path
            .get(repo_path)
            .and_then(|fingerprint| state.entries.get(fingerprint))
            .cloned()
    }

    /// In-memory entries, newest first, optionally paginated.
    pub async fn cached_entries(&self, offset: usize, limit: Option<usize>) -> Vec<CachedEntry> {
        let state = self.state.lock().await;
        let mut entries: Vec<&CachedEntry> = state.entries.values().collect();
        entries.sort_by(|a, b| {
            b.entry
                .sort_timestamp()
                .cmp(&a.entry.sort_timestamp())
                .then_with(|| b.fingerprint.cmp(&a.fingerprint))
        });

        entries
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub async fn cached_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Entry count according to the manifest, loaded or not.
    pub async fn remote_count(&self) -> usize {
        self.state.lock().await.manifest.total_entries()
    }

    pub async fn manifest_snapshot(&self) -> ManifestDocument {
        self.state.lock().await.manifest.clone()
    }

    pub async fn shard_state(&self, bucket: &str) -> ShardState {
        self.state
            .lock()
            .await
            .slots
            .get(bucket)
            .map_or(ShardState::Unknown, |slot| slot.state)
    }

    /// Fingerprints currently indexed under `bucket`.
    pub async fn bucket_members(&self, bucket: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .by_bucket
            .get(bucket)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget everything in memory; the next operation bootstraps again.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = StoreState::new(self.now());
        info!("Metadata store reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use ShardState::*;
        assert!(Unknown.can_transition(NotLoaded));
        assert!(NotLoaded.can_transition(Loaded));
        assert!(Loaded.can_transition(Dirty));
        assert!(Dirty.can_transition(Persisted));
        assert!(Persisted.can_transition(Dirty));
        assert!(Dirty.can_transition(NotLoaded));
        assert!(Persisted.can_transition(Unknown));

        assert!(!Unknown.can_transition(Loaded));
        assert!(!Unknown.can_transition(Dirty));
        assert!(!NotLoaded.can_transition(Dirty));
        assert!(!Loaded.can_transition(Persisted));
    }

    #[test]
    fn test_invalid_transition_is_an_error() {
        let mut slot = ShardSlot::new("2024-01-01", "meta/2024/01/01/entries.json".into(), None);
        let err = slot.transition(ShardState::Dirty).unwrap_err();
        assert!(matches!(
            err,
            MetadataError::InvalidTransition {
                from: ShardState::Unknown,
                to: ShardState::Dirty,
                ..
            }
        ));
    }

    #[test]
    fn test_reindex_drops_stale_members() {
        let mut state = StoreState::new(0);
        state.index(CachedEntry {
            fingerprint: "gone".into(),
            bucket: "2024-01-01".into(),
            entry: MetaEntry::new("images/a/gone.jpg"),
            updated_at: 0,
        });

        let mut slot = ShardSlot::new("2024-01-01", "p".into(), None);
        let mut doc = ShardDocument::empty("2024-01-01", 0);
        doc.entries.insert(
            "kept".into(),
            ShardEntry {
                entry: MetaEntry::new("images/a/kept.jpg"),
                updated_at: 1,
            },
        );
        slot.doc = Some(doc);
        state.slots.insert("2024-01-01".into(), slot);

        state.reindex_bucket("2024-01-01");

        assert!(!state.entries.contains_key("gone"));
        assert!(!state.by_path.contains_key("images/a/gone.jpg"));
        assert_eq!(state.by_path.get("images/a/kept.jpg").map(String::as_str), Some("kept"));
    }
}
