//! Integration tests for the content cache

use bridge_desktop::TokioFileSystem;
use bridge_traits::remote::{RemoteStorage, RepoRef};
use bridge_traits::testing::{ManualClock, MemoryRemoteStorage};
use bytes::Bytes;
use chrono::Duration as ChronoDuration;
use core_cache::{CacheConfig, CacheError, CacheManifest, ContentCache};
use core_metadata::{CachedEntry, MetaEntry};
use image::{ImageBuffer, ImageFormat, Rgb};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const T0: i64 = 1_706_659_200_000; // 2024-01-31T00:00:00Z

struct Harness {
    _root: TempDir,
    remote: Arc<MemoryRemoteStorage>,
    clock: ManualClock,
    cache: ContentCache,
}

impl Harness {
    fn new(configure: impl FnOnce(CacheConfig) -> CacheConfig) -> Self {
        let root = tempfile::tempdir().unwrap();
        let fs = Arc::new(TokioFileSystem::with_directories(
            root.path().join("os-cache"),
            root.path().join("data"),
        ));
        let clock = ManualClock::at_millis(T0);
        let config = configure(CacheConfig::new(root.path().join("cache")));
        let cache = ContentCache::new(config, fs, Arc::new(clock.clone())).unwrap();

        Self {
            _root: root,
            remote: Arc::new(MemoryRemoteStorage::new(RepoRef::new("octo", "photos", "main"))),
            clock,
            cache,
        }
    }

    fn repo(&self) -> &RepoRef {
        self.remote.repo()
    }

    fn entry_dir(&self, fingerprint: &str) -> std::path::PathBuf {
        self.cache.entry_dir(self.repo(), fingerprint)
    }

    fn manifest(&self, fingerprint: &str) -> CacheManifest {
        let raw = std::fs::read(self.entry_dir(fingerprint).join("manifest.json")).unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    /// Seed a remote file and return the matching cache entry.
    fn seed(&self, name: &str, content: impl Into<Bytes>) -> CachedEntry {
        let content = content.into();
        let path = format!("images/Camera/{name}");
        self.remote.insert(&path, content.clone());
        cached(name, &path, content.len() as u64, "h1")
    }
}

fn cached(name: &str, repo_path: &str, size: u64, hash: &str) -> CachedEntry {
    let mut entry = MetaEntry::new(repo_path);
    entry.file_size = Some(size);
    entry.content_hash = Some(hash.to_string());
    entry.uploaded_at = Some(T0);
    entry.created_at = Some(T0);

    CachedEntry {
        fingerprint: format!("{name}_{T0}_{size}"),
        bucket: "2024-01-31".to_string(),
        entry,
        updated_at: T0,
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 40]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn dir_exists(path: &Path) -> bool {
    path.is_dir()
}

#[tokio::test]
async fn test_preview_is_rendered_and_then_served_from_disk() {
    let h = Harness::new(|c| c.with_preview(64, 80));
    let entry = h.seed("a.png", png(256, 128));

    let path = h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();
    let preview = image::open(&path).unwrap();
    assert_eq!((preview.width(), preview.height()), (64, 32));

    let reads = h.remote.read_count();
    let again = h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(again, path);
    assert_eq!(h.remote.read_count(), reads);

    let manifest = h.manifest(&entry.fingerprint);
    assert_eq!(manifest.fingerprint, entry.fingerprint);
    assert_eq!(manifest.tag, core_cache::cache_tag(&entry.entry));
    assert!(manifest.original.is_none());
}

#[tokio::test]
async fn test_last_accessed_is_written_at_most_once_per_interval() {
    let h = Harness::new(|c| c.with_touch_interval(Duration::from_secs(300)));
    let entry = h.seed("a.jpg", "raw bytes");

    h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(h.manifest(&entry.fingerprint).last_accessed, Some(T0));

    h.clock.advance(ChronoDuration::seconds(60));
    h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(h.manifest(&entry.fingerprint).last_accessed, Some(T0));

    h.clock.advance(ChronoDuration::seconds(300));
    h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(
        h.manifest(&entry.fingerprint).last_accessed,
        Some(T0 + 360_000)
    );
}

#[tokio::test]
async fn test_tag_change_discards_the_entry_directory() {
    let h = Harness::new(|c| c);
    let entry = h.seed("a.jpg", "first version");

    let path = h.cache.ensure_original(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"first version");
    h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();

    h.remote.insert(&entry.entry.repo_path, "second version");
    let mut changed = entry.clone();
    changed.entry.content_hash = Some("h2".to_string());

    let path = h.cache.ensure_original(h.remote.as_ref(), &changed).await.unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"second version");

    let manifest = h.manifest(&entry.fingerprint);
    assert_eq!(manifest.tag, core_cache::cache_tag(&changed.entry));
    assert!(manifest.preview.is_none());
    assert!(!h.entry_dir(&entry.fingerprint).join("preview.jpg").exists());
}

#[tokio::test]
async fn test_preview_is_derived_from_a_cached_original() {
    let h = Harness::new(|c| c.with_preview(32, 80));
    let entry = h.seed("a.png", png(100, 100));

    h.cache.ensure_original(h.remote.as_ref(), &entry).await.unwrap();
    let reads = h.remote.read_count();

    let preview = h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(h.remote.read_count(), reads);
    assert_eq!(image::open(preview).unwrap().width(), 32);

    let manifest = h.manifest(&entry.fingerprint);
    assert!(manifest.preview.is_some());
    assert!(manifest.original.is_some());
}

#[tokio::test]
async fn test_missing_original_reference_is_dropped_on_preview_store() {
    let h = Harness::new(|c| c);
    let entry = h.seed("a.jpg", "bytes");

    let original = h.cache.ensure_original(h.remote.as_ref(), &entry).await.unwrap();
    std::fs::remove_file(&original).unwrap();

    h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();
    let manifest = h.manifest(&entry.fingerprint);
    assert!(manifest.preview.is_some());
    assert!(manifest.original.is_none());
}

#[tokio::test]
async fn test_fetch_tolerates_path_encoding_differences() {
    let h = Harness::new(|c| c);
    h.remote.insert("images/My Trip/a.jpg", "decoded path");
    let entry = cached("a.jpg", "images/My%20Trip/a.jpg", 12, "h1");

    let path = h.cache.ensure_original(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"decoded path");
}

#[tokio::test]
async fn test_fetch_falls_back_to_preview_repo_path() {
    let h = Harness::new(|c| c);
    h.remote.insert("previews/a.jpg", "small copy");
    let mut entry = cached("a.jpg", "images/Camera/a.jpg", 10, "h1");
    entry.entry.preview_repo_path = Some("previews/a.jpg".to_string());

    let path = h.cache.ensure_original(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"small copy");
}

#[tokio::test]
async fn test_missing_remote_file_is_unavailable() {
    let h = Harness::new(|c| c);
    let entry = cached("gone.jpg", "images/Camera/gone.jpg", 10, "h1");

    let err = h
        .cache
        .ensure_preview(h.remote.as_ref(), &entry)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Unavailable { attempts: 1, .. }));
    assert!(!h.entry_dir(&entry.fingerprint).join("preview.jpg").exists());
}

#[tokio::test]
async fn test_corrupt_manifest_is_a_cache_miss() {
    let h = Harness::new(|c| c);
    let entry = h.seed("a.jpg", "bytes");
    h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();

    std::fs::write(h.entry_dir(&entry.fingerprint).join("manifest.json"), b"{not json").unwrap();
    let reads = h.remote.read_count();

    h.cache.ensure_preview(h.remote.as_ref(), &entry).await.unwrap();
    assert_eq!(h.remote.read_count(), reads + 1);
    assert_eq!(h.manifest(&entry.fingerprint).fingerprint, entry.fingerprint);
}

#[tokio::test]
async fn test_concurrent_fetches_of_one_entry_hit_the_remote_once() {
    let h = Harness::new(|c| c);
    let entry = h.seed("a.jpg", "bytes");

    let (first, second) = tokio::join!(
        h.cache.ensure_preview(h.remote.as_ref(), &entry),
        h.cache.ensure_preview(h.remote.as_ref(), &entry)
    );

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(h.remote.read_count(), 1);
}

#[tokio::test]
async fn test_eviction_removes_orphans_and_expired_entries() {
    let h = Harness::new(|c| {
        c.with_max_ages(
            Duration::from_secs(24 * 3600),
            Duration::from_secs(3 * 24 * 3600),
        )
    });
    let preview_only = h.seed("p.jpg", "preview source");
    let with_original = h.seed("o.jpg", "original source");
    h.cache
        .ensure_preview(h.remote.as_ref(), &preview_only)
        .await
        .unwrap();
    h.cache
        .ensure_original(h.remote.as_ref(), &with_original)
        .await
        .unwrap();

    let orphan = h.cache.repo_dir(h.repo()).join("orphan");
    std::fs::create_dir_all(&orphan).unwrap();
    std::fs::write(orphan.join("stray.bin"), b"xx").unwrap();

    h.clock.advance(ChronoDuration::days(2));
    let report = h.cache.evict_now(h.repo()).await.unwrap();
    assert_eq!(report.orphans_removed, 1);
    assert_eq!(report.expired_removed, 1);
    assert!(!dir_exists(&orphan));
    assert!(!dir_exists(&h.entry_dir(&preview_only.fingerprint)));
    assert!(dir_exists(&h.entry_dir(&with_original.fingerprint)));

    h.clock.advance(ChronoDuration::days(2));
    let report = h.cache.evict_now(h.repo()).await.unwrap();
    assert_eq!(report.expired_removed, 1);
    assert!(!dir_exists(&h.entry_dir(&with_original.fingerprint)));
}

#[tokio::test]
async fn test_over_budget_eviction_keeps_originals_on_ties() {
    let h = Harness::new(|c| c.with_max_size(4_000));
    let blob = vec![7u8; 1_000];

    let p1 = h.seed("p1.jpg", blob.clone());
    let p2 = h.seed("p2.jpg", blob.clone());
    let o1 = h.seed("o1.jpg", blob.clone());
    let o2 = h.seed("o2.jpg", blob.clone());

    h.cache.ensure_original(h.remote.as_ref(), &o1).await.unwrap();
    h.cache.ensure_preview(h.remote.as_ref(), &p1).await.unwrap();
    h.cache.ensure_original(h.remote.as_ref(), &o2).await.unwrap();
    h.cache.ensure_preview(h.remote.as_ref(), &p2).await.unwrap();

    let before = h.cache.stats(h.repo()).await.unwrap();
    assert!(before.is_over_budget());

    let report = h.cache.evict_now(h.repo()).await.unwrap();
    assert_eq!(report.over_budget_removed, 2);
    assert!(report.remaining_bytes <= 3_200);

    assert!(!dir_exists(&h.entry_dir(&p1.fingerprint)));
    assert!(!dir_exists(&h.entry_dir(&p2.fingerprint)));
    assert!(dir_exists(&h.entry_dir(&o1.fingerprint)));
    assert!(dir_exists(&h.entry_dir(&o2.fingerprint)));

    let after = h.cache.stats(h.repo()).await.unwrap();
    assert!(after.total_bytes <= 3_200);
    assert_eq!(after.originals, 2);
}

#[tokio::test]
async fn test_over_budget_eviction_takes_least_recently_used_first() {
    let h = Harness::new(|c| c.with_max_size(2_500));
    let blob = vec![1u8; 1_000];
    let old = h.seed("old.jpg", blob.clone());
    let mid = h.seed("mid.jpg", blob.clone());
    let new = h.seed("new.jpg", blob.clone());

    for entry in [&old, &mid, &new] {
        h.cache.ensure_original(h.remote.as_ref(), entry).await.unwrap();
        h.clock.advance(ChronoDuration::minutes(1));
    }

    let report = h.cache.evict_now(h.repo()).await.unwrap();
    assert_eq!(report.over_budget_removed, 2);
    assert!(!dir_exists(&h.entry_dir(&old.fingerprint)));
    assert!(!dir_exists(&h.entry_dir(&mid.fingerprint)));
    assert!(dir_exists(&h.entry_dir(&new.fingerprint)));
}

#[tokio::test]
async fn test_eviction_is_throttled_per_repository() {
    let h = Harness::new(|c| c.with_eviction_interval(Duration::from_secs(600)));

    assert!(!h.cache.evict(h.repo()).await.unwrap().throttled);
    assert!(h.cache.evict(h.repo()).await.unwrap().throttled);

    let other = RepoRef::new("octo", "archive", "main");
    assert!(!h.cache.evict(&other).await.unwrap().throttled);

    h.clock.advance(ChronoDuration::minutes(11));
    assert!(!h.cache.evict(h.repo()).await.unwrap().throttled);
}

#[tokio::test]
async fn test_invalidate_and_clear_repo() {
    let h = Harness::new(|c| c);
    let a = h.seed("a.jpg", "a");
    let b = h.seed("b.jpg", "b");
    h.cache.ensure_preview(h.remote.as_ref(), &a).await.unwrap();
    h.cache.ensure_preview(h.remote.as_ref(), &b).await.unwrap();

    assert!(h.cache.invalidate(h.repo(), &a.fingerprint).await.unwrap());
    assert!(!h.cache.invalidate(h.repo(), &a.fingerprint).await.unwrap());
    assert_eq!(h.cache.stats(h.repo()).await.unwrap().entries, 1);

    h.cache.clear_repo(h.repo()).await.unwrap();
    let stats = h.cache.stats(h.repo()).await.unwrap();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.total_bytes, 0);
}

#[tokio::test]
async fn test_prefetch_counts_ready_and_failed_entries() {
    let h = Harness::new(|c| c.with_prefetch_workers(2));
    let entries = vec![
        h.seed("a.jpg", "a"),
        h.seed("b.jpg", "b"),
        cached("missing.jpg", "images/Camera/missing.jpg", 1, "h1"),
    ];

    let report = h.cache.prefetch_previews(h.remote.as_ref(), &entries).await;
    assert_eq!(report.ready, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(h.cache.stats(h.repo()).await.unwrap().previews, 2);
}
