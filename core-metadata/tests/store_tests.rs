//! Integration tests for the sharded metadata store

use bridge_traits::remote::{RemoteStorage, RepoRef};
use bridge_traits::testing::{ManualClock, MemoryRemoteStorage, RemoteWrite};
use core_metadata::documents::{ManifestDocument, ShardDocument, ShardEntry};
use core_metadata::{MetaEntry, MetadataConfig, MetadataError, MetadataStore, ShardState};
use std::sync::Arc;

const JAN_31: i64 = 1_706_659_200_000; // 2024-01-31T00:00:00Z
const DAY: i64 = 86_400_000;

fn remote() -> Arc<MemoryRemoteStorage> {
    Arc::new(MemoryRemoteStorage::new(RepoRef::new("octo", "photos", "main")))
}

fn store_with(remote: &Arc<MemoryRemoteStorage>, config: MetadataConfig) -> MetadataStore {
    MetadataStore::new(
        remote.clone(),
        Arc::new(ManualClock::at_millis(JAN_31 + DAY * 30)),
        config,
    )
    .unwrap()
}

fn store(remote: &Arc<MemoryRemoteStorage>) -> MetadataStore {
    store_with(remote, MetadataConfig::default())
}

fn entry(name: &str, created_at: i64) -> MetaEntry {
    let mut entry = MetaEntry::new(format!("images/Camera/{name}"));
    entry.created_at = Some(created_at);
    entry.file_size = Some(100);
    entry.content_hash = Some(format!("hash-{name}"));
    entry.uploaded_at = Some(JAN_31 + DAY * 30);
    entry
}

fn fp(name: &str, ts: i64) -> String {
    format!("{name}_{ts}_100")
}

fn manifest(remote: &MemoryRemoteStorage) -> ManifestDocument {
    serde_json::from_slice(&remote.content("meta/manifest.json").unwrap()).unwrap()
}

fn shard(remote: &MemoryRemoteStorage, path: &str) -> ShardDocument {
    serde_json::from_slice(&remote.content(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_upsert_round_trips_through_a_fresh_store() {
    let remote = remote();
    let first = store(&remote);
    let e = entry("a.jpg", JAN_31 + 5_000);

    let cached = first.upsert(&fp("a.jpg", JAN_31), e.clone()).await.unwrap();
    assert_eq!(cached.bucket, "2024-01-31");

    let second = store(&remote);
    second.bootstrap().await.unwrap();
    let loaded = second.get_entry(&fp("a.jpg", JAN_31)).await.unwrap();

    assert_eq!(loaded.entry, e);
    assert_eq!(loaded.bucket, "2024-01-31");
    assert_eq!(
        second.entry_by_path("images/Camera/a.jpg").await.map(|c| c.fingerprint),
        Some(fp("a.jpg", JAN_31))
    );
}

#[tokio::test]
async fn test_three_uploads_share_one_bucket() {
    let remote = remote();
    let store = store(&remote);

    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        store.upsert(&fp(name, JAN_31), entry(name, JAN_31 + 1)).await.unwrap();
    }

    let doc = shard(&remote, "meta/2024/01/31/entries.json");
    assert_eq!(doc.bucket, "2024-01-31");
    assert_eq!(doc.entries.len(), 3);

    let manifest = manifest(&remote);
    let row = &manifest.shards["2024-01-31"];
    assert_eq!(row.count, 3);
    assert_eq!(row.path, "meta/2024/01/31/entries.json");
    assert_eq!(Some(row.sha.clone()), remote.sha("meta/2024/01/31/entries.json"));
}

#[tokio::test]
async fn test_remove_updates_counts_and_deletes_empty_shards() {
    let remote = remote();
    let store = store(&remote);
    store.upsert(&fp("a.jpg", JAN_31), entry("a.jpg", JAN_31)).await.unwrap();
    store.upsert(&fp("b.jpg", JAN_31), entry("b.jpg", JAN_31)).await.unwrap();
    store.upsert(&fp("c.jpg", JAN_31 + DAY), entry("c.jpg", JAN_31 + DAY)).await.unwrap();

    let outcome = store
        .remove(&[fp("a.jpg", JAN_31), fp("c.jpg", JAN_31 + DAY), "never_1_1".to_string()])
        .await
        .unwrap();

    assert_eq!(outcome.removed.len(), 2);
    assert_eq!(outcome.missing, vec!["never_1_1".to_string()]);

    let manifest = manifest(&remote);
    assert_eq!(manifest.shards.len(), 1);
    assert_eq!(manifest.shards["2024-01-31"].count, 1);
    assert!(manifest.shards.values().all(|row| row.count > 0));
    assert!(!remote.contains("meta/2024/02/01/entries.json"));

    assert!(store.get_entry(&fp("a.jpg", JAN_31)).await.is_none());
    assert!(store.get_entry(&fp("c.jpg", JAN_31 + DAY)).await.is_none());
    assert_eq!(store.shard_state("2024-02-01").await, ShardState::Unknown);
}

#[tokio::test]
async fn test_remove_purges_indices_even_when_write_fails() {
    let remote = remote();
    let store = store(&remote);
    store.upsert(&fp("a.jpg", JAN_31), entry("a.jpg", JAN_31)).await.unwrap();
    store.upsert(&fp("b.jpg", JAN_31), entry("b.jpg", JAN_31)).await.unwrap();

    remote.fail_writes_under("meta/2024/01/31");
    let result = store.remove(&[fp("a.jpg", JAN_31)]).await;

    assert!(matches!(result, Err(MetadataError::Bridge(_))));
    assert!(store.get_entry(&fp("a.jpg", JAN_31)).await.is_none());
    assert!(store.entry_by_path("images/Camera/a.jpg").await.is_none());
    assert!(!store.bucket_members("2024-01-31").await.contains(&fp("a.jpg", JAN_31)));
    assert_eq!(store.shard_state("2024-01-31").await, ShardState::NotLoaded);

    // The remote still holds both; a retry after recovery removes it for real.
    remote.clear_failures();
    store.load_all().await.unwrap();
    assert!(store.get_entry(&fp("a.jpg", JAN_31)).await.is_some());
    let outcome = store.remove(&[fp("a.jpg", JAN_31)]).await.unwrap();
    assert_eq!(outcome.removed, vec![fp("a.jpg", JAN_31)]);
    assert_eq!(shard(&remote, "meta/2024/01/31/entries.json").entries.len(), 1);
}

#[tokio::test]
async fn test_missing_manifest_is_rebuilt_from_shards() {
    let remote = remote();
    let writer = store(&remote);
    for (name, ts) in [("a.jpg", JAN_31), ("b.jpg", JAN_31), ("c.jpg", JAN_31 - DAY)] {
        writer.upsert(&fp(name, ts), entry(name, ts)).await.unwrap();
    }
    let original = manifest(&remote);
    remote.remove("meta/manifest.json");

    let reader = store(&remote);
    reader.bootstrap().await.unwrap();

    let rebuilt = manifest(&remote);
    assert_eq!(rebuilt.shards.len(), original.shards.len());
    for (bucket, row) in &original.shards {
        assert_eq!(rebuilt.shards[bucket].count, row.count);
        assert_eq!(rebuilt.shards[bucket].path, row.path);
    }
    assert_eq!(reader.cached_count().await, 3);
}

#[tokio::test]
async fn test_rebuild_skips_shards_with_mismatched_bucket() {
    let remote = remote();
    let mut doc = ShardDocument::empty("2023-05-05", 0);
    doc.entries.insert(
        "x_1_1".into(),
        ShardEntry {
            entry: MetaEntry::new("images/a/x.jpg"),
            updated_at: 0,
        },
    );
    remote.insert("meta/2024/01/01/entries.json", serde_json::to_vec(&doc).unwrap());

    let store = store(&remote);
    store.bootstrap().await.unwrap();

    assert!(store.manifest_snapshot().await.shards.is_empty());
    assert!(!remote.contains("meta/manifest.json"));
    assert_eq!(store.cached_count().await, 0);
}

#[tokio::test]
async fn test_legacy_shard_is_readable_and_moved_on_write() {
    let remote = remote();
    let mut doc = ShardDocument::empty("2024-01-31", 0);
    doc.entries.insert(
        fp("old.jpg", JAN_31),
        ShardEntry {
            entry: entry("old.jpg", JAN_31),
            updated_at: 0,
        },
    );
    remote.insert("meta/shards/2024-01-31.json", serde_json::to_vec(&doc).unwrap());

    let store = store(&remote);
    store.bootstrap().await.unwrap();
    assert!(store.get_entry(&fp("old.jpg", JAN_31)).await.is_some());
    assert_eq!(manifest(&remote).shards["2024-01-31"].path, "meta/shards/2024-01-31.json");

    store.upsert(&fp("new.jpg", JAN_31), entry("new.jpg", JAN_31)).await.unwrap();

    assert!(!remote.contains("meta/shards/2024-01-31.json"));
    let moved = shard(&remote, "meta/2024/01/31/entries.json");
    assert_eq!(moved.entries.len(), 2);
    assert_eq!(manifest(&remote).shards["2024-01-31"].path, "meta/2024/01/31/entries.json");
}

#[tokio::test]
async fn test_preload_stops_at_target_and_loads_freshest_first() {
    let remote = remote();
    let writer = store(&remote);
    for day in 0..4 {
        let ts = JAN_31 + DAY * day;
        writer.upsert(&fp("p.jpg", ts), entry("p.jpg", ts)).await.unwrap();
    }

    let reader = store_with(&remote, MetadataConfig::default().with_preload_entry_target(2));
    reader.bootstrap().await.unwrap();

    assert_eq!(reader.cached_count().await, 2);
    assert!(reader.has_unloaded_shards().await);
    // Every row shares one updatedAt, so the later bucket wins the tie.
    assert_eq!(reader.shard_state("2024-02-03").await, ShardState::Loaded);
    assert_eq!(reader.shard_state("2024-01-31").await, ShardState::NotLoaded);

    assert_eq!(reader.load_next_shards(1).await.unwrap(), 1);
    assert_eq!(reader.load_all().await.unwrap(), 1);
    assert!(!reader.has_unloaded_shards().await);
    assert_eq!(reader.remote_count().await, 4);

    let page = reader.cached_entries(1, Some(2)).await;
    let buckets: Vec<_> = page.iter().map(|c| c.bucket.as_str()).collect();
    assert_eq!(buckets, vec!["2024-02-02", "2024-02-01"]);
}

#[tokio::test]
async fn test_moving_an_entry_between_buckets() {
    let remote = remote();
    let store = store(&remote);
    let key = fp("m.jpg", JAN_31);
    store.upsert(&key, entry("m.jpg", JAN_31)).await.unwrap();
    store.upsert(&fp("n.jpg", JAN_31), entry("n.jpg", JAN_31)).await.unwrap();

    let moved = store.upsert(&key, entry("m.jpg", JAN_31 + DAY)).await.unwrap();

    assert_eq!(moved.bucket, "2024-02-01");
    assert_eq!(shard(&remote, "meta/2024/01/31/entries.json").entries.len(), 1);
    assert!(shard(&remote, "meta/2024/02/01/entries.json").entries.contains_key(&key));
    assert_eq!(store.bucket_members("2024-01-31").await, vec![fp("n.jpg", JAN_31)]);
}

#[tokio::test]
async fn test_stale_shard_sha_surfaces_conflict() {
    let remote = remote();
    let store = store(&remote);
    store.upsert(&fp("a.jpg", JAN_31), entry("a.jpg", JAN_31)).await.unwrap();

    // Another device rewrites the shard behind our back.
    let path = "meta/2024/01/31/entries.json";
    let sha = remote.sha(path).unwrap();
    remote
        .put_file(path, remote.content(path).unwrap(), Some(&sha))
        .await
        .unwrap();

    let err = store
        .upsert(&fp("b.jpg", JAN_31), entry("b.jpg", JAN_31))
        .await
        .unwrap_err();
    assert!(err.is_version_conflict());
    assert!(store.get_entry(&fp("b.jpg", JAN_31)).await.is_none());

    // The failed write dropped the stale document; the next attempt re-reads.
    store.upsert(&fp("b.jpg", JAN_31), entry("b.jpg", JAN_31)).await.unwrap();
    assert_eq!(shard(&remote, path).entries.len(), 2);
}

#[tokio::test]
async fn test_concurrent_writers_keep_each_others_manifest_rows() {
    let remote = remote();
    store(&remote)
        .upsert(&fp("seed.jpg", JAN_31), entry("seed.jpg", JAN_31))
        .await
        .unwrap();

    let device_a = store(&remote);
    let device_b = store(&remote);
    device_a.bootstrap().await.unwrap();
    device_b.bootstrap().await.unwrap();

    let b_key = fp("b.jpg", JAN_31 + DAY);
    device_b.upsert(&b_key, entry("b.jpg", JAN_31 + DAY)).await.unwrap();
    // A still holds the manifest SHA from before B's write.
    let a_key = fp("a.jpg", JAN_31 + DAY * 2);
    device_a.upsert(&a_key, entry("a.jpg", JAN_31 + DAY * 2)).await.unwrap();

    let rows: Vec<String> = manifest(&remote).shards.keys().cloned().collect();
    assert_eq!(rows, vec!["2024-01-31", "2024-02-01", "2024-02-02"]);
    assert_eq!(
        Some(manifest(&remote).shards["2024-02-01"].sha.clone()),
        remote.sha("meta/2024/02/01/entries.json")
    );

    let fresh = store(&remote);
    fresh.bootstrap().await.unwrap();
    fresh.load_all().await.unwrap();
    assert!(fresh.get_entry(&b_key).await.is_some());
    assert!(fresh.get_entry(&a_key).await.is_some());

    // A learned about B's bucket and can page it in.
    device_a.load_all().await.unwrap();
    assert!(device_a.get_entry(&b_key).await.is_some());
}

#[tokio::test]
async fn test_manifest_merge_drops_buckets_another_writer_emptied() {
    let remote = remote();
    let seed_key = fp("seed.jpg", JAN_31);
    store(&remote)
        .upsert(&seed_key, entry("seed.jpg", JAN_31))
        .await
        .unwrap();

    let device_a = store(&remote);
    let device_b = store(&remote);
    device_a.bootstrap().await.unwrap();
    device_b.bootstrap().await.unwrap();
    assert!(device_a.get_entry(&seed_key).await.is_some());

    device_b.remove(&[seed_key.clone()]).await.unwrap();
    device_a
        .upsert(&fp("a.jpg", JAN_31 + DAY), entry("a.jpg", JAN_31 + DAY))
        .await
        .unwrap();

    let rows: Vec<String> = manifest(&remote).shards.keys().cloned().collect();
    assert_eq!(rows, vec!["2024-02-01"]);
    assert!(device_a.get_entry(&seed_key).await.is_none());
    assert_eq!(device_a.shard_state("2024-01-31").await, ShardState::Unknown);
}

#[tokio::test]
async fn test_reset_forgets_state() {
    let remote = remote();
    let store = store(&remote);
    store.upsert(&fp("a.jpg", JAN_31), entry("a.jpg", JAN_31)).await.unwrap();

    remote.reset_branch("reset").await.unwrap();
    store.reset().await;

    assert!(!store.is_bootstrapped().await);
    store.bootstrap().await.unwrap();
    assert_eq!(store.cached_count().await, 0);
    assert!(remote.writes().contains(&RemoteWrite::Reset));
}

#[tokio::test]
async fn test_rejects_empty_repo_path() {
    let remote = remote();
    let store = store(&remote);

    let err = store.upsert("a_1_1", MetaEntry::new("")).await.unwrap_err();
    assert!(matches!(err, MetadataError::InvalidEntry(_)));
}
