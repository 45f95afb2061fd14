//! Tests for the disk cache store.

use blobgate_cache::{CacheKey, CacheStore, DiskCacheConfig, DiskCacheStore};
use blobgate_core::FileMetadata;
use bytes::Bytes;
use std::time::Duration;
use tempfile::TempDir;

async fn open(temp_dir: &TempDir, max_size: u64, max_age_secs: u64) -> DiskCacheStore {
    let config = DiskCacheConfig::default()
        .with_dir(temp_dir.path().to_path_buf())
        .with_max_size_bytes(max_size)
        .with_max_age_secs(max_age_secs);
    DiskCacheStore::open(config).await.unwrap()
}

fn entry(content: &str) -> (CacheKey, Bytes, FileMetadata) {
    let payload = Bytes::from(content.to_string());
    let metadata = FileMetadata::for_payload("text/plain", "txt", &payload);
    let key = CacheKey::derive(&payload, "text/plain", "txt");
    (key, payload, metadata)
}

#[tokio::test]
async fn test_put_then_get() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024, 3600).await;
    let (key, payload, metadata) = entry("hello cache");

    assert!(store.get(&key).await.is_none());
    assert!(store.put(&key, payload.clone(), &metadata).await);

    let cached = store.get(&key).await.unwrap();
    assert_eq!(cached.payload(), &payload);
    assert_eq!(cached.metadata(), &metadata);
    assert_eq!(*cached.size_bytes(), payload.len() as u64);
    assert!(cached.last_access_at() >= cached.stored_at());

    let stats = store.stats().await;
    assert_eq!(*stats.hits(), 1);
    assert_eq!(*stats.misses(), 1);
    assert_eq!(*stats.hit_ratio(), 0.5);
    assert!(temp_dir.path().join(key.as_str()).is_file());
    assert!(temp_dir.path().join(format!("{}.meta", key)).is_file());
}

#[tokio::test]
async fn test_repeated_put_does_not_double_count() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024, 3600).await;
    let (key, payload, metadata) = entry("same bytes");

    store.put(&key, payload.clone(), &metadata).await;
    store.put(&key, payload.clone(), &metadata).await;

    assert_eq!(*store.stats().await.size_bytes(), payload.len() as u64);
    assert_eq!(store.get(&key).await.unwrap().payload(), &payload);
}

#[tokio::test]
async fn test_lru_evicts_oldest_access() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 30, 3600).await;
    let (a, pa, ma) = entry("aaaaaaaaaa");
    let (b, pb, mb) = entry("bbbbbbbbbb");
    let (c, pc, mc) = entry("cccccccccc");
    let (d, pd, md) = entry("dddddddddd");

    store.put(&a, pa, &ma).await;
    store.put(&b, pb, &mb).await;
    store.put(&c, pc, &mc).await;
    store.put(&d, pd, &md).await;

    assert!(store.get(&a).await.is_none());
    assert!(store.get(&b).await.is_some());
    assert!(store.get(&c).await.is_some());
    assert!(store.get(&d).await.is_some());
    assert_eq!(*store.stats().await.size_bytes(), 30);
}

#[tokio::test]
async fn test_access_protects_from_eviction() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 30, 3600).await;
    let (a, pa, ma) = entry("aaaaaaaaaa");
    let (b, pb, mb) = entry("bbbbbbbbbb");
    let (c, pc, mc) = entry("cccccccccc");
    let (d, pd, md) = entry("dddddddddd");

    store.put(&a, pa, &ma).await;
    store.put(&b, pb, &mb).await;
    store.put(&c, pc, &mc).await;
    assert!(store.get(&a).await.is_some());
    store.put(&d, pd, &md).await;

    assert!(store.get(&a).await.is_some());
    assert!(store.get(&b).await.is_none());
    assert!(!temp_dir.path().join(b.as_str()).exists());
}

#[tokio::test]
async fn test_size_bound_holds() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 100, 3600).await;

    for i in 0..40 {
        let (key, payload, metadata) = entry(&"x".repeat(5 + (i * 7) % 30));
        store.put(&key, payload, &metadata).await;
        assert!(*store.stats().await.size_bytes() <= 100);
    }
}

#[tokio::test]
async fn test_oversized_payload_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 8, 3600).await;
    let (key, payload, metadata) = entry("far too large for this cache");

    assert!(!store.put(&key, payload, &metadata).await);
    assert!(store.get(&key).await.is_none());
}

#[tokio::test]
async fn test_expired_entry_is_miss_and_deleted() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024, 0).await;
    let (key, payload, metadata) = entry("short lived");

    store.put(&key, payload, &metadata).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(store.get(&key).await.is_none());
    assert!(!temp_dir.path().join(key.as_str()).exists());
    assert_eq!(*store.stats().await.size_bytes(), 0);
}

#[tokio::test]
async fn test_purge_expired() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024, 0).await;
    for content in ["one", "two", "three"] {
        let (key, payload, metadata) = entry(content);
        store.put(&key, payload, &metadata).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.purge_expired().await, 3);
    assert_eq!(store.purge_expired().await, 0);
    assert_eq!(*store.stats().await.size_bytes(), 0);
}

#[tokio::test]
async fn test_remove() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024, 3600).await;
    let (key, payload, metadata) = entry("removable");

    store.put(&key, payload, &metadata).await;
    assert!(store.remove(&key).await);
    assert!(!store.remove(&key).await);
    assert!(store.get(&key).await.is_none());
}

#[tokio::test]
async fn test_index_rebuilt_on_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let (key, payload, metadata) = entry("persisted");
    {
        let store = open(&temp_dir, 1024, 3600).await;
        store.put(&key, payload.clone(), &metadata).await;
    }

    let reopened = open(&temp_dir, 1024, 3600).await;
    assert_eq!(*reopened.stats().await.size_bytes(), payload.len() as u64);
    assert_eq!(reopened.get(&key).await.unwrap().payload(), &payload);
}

#[tokio::test]
async fn test_corrupt_payload_is_miss_with_error() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024, 3600).await;
    let (key, payload, metadata) = entry("soon corrupt");

    store.put(&key, payload, &metadata).await;
    std::fs::write(temp_dir.path().join(format!("{}.meta", key)), b"{not json").unwrap();

    assert!(store.get(&key).await.is_none());
    let stats = store.stats().await;
    assert_eq!(*stats.errors(), 1);
    assert_eq!(*stats.error_rate(), 1.0);
}
