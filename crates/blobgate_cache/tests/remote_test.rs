//! Tests for the remote cache store over the in-memory key/value client.

use blobgate_cache::{
    CacheBackendConfig, CacheError, CacheErrorKind, CacheKey, CacheResult, CacheStore, KvClient,
    MemoryKv, RemoteCacheConfig, RemoteCacheStore,
};
use blobgate_core::FileMetadata;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

fn store(max_size: u64, max_age_secs: u64) -> (Arc<MemoryKv>, RemoteCacheStore) {
    let kv = Arc::new(MemoryKv::default());
    let config = RemoteCacheConfig::default()
        .with_max_size_bytes(max_size)
        .with_max_age_secs(max_age_secs);
    (kv.clone(), RemoteCacheStore::new(kv, config))
}

fn entry(content: &str) -> (CacheKey, Bytes, FileMetadata) {
    let payload = Bytes::from(content.to_string());
    let metadata = FileMetadata::for_payload("application/json", "json", &payload);
    let key = CacheKey::derive(&payload, "application/json", "json");
    (key, payload, metadata)
}

#[tokio::test]
async fn test_put_then_get_uses_prefixed_keys() {
    let (kv, store) = store(1024, 3600);
    let (key, payload, metadata) = entry(r#"{"a":1}"#);

    assert!(store.put(&key, payload.clone(), &metadata).await);

    let raw = kv
        .get(&format!("blob_service_cache:{}:data", key))
        .await
        .unwrap();
    assert_eq!(raw.as_deref(), Some(&payload[..]));

    let cached = store.get(&key).await.unwrap();
    assert_eq!(cached.payload(), &payload);
    assert_eq!(cached.metadata().content_type, "application/json");
}

#[tokio::test]
async fn test_repeated_put_does_not_double_count() {
    let (_, store) = store(1024, 3600);
    let (key, payload, metadata) = entry("[1,2,3]");

    store.put(&key, payload.clone(), &metadata).await;
    store.put(&key, payload.clone(), &metadata).await;

    assert_eq!(*store.stats().await.size_bytes(), payload.len() as u64);
}

#[tokio::test]
async fn test_lru_eviction_matches_disk_store() {
    let (_, store) = store(30, 3600);
    let (a, pa, ma) = entry("aaaaaaaaaa");
    let (b, pb, mb) = entry("bbbbbbbbbb");
    let (c, pc, mc) = entry("cccccccccc");
    let (d, pd, md) = entry("dddddddddd");

    store.put(&a, pa, &ma).await;
    store.put(&b, pb, &mb).await;
    store.put(&c, pc, &mc).await;
    assert!(store.get(&a).await.is_some());
    store.put(&d, pd, &md).await;

    assert!(store.get(&b).await.is_none());
    assert!(store.get(&a).await.is_some());
    assert!(store.get(&c).await.is_some());
    assert!(store.get(&d).await.is_some());
    assert_eq!(*store.stats().await.size_bytes(), 30);
}

#[tokio::test]
async fn test_expiry_uses_stored_timestamp() {
    let (_, store) = store(1024, 0);
    let (key, payload, metadata) = entry("{}");

    store.put(&key, payload, &metadata).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(store.get(&key).await.is_none());
    assert_eq!(*store.stats().await.size_bytes(), 0);
}

#[tokio::test]
async fn test_purge_and_remove() {
    let (_, store) = store(1024, 3600);
    let (key, payload, metadata) = entry("{\"keep\":true}");

    store.put(&key, payload, &metadata).await;
    assert_eq!(store.purge_expired().await, 0);
    assert!(store.remove(&key).await);
    assert!(!store.remove(&key).await);
    assert_eq!(*store.stats().await.size_bytes(), 0);
}

/// Hands control back to the scheduler before every command so that
/// concurrent callers interleave between round trips.
#[derive(Debug, Default)]
struct InterleavingKv {
    inner: MemoryKv,
}

#[async_trait::async_trait]
impl KvClient for InterleavingKv {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }
    async fn set_get(&self, key: &str, value: Vec<u8>) -> CacheResult<Option<Vec<u8>>> {
        tokio::task::yield_now().await;
        self.inner.set_get(key, value).await
    }
    async fn get_del(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        tokio::task::yield_now().await;
        self.inner.get_del(key).await
    }
    async fn del(&self, keys: &[String]) -> CacheResult<()> {
        tokio::task::yield_now().await;
        self.inner.del(keys).await
    }
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        tokio::task::yield_now().await;
        self.inner.incr_by(key, delta).await
    }
    async fn zadd(&self, key: &str, member: &str, score: i64) -> CacheResult<()> {
        tokio::task::yield_now().await;
        self.inner.zadd(key, member, score).await
    }
    async fn zrem(&self, key: &str, member: &str) -> CacheResult<()> {
        tokio::task::yield_now().await;
        self.inner.zrem(key, member).await
    }
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        tokio::task::yield_now().await;
        self.inner.zrange(key, start, stop).await
    }
}

fn interleaving_store(max_size: u64) -> (Arc<InterleavingKv>, RemoteCacheStore) {
    let kv = Arc::new(InterleavingKv::default());
    let config = RemoteCacheConfig::default().with_max_size_bytes(max_size);
    (kv.clone(), RemoteCacheStore::new(kv, config))
}

#[tokio::test]
async fn test_concurrent_puts_of_one_key_count_once() {
    let (kv, store) = interleaving_store(1024);
    let (key, payload, metadata) = entry(&"x".repeat(100));

    let (first, second) = tokio::join!(
        store.put(&key, payload.clone(), &metadata),
        store.put(&key, payload.clone(), &metadata),
    );
    assert!(first && second);

    let raw = kv.get("blob_service_cache:__size").await.unwrap();
    assert_eq!(raw.as_deref(), Some(&b"100"[..]));
    assert_eq!(*store.stats().await.size_bytes(), 100);
    assert_eq!(store.get(&key).await.unwrap().payload(), &payload);
}

#[tokio::test]
async fn test_concurrent_removes_release_once() {
    let (_, store) = interleaving_store(1024);
    let (key, payload, metadata) = entry(&"y".repeat(64));
    let (other, other_payload, other_metadata) = entry(&"z".repeat(32));
    store.put(&key, payload, &metadata).await;
    store.put(&other, other_payload, &other_metadata).await;

    let (first, second) = tokio::join!(store.remove(&key), store.remove(&key));
    assert!(first ^ second);
    assert_eq!(*store.stats().await.size_bytes(), 32);
}

#[tokio::test]
async fn test_racing_puts_do_not_evict_live_entries() {
    let (_, store) = interleaving_store(250);
    let (resident, resident_payload, resident_metadata) = entry(&"r".repeat(100));
    store
        .put(&resident, resident_payload, &resident_metadata)
        .await;

    let (key, payload, metadata) = entry(&"n".repeat(100));
    tokio::join!(
        store.put(&key, payload.clone(), &metadata),
        store.put(&key, payload.clone(), &metadata),
    );
    // One more write of the racing key must still fit beside the resident
    store.put(&key, payload, &metadata).await;

    assert!(store.get(&resident).await.is_some());
    assert_eq!(*store.stats().await.size_bytes(), 200);
}

#[derive(Debug)]
struct FailingKv;

fn down() -> CacheError {
    CacheError::new(CacheErrorKind::Remote("connection refused".into()))
}

#[async_trait::async_trait]
impl KvClient for FailingKv {
    async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(down())
    }
    async fn set(&self, _key: &str, _value: Vec<u8>) -> CacheResult<()> {
        Err(down())
    }
    async fn set_get(&self, _key: &str, _value: Vec<u8>) -> CacheResult<Option<Vec<u8>>> {
        Err(down())
    }
    async fn get_del(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
        Err(down())
    }
    async fn del(&self, _keys: &[String]) -> CacheResult<()> {
        Err(down())
    }
    async fn incr_by(&self, _key: &str, _delta: i64) -> CacheResult<i64> {
        Err(down())
    }
    async fn zadd(&self, _key: &str, _member: &str, _score: i64) -> CacheResult<()> {
        Err(down())
    }
    async fn zrem(&self, _key: &str, _member: &str) -> CacheResult<()> {
        Err(down())
    }
    async fn zrange(&self, _key: &str, _start: isize, _stop: isize) -> CacheResult<Vec<String>> {
        Err(down())
    }
}

#[tokio::test]
async fn test_unreachable_service_degrades_to_miss() {
    let store = RemoteCacheStore::new(Arc::new(FailingKv), RemoteCacheConfig::default());
    let (key, payload, metadata) = entry("{}");

    assert!(!store.put(&key, payload, &metadata).await);
    assert!(store.get(&key).await.is_none());

    let stats = store.stats().await;
    assert_eq!(*stats.errors(), 2);
    assert_eq!(*stats.misses(), 1);
    assert_eq!(*stats.size_bytes(), 0);
}

#[tokio::test]
async fn test_factory_opens_memory_remote_store() {
    let config: CacheBackendConfig =
        serde_json::from_str(r#"{ "backend": "remote", "url": "memory://", "max_size_bytes": 64 }"#)
            .unwrap();
    let cache = config.open().await.unwrap();
    assert_eq!(cache.name(), "remote");

    let (key, payload, metadata) = entry("{\"x\":1}");
    assert!(cache.put(&key, payload, &metadata).await);
    assert!(cache.get(&key).await.is_some());
}
