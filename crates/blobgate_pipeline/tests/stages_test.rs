//! Tests for the built-in stages running inside a pipeline.

use base64::Engine;
use blobgate_cache::{CacheBackendConfig, CacheStore, DiskCacheConfig, RemoteCacheConfig};
use blobgate_core::{CompressionMethod, FileMetadata};
use blobgate_pipeline::{
    CacheMiddleware, CacheMiddlewareConfig, CompressionConfig, CompressionMiddleware,
    EncryptionConfig, EncryptionMiddleware, FailurePolicy, ImageEnhancementConfig,
    ImageEnhancementMiddleware, Middleware, MiddlewareContext, Pipeline, PipelineConfig,
    PipelineErrorKind,
};
use bytes::Bytes;
use std::sync::Arc;

fn key(byte: u8) -> String {
    base64::engine::general_purpose::STANDARD.encode([byte; 32])
}

fn text_payload(len: usize) -> Bytes {
    let line = b"2024-01-01 INFO request served in 12ms\n";
    Bytes::from(line.iter().copied().cycle().take(len).collect::<Vec<u8>>())
}

async fn memory_store() -> Arc<dyn CacheStore> {
    CacheBackendConfig::Remote(RemoteCacheConfig::default().with_url("memory://".to_string()))
        .open()
        .await
        .unwrap()
}

fn single(stage: Arc<dyn Middleware>) -> Pipeline {
    let mut pipeline = Pipeline::default();
    pipeline.add_middleware(stage).unwrap();
    pipeline
}

#[tokio::test]
async fn test_thousand_byte_text_compresses_and_restores() {
    let pipeline = single(Arc::new(CompressionMiddleware::new(
        CompressionConfig::default(),
    )));
    let data = text_payload(1000);
    let metadata = FileMetadata::for_payload("text/plain", "txt", &data);

    let (stored, stored_meta) = pipeline.process_upload(data.clone(), metadata).await.unwrap();
    assert!(stored.len() < 1000);
    assert!(stored_meta.compressed);
    assert_eq!(stored_meta.compression_method, Some(CompressionMethod::Gzip));
    assert_eq!(stored_meta.original_size, Some(1000));
    assert_eq!(stored_meta.size, stored.len() as u64);

    let (restored, restored_meta) = pipeline.process_download(stored, stored_meta).await.unwrap();
    assert_eq!(restored, data);
    assert!(!restored_meta.compressed);
    assert_eq!(restored_meta.compression_method, None);
    assert_eq!(restored_meta.size, 1000);
}

#[tokio::test]
async fn test_download_refuses_to_inflate_past_recorded_size() {
    let pipeline = single(Arc::new(CompressionMiddleware::new(
        CompressionConfig::default(),
    )));
    let bomb = blobgate_pipeline::compress(&vec![b' '; 8 * 1024 * 1024], CompressionMethod::Gzip, 9)
        .unwrap();

    let mut metadata = FileMetadata::for_payload("text/plain", "txt", b"tiny");
    metadata.original_size = Some(4);
    metadata.compressed = true;
    metadata.compression_method = Some(CompressionMethod::Gzip);
    let stored = Bytes::from(bomb);

    // The failing stage is skipped, so the stored bytes come back untouched
    let (restored, restored_meta) = pipeline
        .process_download(stored.clone(), metadata)
        .await
        .unwrap();
    assert_eq!(restored, stored);
    assert!(restored_meta.compressed);
}

#[tokio::test]
async fn test_compression_skips_small_and_binary_payloads() {
    let pipeline = single(Arc::new(CompressionMiddleware::new(
        CompressionConfig::default(),
    )));

    let small = text_payload(100);
    let (out, meta) = pipeline
        .process_upload(small.clone(), FileMetadata::for_payload("text/plain", "txt", &small))
        .await
        .unwrap();
    assert_eq!(out, small);
    assert!(!meta.compressed);

    let binary = text_payload(4000);
    let (out, meta) = pipeline
        .process_upload(binary.clone(), FileMetadata::for_payload("image/png", "png", &binary))
        .await
        .unwrap();
    assert_eq!(out, binary);
    assert!(!meta.compressed);
}

#[tokio::test]
async fn test_incompressible_payload_kept_as_is() {
    let pipeline = single(Arc::new(CompressionMiddleware::new(
        CompressionConfig::default().with_min_size(0),
    )));
    // Already-compressed bytes grow under a second pass
    let packed = Bytes::from(
        blobgate_pipeline::compress(&text_payload(4000), CompressionMethod::Zlib, 9).unwrap(),
    );
    let metadata = FileMetadata::for_payload("application/json", "json", &packed);

    let (out, meta) = pipeline.process_upload(packed.clone(), metadata).await.unwrap();
    assert_eq!(out, packed);
    assert!(!meta.compressed);
}

#[tokio::test]
async fn test_zlib_method_recorded() {
    let config = CompressionConfig::default().with_method(CompressionMethod::Zlib);
    let pipeline = single(Arc::new(CompressionMiddleware::new(config)));
    let data = text_payload(2048);
    let metadata = FileMetadata::for_payload("application/json", "json", &data);

    let (stored, meta) = pipeline.process_upload(data.clone(), metadata).await.unwrap();
    assert_eq!(meta.compression_method, Some(CompressionMethod::Zlib));
    let (restored, _) = pipeline.process_download(stored, meta).await.unwrap();
    assert_eq!(restored, data);
}

#[tokio::test]
async fn test_encryption_excludes_media() {
    let stage = EncryptionMiddleware::new(EncryptionConfig::default().with_key(key(1))).unwrap();
    let pipeline = single(Arc::new(stage));

    let photo = Bytes::from_static(b"\xFF\xD8 not really a jpeg");
    let (out, meta) = pipeline
        .process_upload(photo.clone(), FileMetadata::for_payload("image/jpeg", "jpg", &photo))
        .await
        .unwrap();
    assert_eq!(out, photo);
    assert!(!meta.encrypted);

    let notes = Bytes::from_static(b"meeting notes");
    let (out, meta) = pipeline
        .process_upload(notes.clone(), FileMetadata::for_payload("text/plain", "txt", &notes))
        .await
        .unwrap();
    assert_ne!(out, notes);
    assert!(meta.encrypted);
}

#[tokio::test]
async fn test_wrong_key_degrades_unless_required() {
    let writer = EncryptionMiddleware::new(EncryptionConfig::default().with_key(key(1))).unwrap();
    let data = Bytes::from_static(b"ledger");
    let (sealed, sealed_meta) = single(Arc::new(writer))
        .process_upload(data.clone(), FileMetadata::for_payload("text/plain", "txt", &data))
        .await
        .unwrap();

    let lenient = EncryptionMiddleware::new(EncryptionConfig::default().with_key(key(2))).unwrap();
    assert_eq!(lenient.failure_policy(), FailurePolicy::Skip);
    let (out, meta) = single(Arc::new(lenient))
        .process_download(sealed.clone(), sealed_meta.clone())
        .await
        .unwrap();
    assert_eq!(out, sealed);
    assert!(meta.encrypted);

    let strict = EncryptionMiddleware::new(
        EncryptionConfig::default()
            .with_key(key(2))
            .with_required(true),
    )
    .unwrap();
    let err = single(Arc::new(strict))
        .process_download(sealed, sealed_meta)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, PipelineErrorKind::Aborted { .. }));
}

#[tokio::test]
async fn test_identical_uploads_hit_cache() {
    let store = memory_store().await;
    let pipeline = single(Arc::new(CacheMiddleware::new(
        store.clone(),
        CacheMiddlewareConfig::default(),
    )));

    let payload = Bytes::from(vec![0x5A; 5 * 1024 * 1024]);
    for _ in 0..2 {
        let metadata = FileMetadata::for_payload("application/octet-stream", "bin", &payload);
        let (out, _) = pipeline.process_upload(payload.clone(), metadata).await.unwrap();
        assert_eq!(out.len(), payload.len());
    }

    let stats = store.stats().await;
    assert_eq!(*stats.hits(), 1);
    assert_eq!(*stats.misses(), 1);
    assert_eq!(*stats.size_bytes(), payload.len() as u64);
}

#[tokio::test]
async fn test_cache_reuses_encrypted_output() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn CacheStore> =
        CacheBackendConfig::Disk(DiskCacheConfig::default().with_dir(dir.path().to_path_buf()))
            .open()
            .await
            .unwrap();

    let mut pipeline = Pipeline::default();
    pipeline
        .add_middleware(Arc::new(
            EncryptionMiddleware::new(EncryptionConfig::default().with_key(key(3))).unwrap(),
        ))
        .unwrap();
    pipeline
        .add_middleware(Arc::new(CacheMiddleware::new(
            store.clone(),
            CacheMiddlewareConfig::default(),
        )))
        .unwrap();

    let data = Bytes::from_static(b"quarterly numbers");
    let first = pipeline
        .process_upload(data.clone(), FileMetadata::for_payload("text/plain", "txt", &data))
        .await
        .unwrap();
    let second = pipeline
        .process_upload(data.clone(), FileMetadata::for_payload("text/plain", "txt", &data))
        .await
        .unwrap();

    // A fresh nonce would change the ciphertext; the ingress key still hits
    assert_eq!(first.0, second.0);
    assert_eq!(*store.stats().await.hits(), 1);

    let (restored, _) = pipeline.process_download(second.0, second.1).await.unwrap();
    assert_eq!(restored, data);
}

#[tokio::test]
async fn test_cache_bypass_rules() {
    let store = memory_store().await;
    let config = CacheMiddlewareConfig::default()
        .with_max_file_size(8)
        .with_cache_types(vec!["text/".to_string()]);
    let pipeline = single(Arc::new(CacheMiddleware::new(store.clone(), config)));

    for (content_type, data) in [
        ("text/plain", &b"this is longer than eight"[..]),
        ("image/png", &b"tiny"[..]),
    ] {
        let data = Bytes::copy_from_slice(data);
        let metadata = FileMetadata::for_payload(content_type, "", &data);
        pipeline.process_upload(data.clone(), metadata.clone()).await.unwrap();
        pipeline.process_upload(data, metadata).await.unwrap();
    }

    let stats = store.stats().await;
    assert_eq!(*stats.hits(), 0);
    assert_eq!(*stats.misses(), 0);
}

#[tokio::test]
async fn test_image_stage_strips_jpeg_comment() {
    let mut jpeg = vec![0xFF, 0xD8];
    let comment = b"taken at home";
    jpeg.extend_from_slice(&[0xFF, 0xFE]);
    jpeg.extend_from_slice(&((comment.len() + 2) as u16).to_be_bytes());
    jpeg.extend_from_slice(comment);
    jpeg.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02, 0x11, 0x22, 0xFF, 0xD9]);
    let data = Bytes::from(jpeg);

    let pipeline = single(Arc::new(ImageEnhancementMiddleware::new(
        ImageEnhancementConfig::default(),
    )));
    let metadata = FileMetadata::for_payload("image/jpeg", "jpg", &data);
    let (out, meta) = pipeline.process_upload(data.clone(), metadata).await.unwrap();

    assert_eq!(&out[..], &[0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x02, 0x11, 0x22, 0xFF, 0xD9]);
    assert_eq!(meta.custom["enhanced"], true);
    assert_eq!(meta.custom["enhancements"], serde_json::json!(["comment"]));

    let (down, _) = pipeline.process_download(out.clone(), meta).await.unwrap();
    assert_eq!(down, out);
}

#[tokio::test]
async fn test_reference_layout_round_trips() {
    let store = memory_store().await;
    let config = PipelineConfig::default()
        .with_image_enhancement(ImageEnhancementConfig::default().with_enabled(true))
        .with_encryption(EncryptionConfig::default().with_enabled(true).with_key(key(9)))
        .with_cache(CacheMiddlewareConfig::default().with_enabled(true));
    let pipeline = Pipeline::from_config(&config, &MiddlewareContext::with_cache(store)).unwrap();
    assert_eq!(
        pipeline.names(),
        vec!["image_enhancement", "compression", "encryption", "cache"]
    );

    for (content_type, ext, data) in [
        ("text/csv", "csv", text_payload(3000)),
        ("application/octet-stream", "bin", Bytes::from((0..=255u8).collect::<Vec<_>>())),
        ("text/plain", "txt", Bytes::new()),
    ] {
        let metadata = FileMetadata::for_payload(content_type, ext, &data);
        let (stored, stored_meta) = pipeline.process_upload(data.clone(), metadata).await.unwrap();
        let (restored, restored_meta) =
            pipeline.process_download(stored, stored_meta).await.unwrap();
        assert_eq!(restored, data, "round trip for {}", content_type);
        assert!(!restored_meta.compressed);
        assert!(!restored_meta.encrypted);
    }
}
