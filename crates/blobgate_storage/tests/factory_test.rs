//! Tests for backend registration and construction.

use blobgate_error::{BlobgateErrorKind, ConfigErrorKind};
use blobgate_storage::{
    BackendOptions, BackendRegistration, LocalBackend, LocalConfig, StorageBackend,
    StorageConfig, StorageFactory,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn options(value: serde_json::Value) -> BackendOptions {
    value.as_object().cloned().unwrap()
}

fn config_kind(err: &blobgate_error::BlobgateError) -> &ConfigErrorKind {
    match err.kind() {
        BlobgateErrorKind::Config(e) => &e.kind,
        other => panic!("expected configuration error, got {}", other),
    }
}

#[test]
fn test_default_backends_registered() {
    let factory = StorageFactory::with_defaults();
    assert_eq!(factory.names(), vec!["alist", "fileapi", "local", "s3"]);
}

#[test]
fn test_missing_fields_reported_together() {
    let factory = StorageFactory::with_defaults();
    let config = StorageConfig::new("s3", options(json!({ "bucket": "media", "region": "" })));

    let err = factory.create(&config).unwrap_err();
    match config_kind(&err) {
        ConfigErrorKind::MissingFields { target, fields } => {
            assert_eq!(target, "s3");
            assert_eq!(fields, &vec!["access_key_id", "secret_access_key", "region"]);
        }
        other => panic!("unexpected kind {}", other),
    }
}

#[test]
fn test_alist_requires_credentials() {
    let factory = StorageFactory::with_defaults();
    let config = StorageConfig::new("alist", options(json!({ "base_url": "http://nas:5244" })));

    let err = factory.create(&config).unwrap_err();
    assert!(err.to_string().contains("username, password"));
}

#[test]
fn test_unknown_backend() {
    let factory = StorageFactory::with_defaults();
    let config = StorageConfig::new("ftp", BackendOptions::new());

    let err = factory.create(&config).unwrap_err();
    assert!(matches!(config_kind(&err), ConfigErrorKind::UnknownBackend(name) if name == "ftp"));
}

#[test]
fn test_malformed_option_is_invalid() {
    let factory = StorageFactory::with_defaults();
    let config = StorageConfig::new(
        "fileapi",
        options(json!({ "api_url": "http://files", "timeout_secs": "soon" })),
    );

    let err = factory.create(&config).unwrap_err();
    assert!(matches!(config_kind(&err), ConfigErrorKind::Invalid(_)));
}

#[tokio::test]
async fn test_create_local_backend() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::new(
        "local",
        options(json!({ "root": temp_dir.path().to_str().unwrap() })),
    );

    let backend = StorageFactory::global().create(&config).unwrap();
    assert_eq!(backend.name(), "local");

    backend
        .save(bytes::Bytes::from_static(b"hi"), Some("hi.txt"), None)
        .await
        .unwrap();
    assert!(temp_dir.path().join("hi.txt").is_file());
    assert_eq!(*backend.stats().uploads(), 1);
}

fn build_fixed(_options: &BackendOptions) -> blobgate_error::BlobgateResult<Arc<dyn StorageBackend>> {
    let root = std::env::temp_dir().join("blobgate-factory-custom");
    Ok(Arc::new(LocalBackend::new(&LocalConfig::new(root))?))
}

#[test]
fn test_custom_registration_overrides() {
    let mut factory = StorageFactory::with_defaults();
    factory.register(BackendRegistration {
        name: "local",
        required_fields: &[],
        constructor: build_fixed,
    });

    // Root is no longer required by the replacement
    let backend = factory
        .create(&StorageConfig::new("local", BackendOptions::new()))
        .unwrap();
    assert_eq!(backend.name(), "local");
}
