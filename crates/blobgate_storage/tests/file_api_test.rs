//! Tests for the File API backend against a fake file service.

mod test_utils;

use blobgate_core::{ObjectMetadata, meta_keys};
use blobgate_storage::{FileApiBackend, FileApiConfig, StorageBackend, StorageErrorKind};
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use test_utils::{MockServer, Recorded, Reply};

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    metadata: Value,
}

type Files = Arc<Mutex<BTreeMap<String, StoredFile>>>;

fn ok(data: Value) -> Reply {
    Reply::json(200, json!({ "code": 0, "msg": "ok", "sn": "req-1", "data": data }))
}

fn failure(code: i64, msg: &str) -> Reply {
    Reply::json(200, json!({ "code": code, "msg": msg, "sn": "req-1", "data": null }))
}

fn info(base: &str, path: &str, file: &StoredFile) -> Value {
    json!({
        "filename": path,
        "size": file.data.len(),
        "url": format!("{}/raw/{}", base, path),
        "created_at": "2026-01-02T03:04:05Z",
        "metadata": file.metadata,
    })
}

fn route(files: &Files, request: &Recorded, base: &str) -> Reply {
    let mut files = files.lock().unwrap();
    let path = request.path().to_string();
    match request.method.as_str() {
        "POST" if path == "/api/upload" => {
            let fields = request.multipart_fields();
            let name = String::from_utf8_lossy(&fields["path"]).to_string();
            let file = StoredFile {
                data: fields["file"].clone(),
                metadata: serde_json::from_slice(&fields["metadata"]).unwrap_or(Value::Null),
            };
            let reply = ok(info(base, &name, &file));
            files.insert(name, file);
            reply
        }
        "GET" if path == "/api/list" => {
            let prefix = request.query("prefix").unwrap_or_default();
            let page: usize = request.query("page").unwrap().parse().unwrap();
            let page_size: usize = request.query("page_size").unwrap().parse().unwrap();
            let matching: Vec<Value> = files
                .iter()
                .filter(|(name, _)| name.starts_with(&prefix))
                .map(|(name, file)| info(base, name, file))
                .collect();
            let start = (page - 1) * page_size;
            let end = (start + page_size).min(matching.len());
            ok(json!({
                "files": matching.get(start..end).unwrap_or_default(),
                "has_more": end < matching.len(),
            }))
        }
        "GET" => match path.strip_prefix("/api/info/") {
            Some(name) => match files.get(name) {
                Some(file) => ok(info(base, name, file)),
                None => failure(404, "no such file"),
            },
            None => match path.strip_prefix("/raw/").and_then(|n| files.get(n)) {
                Some(file) => Reply::bytes(file.data.clone()),
                None => Reply::status(404),
            },
        },
        "DELETE" => match path.strip_prefix("/api/delete/") {
            Some(name) if files.remove(name).is_some() => ok(json!({ "deleted": true })),
            _ => failure(404, "no such file"),
        },
        _ => Reply::status(405),
    }
}

async fn file_service() -> (MockServer, Files) {
    let files = Files::default();
    let state = files.clone();
    let server = MockServer::start(move |request, base| route(&state, request, base)).await;
    (server, files)
}

fn backend(server: &MockServer, page_size: u32) -> FileApiBackend {
    let config: FileApiConfig = serde_json::from_value(json!({
        "api_url": format!("{}/api", server.base_url()),
        "api_key": "file-token",
        "page_size": page_size,
    }))
    .unwrap();
    FileApiBackend::new(&config).unwrap()
}

#[tokio::test]
async fn test_save_then_get_round_trips_metadata() {
    let (server, files) = file_service().await;
    let storage = backend(&server, 100);

    let mut metadata = ObjectMetadata::new();
    metadata.insert(meta_keys::CONTENT_TYPE.into(), "text/plain".into());
    metadata.insert(meta_keys::CHECKSUM.into(), "abc123".into());

    let object = storage
        .save(Bytes::from_static(b"quarterly numbers"), Some("docs/report.txt"), Some(&metadata))
        .await
        .unwrap();
    assert_eq!(object.path, "docs/report.txt");
    assert_eq!(object.size_bytes, 17);
    assert_eq!(object.content_type, "text/plain");
    assert!(files.lock().unwrap().contains_key("docs/report.txt"));

    let upload = &server.requests_to("POST", "/api/upload")[0];
    assert_eq!(upload.header("authorization"), Some("Bearer file-token"));

    let (data, stored) = storage.get("docs/report.txt").await.unwrap();
    assert_eq!(&data[..], b"quarterly numbers");
    assert_eq!(stored.get(meta_keys::CHECKSUM).map(String::as_str), Some("abc123"));
    assert_eq!(
        stored.get(meta_keys::CONTENT_TYPE).map(String::as_str),
        Some("text/plain")
    );
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (server, _files) = file_service().await;
    let storage = backend(&server, 100);
    storage
        .save(Bytes::from_static(b"x"), Some("tmp/x.bin"), None)
        .await
        .unwrap();

    assert!(storage.exists("tmp/x.bin").await.unwrap());
    assert!(storage.delete("tmp/x.bin").await.unwrap());
    assert!(!storage.delete("tmp/x.bin").await.unwrap());
    assert!(!storage.exists("tmp/x.bin").await.unwrap());
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let (server, _files) = file_service().await;
    let storage = backend(&server, 100);

    let err = storage.get("nope.txt").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_follows_pages() {
    let (server, _files) = file_service().await;
    let storage = backend(&server, 2);
    for name in ["a/1.txt", "a/2.txt", "a/3.txt", "a/4.txt", "a/5.txt", "b/6.txt"] {
        storage
            .save(Bytes::from_static(b"."), Some(name), None)
            .await
            .unwrap();
    }

    let objects: Vec<_> = storage.list(Some("a"), true).try_collect().await.unwrap();
    let paths: Vec<&str> = objects.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(paths, vec!["a/1.txt", "a/2.txt", "a/3.txt", "a/4.txt", "a/5.txt"]);

    let pages: Vec<String> = server
        .requests_to("GET", "/api/list")
        .iter()
        .map(|r| r.query("page").unwrap())
        .collect();
    assert_eq!(pages, vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_url_comes_from_service() {
    let (server, _files) = file_service().await;
    let storage = backend(&server, 100);
    storage
        .save(Bytes::from_static(b"img"), Some("pics/cat.png"), None)
        .await
        .unwrap();

    let url = storage.get_url("pics/cat.png", None).await.unwrap();
    assert_eq!(url, format!("{}/raw/pics/cat.png", server.base_url()));
}

#[tokio::test]
async fn test_http_status_maps_to_error_kind() {
    let server = MockServer::start(|_, _| Reply::status(403)).await;
    let storage = backend(&server, 100);

    let err = storage.exists("secret.txt").await.unwrap_err();
    assert!(matches!(err.kind, StorageErrorKind::Permission(_)));
}
