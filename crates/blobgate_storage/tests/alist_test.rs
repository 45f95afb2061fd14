//! Tests for the AList backend against a fake AList server.

mod test_utils;

use blobgate_core::{ObjectMetadata, meta_keys};
use blobgate_storage::{AListBackend, AListConfig, StorageBackend, StorageErrorKind};
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use test_utils::{MockServer, Recorded, Reply};

const MODIFIED: &str = "2026-01-02T03:04:05Z";

#[derive(Debug, Default)]
struct AListState {
    files: BTreeMap<String, Vec<u8>>,
    token: Option<String>,
    logins: usize,
}

impl AListState {
    fn is_dir(&self, path: &str) -> bool {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.files.keys().any(|k| k.starts_with(&prefix))
    }

    /// Direct children of `dir`: sub-directory names and file names, sorted.
    fn children(&self, dir: &str) -> Vec<(String, bool)> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for key in self.files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((sub, _)) => {
                    dirs.insert(sub.to_string());
                }
                None => entries.push((rest.to_string(), false)),
            }
        }
        entries.extend(dirs.into_iter().map(|d| (d, true)));
        entries.sort();
        entries
    }
}

type Shared = Arc<Mutex<AListState>>;

fn reply(code: i64, message: &str, data: Value) -> Reply {
    Reply::json(200, json!({ "code": code, "message": message, "data": data }))
}

fn decode_header_path(raw: &str) -> String {
    url::form_urlencoded::parse(format!("p={}", raw).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

fn route(state: &Shared, request: &Recorded, base: &str) -> Reply {
    let mut state = state.lock().unwrap();
    let path = request.path().to_string();

    if let Some(file) = path.strip_prefix("/d") {
        return match state.files.get(file) {
            Some(data) => Reply::bytes(data.clone()),
            None => Reply::status(404),
        };
    }

    if path == "/api/auth/login" {
        let body = request.json();
        if body["username"] != "admin" || body["password"] != "secret" {
            return reply(400, "password is incorrect", Value::Null);
        }
        state.logins += 1;
        let token = format!("token-{}", state.logins);
        state.token = Some(token.clone());
        return reply(200, "success", json!({ "token": token }));
    }

    if state.token.is_none() || request.header("authorization") != state.token.as_deref() {
        return reply(401, "token is expired", Value::Null);
    }

    let body = request.json();
    match path.as_str() {
        "/api/fs/put" => {
            let target = decode_header_path(request.header("file-path").unwrap_or_default());
            state.files.insert(target, request.body.clone());
            reply(200, "success", Value::Null)
        }
        "/api/fs/get" => {
            let target = body["path"].as_str().unwrap_or_default().to_string();
            let name = target.rsplit('/').next().unwrap_or_default();
            if let Some(data) = state.files.get(&target) {
                reply(
                    200,
                    "success",
                    json!({
                        "name": name,
                        "size": data.len(),
                        "is_dir": false,
                        "modified": MODIFIED,
                        "raw_url": format!("{}/d{}", base, target),
                    }),
                )
            } else if state.is_dir(&target) {
                reply(200, "success", json!({ "name": name, "is_dir": true, "raw_url": "" }))
            } else {
                reply(500, "failed get storage: object not found", Value::Null)
            }
        }
        "/api/fs/remove" => {
            let dir = body["dir"].as_str().unwrap_or("/").trim_end_matches('/').to_string();
            for name in body["names"].as_array().cloned().unwrap_or_default() {
                let name = name.as_str().unwrap_or_default();
                state.files.remove(&format!("{}/{}", dir, name));
            }
            reply(200, "success", Value::Null)
        }
        "/api/fs/list" => {
            let dir = body["path"].as_str().unwrap_or("/").to_string();
            let page = body["page"].as_u64().unwrap_or(1) as usize;
            let per_page = body["per_page"].as_u64().unwrap_or(100) as usize;
            if !state.is_dir(&dir) {
                return reply(500, "object not found", Value::Null);
            }
            let children = state.children(&dir);
            let content: Vec<Value> = children
                .iter()
                .skip((page - 1) * per_page)
                .take(per_page)
                .map(|(name, is_dir)| {
                    let full = format!("{}/{}", dir.trim_end_matches('/'), name);
                    let raw_url = if *is_dir {
                        String::new()
                    } else {
                        format!("{}/d{}", base, full)
                    };
                    json!({
                        "name": name,
                        "size": state.files.get(&full).map_or(0, Vec::len),
                        "is_dir": is_dir,
                        "modified": MODIFIED,
                        "raw_url": raw_url,
                    })
                })
                .collect();
            reply(200, "success", json!({ "content": content, "total": children.len() }))
        }
        _ => Reply::status(404),
    }
}

async fn alist_server() -> (MockServer, Shared) {
    let state = Shared::default();
    let shared = state.clone();
    let server = MockServer::start(move |request, base| route(&shared, request, base)).await;
    (server, state)
}

fn backend(server: &MockServer, password: &str, page_size: u32) -> AListBackend {
    let config: AListConfig = serde_json::from_value(json!({
        "base_url": server.base_url(),
        "username": "admin",
        "password": password,
        "root_dir": "/storage",
        "page_size": page_size,
    }))
    .unwrap();
    AListBackend::new(&config).unwrap()
}

#[tokio::test]
async fn test_save_and_get_with_metadata_sidecar() {
    let (server, state) = alist_server().await;
    let storage = backend(&server, "secret", 100);

    let mut metadata = ObjectMetadata::new();
    metadata.insert(meta_keys::CHECKSUM.into(), "feedface".into());

    let object = storage
        .save(Bytes::from_static(b"hello alist"), Some("docs/a.txt"), Some(&metadata))
        .await
        .unwrap();
    assert_eq!(object.path, "docs/a.txt");
    assert_eq!(object.size_bytes, 11);
    {
        let state = state.lock().unwrap();
        assert!(state.files.contains_key("/storage/docs/a.txt"));
        assert!(state.files.contains_key("/storage/.blobgate/meta/docs/a.txt.json"));
    }

    let (data, stored) = storage.get("docs/a.txt").await.unwrap();
    assert_eq!(&data[..], b"hello alist");
    assert_eq!(stored.get(meta_keys::CHECKSUM).map(String::as_str), Some("feedface"));
    assert_eq!(
        stored.get(meta_keys::CONTENT_TYPE).map(String::as_str),
        Some("text/plain")
    );

    // One login serves every request while the token stays valid
    assert_eq!(state.lock().unwrap().logins, 1);
    assert_eq!(server.requests_to("POST", "/api/auth/login").len(), 1);
}

#[tokio::test]
async fn test_expired_token_triggers_one_relogin() {
    let (server, state) = alist_server().await;
    let storage = backend(&server, "secret", 100);
    storage
        .save(Bytes::from_static(b"v1"), Some("note.txt"), None)
        .await
        .unwrap();

    state.lock().unwrap().token = None;

    assert!(storage.exists("note.txt").await.unwrap());
    assert_eq!(state.lock().unwrap().logins, 2);

    let gets = server.requests_to("POST", "/api/fs/get");
    let last = gets.last().unwrap();
    assert_eq!(last.header("authorization"), Some("token-2"));
}

#[tokio::test]
async fn test_bad_credentials_are_permission_errors() {
    let (server, _state) = alist_server().await;
    let storage = backend(&server, "wrong", 100);

    let err = storage.exists("note.txt").await.unwrap_err();
    assert!(matches!(err.kind, StorageErrorKind::Permission(_)));
}

#[tokio::test]
async fn test_delete_is_idempotent_and_removes_sidecar() {
    let (server, state) = alist_server().await;
    let storage = backend(&server, "secret", 100);
    storage
        .save(Bytes::from_static(b"bye"), Some("tmp/bye.txt"), None)
        .await
        .unwrap();

    assert!(storage.delete("tmp/bye.txt").await.unwrap());
    assert!(!storage.delete("tmp/bye.txt").await.unwrap());
    assert!(!storage.exists("tmp/bye.txt").await.unwrap());
    assert!(state.lock().unwrap().files.is_empty());
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let (server, _state) = alist_server().await;
    let storage = backend(&server, "secret", 100);

    let err = storage.get("ghost.txt").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_pages_and_skips_metadata() {
    let (server, _state) = alist_server().await;
    let storage = backend(&server, "secret", 2);
    for name in ["a.txt", "b.txt", "c.txt", "sub/d.txt"] {
        storage
            .save(Bytes::from_static(b"."), Some(name), None)
            .await
            .unwrap();
    }

    let flat: Vec<_> = storage.list(None, false).try_collect().await.unwrap();
    let mut paths: Vec<String> = flat.into_iter().map(|o| o.path).collect();
    paths.sort();
    assert_eq!(paths, vec!["a.txt", "b.txt", "c.txt"]);

    // Root holds .blobgate, a.txt, b.txt, c.txt and sub: three pages of two
    let root_pages: Vec<u64> = server
        .requests_to("POST", "/api/fs/list")
        .iter()
        .map(|r| r.json())
        .filter(|body| body["path"] == "/storage")
        .map(|body| body["page"].as_u64().unwrap())
        .collect();
    assert_eq!(root_pages, vec![1, 2, 3]);

    let deep: Vec<_> = storage.list(None, true).try_collect().await.unwrap();
    let mut paths: Vec<String> = deep.into_iter().map(|o| o.path).collect();
    paths.sort();
    assert_eq!(paths, vec!["a.txt", "b.txt", "c.txt", "sub/d.txt"]);
}
