//! Typed options for each backend.
//!
//! The factory validates required fields on the raw option map and then
//! deserializes into one of these structs.

use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options for [`crate::LocalBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct LocalConfig {
    /// Directory holding stored objects
    root: PathBuf,
    /// Base URL objects are served from, if any
    #[serde(default)]
    public_url: Option<String>,
}

impl LocalConfig {
    /// Local storage rooted at `root` with no public URL.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_url: None,
        }
    }

    /// Serve objects from `url`.
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }
}

/// Options for [`crate::S3Backend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct S3Config {
    /// Bucket name
    bucket: String,
    /// Access key id
    access_key_id: String,
    /// Secret access key
    secret_access_key: String,
    /// Region, e.g. `us-east-1`
    region: String,
    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    endpoint: Option<String>,
    /// Allow plain HTTP endpoints
    #[serde(default)]
    allow_http: bool,
    /// Key prefix applied to every object
    #[serde(default)]
    prefix: Option<String>,
    /// Public domain used when pre-signing is unavailable
    #[serde(default)]
    public_domain: Option<String>,
    /// Default lifetime of pre-signed URLs, in seconds
    #[serde(default = "default_url_expiry_secs")]
    url_expiry_secs: u64,
}

fn default_url_expiry_secs() -> u64 {
    3600
}

/// Options for [`crate::FileApiBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct FileApiConfig {
    /// Base URL of the file service
    api_url: String,
    /// Bearer token, if the service requires one
    #[serde(default)]
    api_key: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    timeout_secs: u64,
    /// Entries requested per listing page
    #[serde(default = "default_page_size")]
    page_size: u32,
}

impl FileApiConfig {
    /// File API at `api_url` with default timeout and page size.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            timeout_secs: default_http_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

/// Options for [`crate::AListBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct AListConfig {
    /// Base URL of the AList server
    base_url: String,
    /// Login user
    username: String,
    /// Login password
    password: String,
    /// Directory on the AList server that acts as the root
    #[serde(default = "default_alist_root")]
    root_dir: String,
    /// Password for protected directories
    #[serde(default)]
    file_password: Option<String>,
    /// Verify TLS certificates
    #[serde(default = "default_verify_ssl")]
    verify_ssl: bool,
    /// Per-request timeout in seconds
    #[serde(default = "default_http_timeout_secs")]
    timeout_secs: u64,
    /// Entries requested per listing page
    #[serde(default = "default_page_size")]
    page_size: u32,
}

impl AListConfig {
    /// AList server at `base_url` using the given credentials.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            root_dir: default_alist_root(),
            file_password: None,
            verify_ssl: default_verify_ssl(),
            timeout_secs: default_http_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_alist_root() -> String {
    "/".to_string()
}

fn default_verify_ssl() -> bool {
    true
}
