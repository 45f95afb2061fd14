//! Backend registration table and factory.

use crate::{
    AListBackend, AListConfig, AtomicStatsCollector, FileApiBackend, FileApiConfig, LocalBackend,
    LocalConfig, ManagedBackend, ResiliencePolicy, S3Backend, S3Config, StorageBackend,
};
use blobgate_error::{BlobgateResult, ConfigError, ConfigErrorKind};
use derive_getters::Getters;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Raw backend options as received from configuration.
pub type BackendOptions = Map<String, JsonValue>;

/// Constructor stored in the registration table.
pub type BackendConstructor = fn(&BackendOptions) -> BlobgateResult<Arc<dyn StorageBackend>>;

/// Backend selection plus its options.
///
/// # Example
///
/// ```toml
/// [storage]
/// backend = "local"
///
/// [storage.options]
/// root = "/var/blobgate"
/// public_url = "https://files.example.com"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct StorageConfig {
    /// Registered backend name
    backend: String,
    /// Backend-specific options
    #[serde(default)]
    options: BackendOptions,
    /// Timeouts and retries applied around the backend
    #[serde(default)]
    resilience: ResiliencePolicy,
}

impl StorageConfig {
    /// Select `backend` with the given options and the default policy.
    pub fn new(backend: impl Into<String>, options: BackendOptions) -> Self {
        Self {
            backend: backend.into(),
            options,
            resilience: ResiliencePolicy::default(),
        }
    }

    /// Replace the resilience policy.
    pub fn with_resilience(mut self, resilience: ResiliencePolicy) -> Self {
        self.resilience = resilience;
        self
    }
}

/// One entry in the backend registration table.
#[derive(Debug, Clone, Copy)]
pub struct BackendRegistration {
    /// Name configuration uses to select the backend
    pub name: &'static str,
    /// Options that must be present and non-empty
    pub required_fields: &'static [&'static str],
    /// Builds the backend from validated options
    pub constructor: BackendConstructor,
}

/// Maps backend names to constructors and validates options before construction.
///
/// # Example
///
/// ```rust
/// use blobgate_storage::{StorageConfig, StorageFactory};
/// use serde_json::json;
///
/// let options = json!({ "bucket": "media" }).as_object().cloned().unwrap();
/// let err = StorageFactory::global()
///     .create(&StorageConfig::new("s3", options))
///     .unwrap_err();
/// // Every missing field is reported at once
/// assert!(err.to_string().contains("access_key_id, secret_access_key, region"));
/// ```
#[derive(Debug, Default)]
pub struct StorageFactory {
    registrations: HashMap<String, BackendRegistration>,
}

impl StorageFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with every built-in backend registered.
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(BackendRegistration {
            name: "local",
            required_fields: &["root"],
            constructor: build_local,
        });
        factory.register(BackendRegistration {
            name: "s3",
            required_fields: &["bucket", "access_key_id", "secret_access_key", "region"],
            constructor: build_s3,
        });
        factory.register(BackendRegistration {
            name: "fileapi",
            required_fields: &["api_url"],
            constructor: build_file_api,
        });
        factory.register(BackendRegistration {
            name: "alist",
            required_fields: &["base_url", "username", "password"],
            constructor: build_alist,
        });
        factory
    }

    /// Process-wide factory holding the built-in backends.
    ///
    /// Populated on first use and read-only afterwards.
    pub fn global() -> &'static StorageFactory {
        static GLOBAL: OnceLock<StorageFactory> = OnceLock::new();
        GLOBAL.get_or_init(StorageFactory::with_defaults)
    }

    /// Register a backend.
    ///
    /// If a backend with the same name already exists, it will be replaced and a warning logged.
    #[tracing::instrument(skip(self, registration), fields(backend = registration.name))]
    pub fn register(&mut self, registration: BackendRegistration) {
        if self.registrations.contains_key(registration.name) {
            tracing::warn!("Backend already registered, overwriting previous registration");
        } else {
            tracing::debug!("Registering storage backend");
        }
        self.registrations
            .insert(registration.name.to_string(), registration);
    }

    /// Registered backend names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registrations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check options against a backend's required fields.
    ///
    /// # Errors
    ///
    /// `UnknownBackend` for unregistered names; `MissingFields` listing every
    /// absent or empty field.
    pub fn validate(&self, config: &StorageConfig) -> Result<&BackendRegistration, ConfigError> {
        let registration = self.registrations.get(&config.backend).ok_or_else(|| {
            ConfigError::new(ConfigErrorKind::UnknownBackend(config.backend.clone()))
        })?;

        let missing: Vec<String> = registration
            .required_fields
            .iter()
            .filter(|field| !is_present(config.options.get(**field)))
            .map(|field| field.to_string())
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::new(ConfigErrorKind::MissingFields {
                target: config.backend.clone(),
                fields: missing,
            }));
        }
        Ok(registration)
    }

    /// Validate, construct and wrap a backend with a fresh counter set.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before construction, or the backend's
    /// own construction error.
    #[tracing::instrument(skip(self, config), fields(backend = %config.backend))]
    pub fn create(&self, config: &StorageConfig) -> BlobgateResult<ManagedBackend> {
        let registration = self.validate(config)?;
        let backend = (registration.constructor)(&config.options)?;

        tracing::info!("Created storage backend");
        Ok(ManagedBackend::with_parts(
            backend,
            config.resilience.clone(),
            Arc::new(AtomicStatsCollector::default()),
        ))
    }
}

fn is_present(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// Deserialize validated options into a typed config.
fn typed<T: DeserializeOwned>(backend: &str, options: &BackendOptions) -> Result<T, ConfigError> {
    serde_json::from_value(JsonValue::Object(options.clone())).map_err(|e| {
        ConfigError::invalid(format!("invalid {} options: {}", backend, e))
    })
}

fn build_local(options: &BackendOptions) -> BlobgateResult<Arc<dyn StorageBackend>> {
    let config: LocalConfig = typed("local", options)?;
    Ok(Arc::new(LocalBackend::new(&config)?))
}

fn build_s3(options: &BackendOptions) -> BlobgateResult<Arc<dyn StorageBackend>> {
    let config: S3Config = typed("s3", options)?;
    Ok(Arc::new(S3Backend::new(&config)?))
}

fn build_file_api(options: &BackendOptions) -> BlobgateResult<Arc<dyn StorageBackend>> {
    let config: FileApiConfig = typed("fileapi", options)?;
    Ok(Arc::new(FileApiBackend::new(&config)?))
}

fn build_alist(options: &BackendOptions) -> BlobgateResult<Arc<dyn StorageBackend>> {
    let config: AListConfig = typed("alist", options)?;
    Ok(Arc::new(AListBackend::new(&config)?))
}
