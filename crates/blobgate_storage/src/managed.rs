//! Timeout, retry and stats decorator for any backend.

use crate::{AtomicStatsCollector, ObjectStream, StatsCollector, StorageBackend, StorageObject, StorageStats};
use blobgate_core::ObjectMetadata;
use blobgate_error::{StorageError, StorageErrorKind, StorageResult};
use bytes::Bytes;
use derive_getters::Getters;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};

/// Timeout and retry settings applied by [`ManagedBackend`].
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default)]
pub struct ResiliencePolicy {
    /// Deadline for each backend call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    /// Extra attempts for idempotent reads after a transient failure
    #[serde(default = "default_max_retries")]
    max_retries: usize,
    /// First retry delay, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    initial_backoff_ms: u64,
    /// Upper bound on a single retry delay, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    max_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ResiliencePolicy {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
        ExponentialBackoff::from_millis(self.initial_backoff_ms.max(1))
            .factor(2)
            .max_delay(Duration::from_millis(self.max_backoff_ms))
            .map(jitter)
            .take(self.max_retries)
    }
}

/// Decorates a backend with per-call timeouts, bounded retries for
/// idempotent reads and operation counters.
///
/// `save` is never retried. A timeout on `save` or `get` surfaces as a
/// `Timeout` error.
///
/// # Example
///
/// ```rust
/// use blobgate_storage::{LocalBackend, LocalConfig, ManagedBackend, StorageBackend};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let local = LocalBackend::new(&LocalConfig::new("/tmp/blobgate-doc"))?;
/// let backend = ManagedBackend::new(Arc::new(local));
///
/// backend.save(bytes::Bytes::from_static(b"hi"), Some("hello.txt"), None).await?;
/// assert_eq!(*backend.stats().uploads(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ManagedBackend {
    inner: Arc<dyn StorageBackend>,
    stats: Arc<dyn StatsCollector>,
    policy: ResiliencePolicy,
}

impl std::fmt::Debug for ManagedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedBackend")
            .field("backend", &self.inner.name())
            .field("stats", &self.stats)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ManagedBackend {
    /// Wrap `inner` with the default policy and a fresh counter set.
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self::with_parts(
            inner,
            ResiliencePolicy::default(),
            Arc::new(AtomicStatsCollector::default()),
        )
    }

    /// Wrap `inner` with an explicit policy and stats collector.
    pub fn with_parts(
        inner: Arc<dyn StorageBackend>,
        policy: ResiliencePolicy,
        stats: Arc<dyn StatsCollector>,
    ) -> Self {
        Self {
            inner,
            stats,
            policy,
        }
    }

    /// Snapshot of this backend's counters.
    pub fn stats(&self) -> StorageStats {
        self.stats.snapshot()
    }

    /// Policy in effect.
    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    async fn with_timeout<T, F>(&self, operation: &str, path: &str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match tokio::time::timeout(self.policy.timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::new(StorageErrorKind::Timeout(format!(
                "{} {} exceeded {}ms",
                operation, path, self.policy.timeout_ms
            )))),
        }
    }

    /// Run an idempotent read, retrying transient failures with backoff.
    async fn retrying<T, F, Fut>(&self, operation: &str, path: &str, action: F) -> StorageResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let action = &action;
        Retry::spawn(self.policy.backoff(), move || async move {
            match self.with_timeout(operation, path, action()).await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(operation, path, error = %e, "Transient storage failure, will retry");
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(e) => Err(RetryError::Permanent(e)),
            }
        })
        .await
    }

    fn observe<T>(&self, result: StorageResult<T>) -> StorageResult<T> {
        if let Err(e) = &result {
            // Missing objects are an answer, not a backend failure
            if !e.is_not_found() {
                self.stats.record_error();
            }
        }
        result
    }
}

#[async_trait::async_trait]
impl StorageBackend for ManagedBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    #[tracing::instrument(skip(self, data, metadata), fields(backend = self.inner.name(), size = data.len()))]
    async fn save(
        &self,
        data: Bytes,
        path: Option<&str>,
        metadata: Option<&ObjectMetadata>,
    ) -> StorageResult<StorageObject> {
        let size = data.len() as u64;
        let label = path.unwrap_or("<generated>");
        let result = self
            .with_timeout("save", label, self.inner.save(data, path, metadata))
            .await;
        if result.is_ok() {
            self.stats.record_upload(size);
        }
        self.observe(result)
    }

    #[tracing::instrument(skip(self), fields(backend = self.inner.name()))]
    async fn get(&self, path: &str) -> StorageResult<(Bytes, ObjectMetadata)> {
        let result = self
            .retrying("get", path, || self.inner.get(path))
            .await;
        if let Ok((data, _)) = &result {
            self.stats.record_download(data.len() as u64);
        }
        self.observe(result)
    }

    #[tracing::instrument(skip(self), fields(backend = self.inner.name()))]
    async fn delete(&self, path: &str) -> StorageResult<bool> {
        let result = self
            .with_timeout("delete", path, self.inner.delete(path))
            .await;
        if let Ok(true) = result {
            self.stats.record_delete();
        }
        self.observe(result)
    }

    #[tracing::instrument(skip(self), fields(backend = self.inner.name()))]
    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let result = self
            .retrying("exists", path, || self.inner.exists(path))
            .await;
        self.observe(result)
    }

    fn list(&self, prefix: Option<&str>, recursive: bool) -> ObjectStream {
        let stats = self.stats.clone();
        self.inner
            .list(prefix, recursive)
            .inspect(move |item| {
                if item.is_err() {
                    stats.record_error();
                }
            })
            .boxed()
    }

    #[tracing::instrument(skip(self), fields(backend = self.inner.name()))]
    async fn get_url(&self, path: &str, expires_in: Option<Duration>) -> StorageResult<String> {
        let result = self
            .with_timeout("get_url", path, self.inner.get_url(path, expires_in))
            .await;
        self.observe(result)
    }
}
