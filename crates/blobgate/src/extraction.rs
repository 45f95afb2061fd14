//! Client for an external OCR or speech-to-text service.

use blobgate_error::{ExtractionError, ExtractionErrorKind};
use bytes::Bytes;
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, instrument, warn};

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> usize {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

/// Where and how to reach the extraction service.
///
/// # Example
///
/// ```toml
/// [extraction]
/// endpoint = "https://ocr.internal/v1/extract"
/// api_key = "..."
/// max_attempts = 5
/// ```
#[derive(
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
pub struct ExtractionConfig {
    /// URL that accepts `POST <bytes>` and answers `{text, confidence}`
    endpoint: String,
    /// Bearer token
    #[serde(default)]
    #[setters(strip_option)]
    api_key: Option<String>,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    max_attempts: usize,
    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    initial_backoff_ms: u64,
    /// Upper bound on a single retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    max_backoff_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl ExtractionConfig {
    /// Point at `endpoint` with default retry settings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff_ms", &self.initial_backoff_ms)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .finish()
    }
}

/// Text recognized in a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct ExtractedText {
    /// Recognized text
    text: String,
    /// Service-reported confidence, 0.0 to 1.0
    #[serde(default)]
    confidence: f64,
}

/// Sends payloads to the extraction service with bounded retries.
///
/// Timeouts, connection failures and HTTP 429 are retried with jittered
/// exponential backoff; other failures return immediately.
#[derive(Debug, Clone)]
pub struct TextExtractionClient {
    config: ExtractionConfig,
    client: reqwest::Client,
}

impl TextExtractionClient {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns `NotConfigured` if the endpoint is empty, or `Transport` if
    /// the HTTP client cannot be built.
    #[instrument(skip(config), fields(endpoint = %config.endpoint))]
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractionError> {
        if config.endpoint.trim().is_empty() {
            return Err(ExtractionError::new(ExtractionErrorKind::NotConfigured));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ExtractionError::new(ExtractionErrorKind::Transport(format!(
                    "Failed to build HTTP client: {}",
                    e
                )))
            })?;
        debug!("Created text extraction client");
        Ok(Self { config, client })
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract text from `data`.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or the first
    /// non-retryable error.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn extract(
        &self,
        data: Bytes,
        content_type: &str,
    ) -> Result<ExtractedText, ExtractionError> {
        let strategy = ExponentialBackoff::from_millis(self.config.initial_backoff_ms.max(1))
            .factor(2)
            .max_delay(Duration::from_millis(self.config.max_backoff_ms))
            .map(jitter)
            .take(self.config.max_attempts.saturating_sub(1));

        let result = Retry::spawn(strategy, || {
            let data = data.clone();
            async move {
                match self.send_once(data, content_type).await {
                    Ok(text) => Ok(text),
                    Err(e) if e.kind.is_retryable() => {
                        warn!(error = %e, "Text extraction failed, will retry");
                        Err(RetryError::Transient {
                            err: e,
                            retry_after: None,
                        })
                    }
                    Err(e) => {
                        warn!(error = %e, "Permanent text extraction error, failing immediately");
                        Err(RetryError::Permanent(e))
                    }
                }
            }
        })
        .await?;

        debug!(chars = result.text.len(), confidence = result.confidence, "Text extracted");
        Ok(result)
    }

    async fn send_once(
        &self,
        data: Bytes,
        content_type: &str,
    ) -> Result<ExtractedText, ExtractionError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ExtractionErrorKind::Timeout(e.to_string())
            } else {
                ExtractionErrorKind::Transport(e.to_string())
            };
            ExtractionError::new(kind)
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .ok()
                .filter(|body| !body.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
            return Err(ExtractionError::new(ExtractionErrorKind::Http {
                status: status.as_u16(),
                message,
            }));
        }

        response.json::<ExtractedText>().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ExtractionErrorKind::Timeout(e.to_string())
            } else {
                ExtractionErrorKind::Decode(e.to_string())
            };
            ExtractionError::new(kind)
        })
    }
}
