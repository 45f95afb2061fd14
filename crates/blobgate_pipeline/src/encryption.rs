//! AES-256-GCM encryption stage.
//!
//! Stored payloads use a versioned envelope: `version || nonce || ciphertext`,
//! with a fresh 96-bit nonce per payload.

use crate::middleware::matches_type;
use crate::{EncryptionConfig, FailurePolicy, Middleware, Staged};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use blobgate_core::FileMetadata;
use blobgate_error::{ConfigError, PipelineError, PipelineResult};
use bytes::Bytes;
use hmac::Hmac;
use rand::Rng;
use sha2::Sha256;

const STAGE: &str = "encryption";

/// Envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// Encrypts payloads on upload and decrypts them on download.
///
/// Payloads whose content type is excluded (media by default) or that are
/// shorter than `min_size` pass through in the clear.
#[derive(Clone)]
pub struct EncryptionMiddleware {
    config: EncryptionConfig,
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EncryptionMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionMiddleware")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EncryptionMiddleware {
    /// Create the stage, resolving the key from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` is not base64 for exactly 32 bytes or key
    /// derivation fails.
    pub fn new(config: EncryptionConfig) -> Result<Self, ConfigError> {
        let key = resolve_key(&config)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| ConfigError::invalid(format!("encryption key: {}", e)))?;
        Ok(Self { config, cipher })
    }

    fn should_encrypt(&self, size: usize, content_type: &str) -> bool {
        size as u64 >= *self.config.min_size()
            && !matches_type(content_type, self.config.excluded_types())
    }

    /// Seal `plaintext` into an envelope.
    pub fn seal(&self, plaintext: &[u8]) -> PipelineResult<Vec<u8>> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().r#gen();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| PipelineError::stage_failed(STAGE, format!("encrypt: {}", e)))?;

        let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open an envelope produced by [`seal`](Self::seal).
    pub fn open(&self, envelope: &[u8]) -> PipelineResult<Vec<u8>> {
        if envelope.len() < HEADER_LEN {
            return Err(PipelineError::stage_failed(
                STAGE,
                format!("envelope too short: {} bytes", envelope.len()),
            ));
        }
        if envelope[0] != ENVELOPE_VERSION {
            return Err(PipelineError::stage_failed(
                STAGE,
                format!("unsupported envelope version {}", envelope[0]),
            ));
        }
        let (nonce, ciphertext) = envelope[1..].split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| PipelineError::stage_failed(STAGE, format!("decrypt: {}", e)))
    }
}

fn resolve_key(config: &EncryptionConfig) -> Result<[u8; 32], ConfigError> {
    if let Some(encoded) = config.key() {
        let raw = STANDARD
            .decode(encoded.trim())
            .or_else(|_| URL_SAFE.decode(encoded.trim()))
            .map_err(|e| ConfigError::invalid(format!("encryption key is not base64: {}", e)))?;
        return raw.try_into().map_err(|raw: Vec<u8>| {
            ConfigError::invalid(format!(
                "encryption key must be 32 bytes, got {}",
                raw.len()
            ))
        });
    }

    let mut key = [0u8; 32];
    match config.password() {
        Some(password) => {
            let salt = match config.salt() {
                Some(salt) => salt.as_bytes().to_vec(),
                None => {
                    tracing::warn!("No encryption salt configured, using a random one");
                    rand::thread_rng().r#gen::<[u8; 16]>().to_vec()
                }
            };
            pbkdf2::pbkdf2::<Hmac<Sha256>>(
                password.as_bytes(),
                &salt,
                *config.iterations(),
                &mut key,
            )
            .map_err(|e| ConfigError::invalid(format!("key derivation failed: {}", e)))?;
        }
        None => {
            tracing::warn!(
                "No encryption key or password configured, data encrypted now cannot be read after restart"
            );
            rand::thread_rng().fill(&mut key);
        }
    }
    Ok(key)
}

#[async_trait::async_trait]
impl Middleware for EncryptionMiddleware {
    fn name(&self) -> &str {
        STAGE
    }

    fn validate(&self) -> bool {
        let sample = b"blobgate";
        self.seal(sample)
            .and_then(|sealed| self.open(&sealed))
            .is_ok_and(|opened| opened == sample)
    }

    fn failure_policy(&self) -> FailurePolicy {
        if *self.config.required() {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Skip
        }
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn process_upload(
        &self,
        data: Bytes,
        mut metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        if metadata.encrypted || !self.should_encrypt(data.len(), &metadata.content_type) {
            return Ok((data, metadata));
        }

        let sealed = self.seal(&data)?;
        metadata.encrypted = true;
        metadata.set_payload_len(sealed.len());
        tracing::debug!(size = sealed.len(), "Encrypted payload");
        Ok((Bytes::from(sealed), metadata))
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn process_download(
        &self,
        data: Bytes,
        mut metadata: FileMetadata,
    ) -> PipelineResult<Staged> {
        if !metadata.encrypted {
            return Ok((data, metadata));
        }

        let opened = self.open(&data)?;
        metadata.encrypted = false;
        metadata.set_payload_len(opened.len());
        Ok((Bytes::from(opened), metadata))
    }
}
