//! Payment proof storage
//!
//! Proofs are written under a local root and served through expiring
//! HMAC-SHA256 signed URLs, so reviewers never get a permanent link to a
//! payer's bank slip.

use crate::config::StorageConfig;
use crate::error::{AppError, AppErrorKind, InfrastructureError};
use crate::payments::utils::secure_eq;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Storage {
            message: err.to_string(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct ProofUpload {
    pub transaction_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredProof {
    pub key: String,
    pub url: String,
}

#[async_trait]
pub trait ProofStorage: Send + Sync {
    async fn upload_proof(&self, upload: ProofUpload) -> Result<StoredProof, StorageError>;

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Extension taken from the client file name, or `bin`.
fn file_extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}

pub struct LocalProofStorage {
    root: PathBuf,
    public_base_url: String,
    signing_secret: Vec<u8>,
}

impl LocalProofStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: PathBuf::from(&config.root_dir),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            signing_secret: config.signing_secret.as_bytes().to_vec(),
        }
    }

    fn signature(&self, key: &str, expires: i64) -> Result<String, StorageError> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_secret)
            .map_err(|e| StorageError::Signing(e.to_string()))?;
        mac.update(format!("{}:{}", key, expires).as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Check a signed URL's query parameters against `now`.
    pub fn verify_signature(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        match self.signature(key, expires) {
            Ok(expected) => secure_eq(expected.as_bytes(), signature.as_bytes()),
            Err(_) => false,
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::read(path).await?)
    }
}

#[async_trait]
impl ProofStorage for LocalProofStorage {
    async fn upload_proof(&self, upload: ProofUpload) -> Result<StoredProof, StorageError> {
        let key = format!(
            "{}/{}.{}",
            upload.transaction_id,
            Uuid::new_v4(),
            file_extension(&upload.file_name)
        );
        let path = self.resolve(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &upload.bytes).await?;

        info!(
            transaction_id = %upload.transaction_id,
            key = %key,
            size = upload.bytes.len(),
            content_type = %upload.content_type,
            "payment proof stored"
        );

        Ok(StoredProof {
            url: format!("{}/{}", self.public_base_url, key),
            key,
        })
    }

    fn signed_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.resolve(key)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.signature(key, expires)?;
        Ok(format!(
            "{}/{}?expires={}&signature={}",
            self.public_base_url, key, expires, signature
        ))
    }
}
