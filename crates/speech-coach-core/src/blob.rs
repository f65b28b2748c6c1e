//! Object storage for recordings and synthesized audio.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::error::{Result, SpeechCoachError};

/// Blob storage collaborator: write bytes under a key, hand out time-limited URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, returning the stored key.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String>;

    /// URL granting read access to `key` for `ttl`.
    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// Filesystem-backed blob store whose URLs are verified by the gateway's
/// `/blobs/{*key}` route.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
    secret: String,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf, public_base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            root,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(SpeechCoachError::Storage(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(rel))
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()) else {
            return String::new();
        };
        mac.update(format!("{key}:{expires}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a presigned URL's signature and expiry against `now` (unix seconds).
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: i64) -> bool {
        if expires < now {
            return false;
        }
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };
        mac.update(format!("{key}:{expires}").as_bytes());
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        mac.verify_slice(&provided).is_ok()
    }

    /// Read a stored blob.
    pub async fn read(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SpeechCoachError::Storage(format!("blob not found: {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Content type for a stored key, inferred from its extension.
pub fn content_type_for(key: &str) -> &'static str {
    match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        Some("ogg") => "audio/ogg",
        Some("mp4") | Some("m4a") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SpeechCoachError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| SpeechCoachError::Storage(format!("write {key}: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| SpeechCoachError::Storage(format!("write {key}: {e}")))?;
        debug!(key, bytes = data.len(), content_type, "Stored blob");
        Ok(key.to_string())
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String> {
        self.path_for(key)?;
        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.sign(key, expires);
        // Signed over the raw key; the router hands the decoded path back to `verify`.
        let path = key
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!(
            "{}/blobs/{path}?expires={expires}&signature={signature}",
            self.public_base_url
        ))
    }
}
