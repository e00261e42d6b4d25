//! Object storage for uploaded PDFs.
//!
//! Objects live under flat keys of the form `{millis}-{sanitised name}`.
//! [`LocalObjectStore`] keeps them in a directory and hands out URLs carrying
//! an HMAC-SHA256 of `(key, expiry)`, served by the HTTP layer at
//! `/objects/{key}`.

use crate::error::Pdf2CardsError;
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Signed URLs stay valid for seven days.
pub const DEFAULT_SIGNED_URL_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Where uploaded documents are kept.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return a time-limited URL for it.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, Pdf2CardsError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, Pdf2CardsError>;

    async fn delete(&self, key: &str) -> Result<(), Pdf2CardsError>;
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_object_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the storage key for an upload received at `millis`.
pub fn object_key(filename: &str, millis: i64) -> String {
    format!("{}-{}", millis, sanitize_object_name(filename))
}

/// A fresh random signing secret (256 bits from two v4 UUIDs).
pub fn generate_secret() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Issues and checks signed object URLs.
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
    base_url: String,
    ttl_secs: i64,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl_secs: DEFAULT_SIGNED_URL_TTL_SECS,
        }
    }

    pub fn with_ttl_secs(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        hex::encode(self.mac(key, expires).finalize().into_bytes())
    }

    /// URL for `key` that expires `ttl_secs` after `now` (unix seconds).
    pub fn sign(&self, key: &str, now: i64) -> String {
        let expires = now + self.ttl_secs;
        format!(
            "{}/objects/{}?expires={}&signature={}",
            self.base_url,
            key,
            expires,
            self.signature(key, expires)
        )
    }

    /// `true` when `signature` matches and `expires` is not in the past.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: i64) -> bool {
        if now > expires {
            return false;
        }
        let Ok(tag) = hex::decode(signature) else {
            return false;
        };
        self.mac(key, expires).verify_slice(&tag).is_ok()
    }
}

/// Directory-backed [`ObjectStore`].
pub struct LocalObjectStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, Pdf2CardsError> {
        let flat = !key.is_empty()
            && key != "."
            && key != ".."
            && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !flat {
            return Err(Pdf2CardsError::Storage {
                key: key.to_string(),
                detail: "invalid object key".into(),
            });
        }
        Ok(self.root.join(key))
    }
}

fn storage_err(key: &str, e: std::io::Error) -> Pdf2CardsError {
    if e.kind() == std::io::ErrorKind::NotFound {
        return Pdf2CardsError::Storage {
            key: key.to_string(),
            detail: "object not found".into(),
        };
    }
    Pdf2CardsError::Storage {
        key: key.to_string(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, Pdf2CardsError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| storage_err(key, e))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| storage_err(key, e))?;
        debug!("Stored {} ({} bytes, {})", key, bytes.len(), content_type);
        Ok(self.signer.sign(key, Utc::now().timestamp()))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, Pdf2CardsError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| storage_err(key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), Pdf2CardsError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| storage_err(key, e))
    }
}
