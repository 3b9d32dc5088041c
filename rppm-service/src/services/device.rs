//! Device identity: a stable per-browser identifier used for the single-device
//! lock and as the last-resort rate-limit bucket.
//!
//! A fingerprint over entropy signals yields a [`DeviceIdentity::Strong`]
//! identity. When fingerprinting is unavailable, a random token persisted in
//! client storage yields a [`DeviceIdentity::Weak`] one.
//!
//! [`IdentityProvider`] is the client-side library; the server itself only
//! parses identities it receives.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

const STRONG_PREFIX: &str = "fp:";
const WEAK_PREFIX: &str = "tok:";
const MAX_IDENTITY_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceIdentity {
    /// Hash of browser entropy signals.
    Strong(String),
    /// Random token persisted in browser storage.
    Weak(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceIdError {
    #[error("device identity is empty")]
    Empty,
    #[error("device identity exceeds {MAX_IDENTITY_LEN} characters")]
    TooLong,
    #[error("device identity contains control characters")]
    InvalidCharacters,
}

impl DeviceIdentity {
    /// Parse the wire form sent by clients.
    ///
    /// `fp:<hash>` is strong, `tok:<token>` is weak. Older clients send a bare
    /// token, which is treated as weak.
    pub fn parse(raw: &str) -> Result<Self, DeviceIdError> {
        let raw = raw.trim();
        if raw.len() > MAX_IDENTITY_LEN {
            return Err(DeviceIdError::TooLong);
        }
        if raw.chars().any(char::is_control) {
            return Err(DeviceIdError::InvalidCharacters);
        }

        let identity = if let Some(hash) = raw.strip_prefix(STRONG_PREFIX) {
            DeviceIdentity::Strong(hash.to_string())
        } else if let Some(token) = raw.strip_prefix(WEAK_PREFIX) {
            DeviceIdentity::Weak(token.to_string())
        } else {
            DeviceIdentity::Weak(raw.to_string())
        };

        if identity.value().is_empty() {
            return Err(DeviceIdError::Empty);
        }
        Ok(identity)
    }

    pub fn value(&self) -> &str {
        match self {
            DeviceIdentity::Strong(v) | DeviceIdentity::Weak(v) => v,
        }
    }

    pub fn is_strong(&self) -> bool {
        matches!(self, DeviceIdentity::Strong(_))
    }

    /// Canonical form, used as the stored lock value.
    pub fn as_wire(&self) -> String {
        match self {
            DeviceIdentity::Strong(v) => format!("{}{}", STRONG_PREFIX, v),
            DeviceIdentity::Weak(v) => format!("{}{}", WEAK_PREFIX, v),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire())
    }
}

/// One named entropy signal (canvas, audio, fonts, user agent, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntropySignal {
    pub name: String,
    pub value: String,
}

impl EntropySignal {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("fingerprinting unsupported in this environment")]
    Unsupported,
    #[error("fingerprinting failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait FingerprintSource: Send + Sync {
    async fn signals(&self) -> Result<Vec<EntropySignal>, FingerprintError>;
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage contents unreadable: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Durable client-side storage for the fallback token.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn load(&self) -> Result<Option<String>, StorageError>;
    async fn store(&self, token: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn load(&self) -> Result<Option<String>, StorageError> {
        let slot = self.token.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(slot.clone())
    }

    async fn store(&self, token: &str) -> Result<(), StorageError> {
        let mut slot = self.token.lock().map_err(|_| StorageError::Poisoned)?;
        *slot = Some(token.to_string());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    device_token: String,
}

/// Token persisted as a small JSON document on disk.
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn load(&self) -> Result<Option<String>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let stored: StoredToken = serde_json::from_slice(&bytes)?;
                Ok(Some(stored.device_token).filter(|t| !t.is_empty()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, token: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec(&StoredToken {
            device_token: token.to_string(),
        })?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

/// Hash signals over a canonical (name-sorted) ordering so the result does not
/// depend on collection order.
pub fn fingerprint_hash(signals: &[EntropySignal]) -> String {
    let mut sorted: Vec<&EntropySignal> = signals.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.value.cmp(&b.value)));

    let mut hasher = Sha256::new();
    for signal in sorted {
        hasher.update(signal.name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(signal.value.as_bytes());
        hasher.update([0x1e]);
    }
    hex::encode(hasher.finalize())
}

pub struct IdentityProvider {
    source: Option<Arc<dyn FingerprintSource>>,
    storage: Option<Arc<dyn TokenStorage>>,
    // Serialises the fallback load-or-create so two concurrent first calls
    // agree on one token.
    fallback: tokio::sync::Mutex<()>,
}

impl IdentityProvider {
    pub fn new(
        source: Option<Arc<dyn FingerprintSource>>,
        storage: Option<Arc<dyn TokenStorage>>,
    ) -> Self {
        Self {
            source,
            storage,
            fallback: tokio::sync::Mutex::new(()),
        }
    }

    /// Resolve this device's identity. Never fails: degrades to the persisted
    /// token, and returns `None` only when neither path is available.
    pub async fn get_identity(&self) -> Option<DeviceIdentity> {
        if let Some(source) = &self.source {
            match source.signals().await {
                Ok(signals) if !signals.is_empty() => {
                    return Some(DeviceIdentity::Strong(fingerprint_hash(&signals)));
                }
                Ok(_) => tracing::debug!("Fingerprint produced no signals, using stored token"),
                Err(e) => tracing::debug!(error = %e, "Fingerprint unavailable, using stored token"),
            }
        }

        let storage = self.storage.as_ref()?;
        let _guard = self.fallback.lock().await;

        match storage.load().await {
            Ok(Some(token)) => return Some(DeviceIdentity::Weak(token)),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Stored device token unreadable, replacing it"),
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        if let Err(e) = storage.store(&token).await {
            tracing::warn!(error = %e, "Failed to persist device token");
        }
        Some(DeviceIdentity::Weak(token))
    }
}
