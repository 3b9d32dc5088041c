//! Access-code storage. The only mutation the service performs is the
//! first-use device binding, which is a compare-and-swap on an unset lock.

pub mod memory;
pub mod postgres;

use crate::models::AccessCredential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::InMemoryCredentialStore;
pub use postgres::PgCredentialStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(anyhow::Error::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The lock was unset and now holds the requested device.
    Bound(AccessCredential),
    /// Someone else set the lock first. Carries the current row.
    AlreadyLocked(AccessCredential),
    /// The code does not exist (deleted between lookup and bind).
    Missing,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find(&self, code: &str) -> Result<Option<AccessCredential>, StoreError>;

    /// Set `locked_device_id` to `device` only if it is currently unset.
    async fn bind_device(
        &self,
        code: &str,
        device: &str,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
