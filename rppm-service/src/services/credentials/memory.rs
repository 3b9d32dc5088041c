use super::{BindOutcome, CredentialStore, StoreError};
use crate::models::AccessCredential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Process-local credential table. The bind runs under the DashMap entry
/// lock, so concurrent first logins are linearised.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    rows: DashMap<String, AccessCredential>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Administrative provisioning. Replaces any existing row.
    pub fn provision(&self, credential: AccessCredential) {
        self.rows.insert(credential.code.clone(), credential);
    }

    /// Administrative unlock. Returns false when the code is unknown.
    pub fn reset_lock(&self, code: &str) -> bool {
        match self.rows.get_mut(code) {
            Some(mut row) => {
                row.locked_device_id = None;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, code: &str) -> Option<AccessCredential> {
        self.rows.get(code).map(|r| r.clone())
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find(&self, code: &str) -> Result<Option<AccessCredential>, StoreError> {
        Ok(self.get(code))
    }

    async fn bind_device(
        &self,
        code: &str,
        device: &str,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, StoreError> {
        let Some(mut row) = self.rows.get_mut(code) else {
            return Ok(BindOutcome::Missing);
        };

        if row.locked_device_id.is_some() {
            return Ok(BindOutcome::AlreadyLocked(row.clone()));
        }

        row.locked_device_id = Some(device.to_string());
        row.last_authenticated_at = Some(now);
        Ok(BindOutcome::Bound(row.clone()))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
