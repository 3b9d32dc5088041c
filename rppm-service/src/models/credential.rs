use chrono::{DateTime, Utc};
use serde::Serialize;

/// One issued access code. Provisioned out-of-band; the device lock is the
/// only field the service itself ever writes.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AccessCredential {
    pub code: String,
    pub owner_name: String,
    pub organization_name: String,
    pub locked_device_id: Option<String>,
    pub last_authenticated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AccessCredential {
    pub fn new(
        code: impl Into<String>,
        owner_name: impl Into<String>,
        organization_name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            code: code.into(),
            owner_name: owner_name.into(),
            organization_name: organization_name.into(),
            locked_device_id: None,
            last_authenticated_at: None,
            created_at,
        }
    }

    pub fn is_locked_to(&self, device: &str) -> bool {
        self.locked_device_id.as_deref() == Some(device)
    }

    pub fn profile(&self) -> Profile {
        Profile {
            code: self.code.clone(),
            owner_name: self.owner_name.clone(),
            organization_name: self.organization_name.clone(),
        }
    }
}

/// What a successful login hands back to the client. Never includes the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub code: String,
    pub owner_name: String,
    pub organization_name: String,
}
