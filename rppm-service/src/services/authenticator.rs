use crate::models::{AccessCredential, Profile};
use crate::services::clock::Clock;
use crate::services::credentials::{BindOutcome, CredentialStore, StoreError};
use crate::services::device::DeviceIdentity;
use serde::Serialize;
use service_core::utils::redact;
use std::sync::Arc;
use thiserror::Error;

const MAX_CODE_LEN: usize = 64;

/// Whether an authentication was checked against the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Verified,
    /// No credential store configured; the code was accepted unchecked.
    Unconfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakIdentityPolicy {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub profile: Profile,
    pub mode: AuthMode,
    /// True when this login set the device lock.
    pub first_binding: bool,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("invalid access code")]
    InvalidCode,
    #[error("access code is locked to another device")]
    DeviceLocked,
    #[error(transparent)]
    ServerError(#[from] StoreError),
}

pub struct Authenticator {
    store: Option<Arc<dyn CredentialStore>>,
    clock: Arc<dyn Clock>,
    weak_policy: WeakIdentityPolicy,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Some(store),
            clock,
            weak_policy: WeakIdentityPolicy::Accept,
        }
    }

    /// Authenticator without a credential store. Every success it returns is
    /// flagged [`AuthMode::Unconfigured`].
    pub fn unconfigured(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: None,
            clock,
            weak_policy: WeakIdentityPolicy::Accept,
        }
    }

    pub fn with_weak_identity_policy(mut self, policy: WeakIdentityPolicy) -> Self {
        self.weak_policy = policy;
        self
    }

    pub fn mode(&self) -> AuthMode {
        if self.store.is_some() {
            AuthMode::Verified
        } else {
            AuthMode::Unconfigured
        }
    }

    pub async fn authenticate(
        &self,
        code: &str,
        device: &DeviceIdentity,
    ) -> Result<AuthSuccess, AuthError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::InvalidInput("access code is required".to_string()));
        }
        if code.len() > MAX_CODE_LEN {
            return Err(AuthError::InvalidInput("access code is too long".to_string()));
        }
        if self.weak_policy == WeakIdentityPolicy::Reject && !device.is_strong() {
            return Err(AuthError::InvalidInput(
                "a fingerprint-based device identity is required".to_string(),
            ));
        }

        let Some(store) = &self.store else {
            tracing::warn!(
                code = %redact(code),
                "Credential store not configured, accepting access code unverified"
            );
            return Ok(AuthSuccess {
                profile: Profile {
                    code: code.to_string(),
                    owner_name: "Demo".to_string(),
                    organization_name: String::new(),
                },
                mode: AuthMode::Unconfigured,
                first_binding: false,
            });
        };

        let credential = store.find(code).await?.ok_or(AuthError::InvalidCode)?;

        if credential.locked_device_id.is_some() {
            return self.check_existing_lock(&credential, device);
        }

        match store
            .bind_device(code, &device.as_wire(), self.clock.now())
            .await?
        {
            BindOutcome::Bound(bound) => {
                tracing::info!(
                    code = %redact(code),
                    device = %redact(&device.as_wire()),
                    strong = device.is_strong(),
                    "Access code bound to device"
                );
                Ok(success(&bound, true))
            }
            // A concurrent login set the lock between our read and the bind.
            BindOutcome::AlreadyLocked(current) => self.check_existing_lock(&current, device),
            BindOutcome::Missing => Err(AuthError::InvalidCode),
        }
    }

    fn check_existing_lock(
        &self,
        credential: &AccessCredential,
        device: &DeviceIdentity,
    ) -> Result<AuthSuccess, AuthError> {
        if lock_matches(credential, device) {
            Ok(success(credential, false))
        } else {
            tracing::info!(
                code = %redact(&credential.code),
                "Login refused, access code locked to another device"
            );
            Err(AuthError::DeviceLocked)
        }
    }
}

/// Rows bound by older clients hold the bare token rather than the prefixed
/// wire form; both match a weak identity carrying that token.
fn lock_matches(credential: &AccessCredential, device: &DeviceIdentity) -> bool {
    credential.is_locked_to(&device.as_wire())
        || (!device.is_strong() && credential.is_locked_to(device.value()))
}

fn success(credential: &AccessCredential, first_binding: bool) -> AuthSuccess {
    AuthSuccess {
        profile: credential.profile(),
        mode: AuthMode::Verified,
        first_binding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::SystemClock;
    use crate::services::credentials::InMemoryCredentialStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn setup() -> (Arc<InMemoryCredentialStore>, Authenticator) {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.provision(AccessCredential::new(
            "GP-0001",
            "Bu Sari",
            "SDN 1 Bandung",
            Utc::now(),
        ));
        let auth = Authenticator::new(store.clone(), Arc::new(SystemClock));
        (store, auth)
    }

    fn strong(id: &str) -> DeviceIdentity {
        DeviceIdentity::Strong(id.to_string())
    }

    #[tokio::test]
    async fn test_first_login_binds_device() {
        let (store, auth) = setup();

        let ok = auth.authenticate("GP-0001", &strong("d1")).await.unwrap();
        assert!(ok.first_binding);
        assert_eq!(ok.mode, AuthMode::Verified);
        assert_eq!(ok.profile.owner_name, "Bu Sari");
        assert_eq!(
            store.get("GP-0001").unwrap().locked_device_id.as_deref(),
            Some("fp:d1")
        );
    }

    #[tokio::test]
    async fn test_second_device_is_locked_out_without_mutation() {
        let (store, auth) = setup();
        auth.authenticate("GP-0001", &strong("d1")).await.unwrap();
        let before = store.get("GP-0001").unwrap();

        let err = auth.authenticate("GP-0001", &strong("d2")).await.unwrap_err();
        assert!(matches!(err, AuthError::DeviceLocked));
        assert_eq!(store.get("GP-0001").unwrap(), before);
    }

    #[tokio::test]
    async fn test_relogin_same_device_changes_nothing() {
        let (store, auth) = setup();
        auth.authenticate("GP-0001", &strong("d1")).await.unwrap();
        let before = store.get("GP-0001").unwrap();

        let ok = auth.authenticate(" GP-0001 ", &strong("d1")).await.unwrap();
        assert!(!ok.first_binding);
        assert_eq!(store.get("GP-0001").unwrap(), before);
    }

    #[tokio::test]
    async fn test_unknown_and_blank_codes() {
        let (_, auth) = setup();
        assert!(matches!(
            auth.authenticate("GP-9999", &strong("d1")).await.unwrap_err(),
            AuthError::InvalidCode
        ));
        assert!(matches!(
            auth.authenticate("   ", &strong("d1")).await.unwrap_err(),
            AuthError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_legacy_bare_lock_matches_weak_identity() {
        let (store, auth) = setup();
        store
            .bind_device("GP-0001", "legacy-token", Utc::now())
            .await
            .unwrap();

        let weak = DeviceIdentity::parse("legacy-token").unwrap();
        assert!(auth.authenticate("GP-0001", &weak).await.is_ok());
        assert!(matches!(
            auth.authenticate("GP-0001", &strong("legacy-token"))
                .await
                .unwrap_err(),
            AuthError::DeviceLocked
        ));
    }

    #[tokio::test]
    async fn test_weak_identity_policy() {
        let (_, auth) = setup();
        let auth = auth.with_weak_identity_policy(WeakIdentityPolicy::Reject);
        let weak = DeviceIdentity::Weak("abc".to_string());
        assert!(matches!(
            auth.authenticate("GP-0001", &weak).await.unwrap_err(),
            AuthError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_mode_is_flagged() {
        let auth = Authenticator::unconfigured(Arc::new(SystemClock));
        let ok = auth.authenticate("ANYTHING", &strong("d1")).await.unwrap();
        assert_eq!(ok.mode, AuthMode::Unconfigured);
        assert_eq!(auth.mode(), AuthMode::Unconfigured);
    }

    struct FailingStore;

    #[async_trait]
    impl CredentialStore for FailingStore {
        async fn find(&self, _code: &str) -> Result<Option<AccessCredential>, StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!("connection refused")))
        }

        async fn bind_device(
            &self,
            _code: &str,
            _device: &str,
            _now: DateTime<Utc>,
        ) -> Result<BindOutcome, StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!("connection refused")))
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable(anyhow::anyhow!("connection refused")))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error_not_demo_mode() {
        let auth = Authenticator::new(Arc::new(FailingStore), Arc::new(SystemClock));
        assert!(matches!(
            auth.authenticate("GP-0001", &strong("d1")).await.unwrap_err(),
            AuthError::ServerError(_)
        ));
    }

    /// Store whose first read always reports the code as unbound, forcing the
    /// bind path to discover the lock through the compare-and-swap.
    struct StaleReadStore(InMemoryCredentialStore);

    #[async_trait]
    impl CredentialStore for StaleReadStore {
        async fn find(&self, code: &str) -> Result<Option<AccessCredential>, StoreError> {
            Ok(self.0.get(code).map(|mut c| {
                c.locked_device_id = None;
                c
            }))
        }

        async fn bind_device(
            &self,
            code: &str,
            device: &str,
            now: DateTime<Utc>,
        ) -> Result<BindOutcome, StoreError> {
            self.0.bind_device(code, device, now).await
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_lost_bind_race_resolves_against_winner() {
        let inner = InMemoryCredentialStore::new();
        inner.provision(AccessCredential::new("GP-0001", "Bu Sari", "", Utc::now()));
        inner
            .bind_device("GP-0001", "fp:winner", Utc::now())
            .await
            .unwrap();
        let auth = Authenticator::new(Arc::new(StaleReadStore(inner)), Arc::new(SystemClock));

        assert!(matches!(
            auth.authenticate("GP-0001", &strong("loser")).await.unwrap_err(),
            AuthError::DeviceLocked
        ));
        let ok = auth.authenticate("GP-0001", &strong("winner")).await.unwrap();
        assert!(!ok.first_binding);
    }
}
