use super::{BindOutcome, CredentialStore, StoreError};
use crate::models::AccessCredential;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new access code, leaving an existing one untouched.
    pub async fn provision(&self, credential: &AccessCredential) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO access_credentials (code, owner_name, organization_name, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(&credential.code)
        .bind(&credential.owner_name)
        .bind(&credential.organization_name)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn reset_lock(&self, code: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE access_credentials SET locked_device_id = NULL WHERE code = $1")
                .bind(code)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find(&self, code: &str) -> Result<Option<AccessCredential>, StoreError> {
        let row = sqlx::query_as::<_, AccessCredential>(
            "SELECT * FROM access_credentials WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn bind_device(
        &self,
        code: &str,
        device: &str,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, StoreError> {
        let bound = sqlx::query_as::<_, AccessCredential>(
            r#"
            UPDATE access_credentials
            SET locked_device_id = $2, last_authenticated_at = $3
            WHERE code = $1 AND locked_device_id IS NULL
            RETURNING *
            "#,
        )
        .bind(code)
        .bind(device)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = bound {
            return Ok(BindOutcome::Bound(row));
        }

        // Lost the race or the code vanished; report what is there now.
        Ok(match self.find(code).await? {
            Some(current) => BindOutcome::AlreadyLocked(current),
            None => BindOutcome::Missing,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        crate::db::health_check(&self.pool).await?;
        Ok(())
    }
}
