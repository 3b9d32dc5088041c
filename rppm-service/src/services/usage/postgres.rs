use super::UsageCounterStore;
use crate::models::{UsageCounter, UsageEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageCounterStore for PgUsageStore {
    async fn increment(&self, event: UsageEvent, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO usage_counters (kind, count, updated_at)
            VALUES ($1, 1, $2)
            ON CONFLICT (kind) DO UPDATE
            SET count = usage_counters.count + 1, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(event.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<UsageCounter>, anyhow::Error> {
        let rows = sqlx::query_as::<_, UsageCounter>(
            "SELECT kind, count, updated_at FROM usage_counters ORDER BY kind",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_increment_upserts() {
        let pool = PgPool::connect("postgres://localhost/rppm_test").await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        let store = PgUsageStore::new(pool);

        let before = store
            .snapshot()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.kind == "auth_failed")
            .map(|c| c.count)
            .unwrap_or(0);
        store.increment(UsageEvent::AuthFailed, Utc::now()).await.unwrap();
        let after = store
            .snapshot()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.kind == "auth_failed")
            .map(|c| c.count)
            .unwrap_or(0);
        assert_eq!(after, before + 1);
    }
}
