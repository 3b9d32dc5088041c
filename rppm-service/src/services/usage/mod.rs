//! Coarse usage counters. Writes are fire-and-forget: a failing store is
//! logged and never affects the request that produced the event.

pub mod postgres;

use crate::models::{UsageCounter, UsageEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

pub use postgres::PgUsageStore;

#[async_trait]
pub trait UsageCounterStore: Send + Sync {
    async fn increment(&self, event: UsageEvent, now: DateTime<Utc>) -> Result<(), anyhow::Error>;
    async fn snapshot(&self) -> Result<Vec<UsageCounter>, anyhow::Error>;
}

#[derive(Debug, Default)]
pub struct InMemoryUsageStore {
    counters: DashMap<UsageEvent, (i64, DateTime<Utc>)>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, event: UsageEvent) -> i64 {
        self.counters.get(&event).map(|c| c.0).unwrap_or(0)
    }
}

#[async_trait]
impl UsageCounterStore for InMemoryUsageStore {
    async fn increment(&self, event: UsageEvent, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        let mut entry = self.counters.entry(event).or_insert((0, now));
        entry.0 += 1;
        entry.1 = now;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<UsageCounter>, anyhow::Error> {
        Ok(UsageEvent::ALL
            .iter()
            .filter_map(|event| {
                self.counters.get(event).map(|c| UsageCounter {
                    kind: event.as_str().to_string(),
                    count: c.0,
                    updated_at: c.1,
                })
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn UsageCounterStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn UsageCounterStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn UsageCounterStore> {
        &self.store
    }

    /// Record `event` in the background.
    pub fn record(&self, event: UsageEvent) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.increment(event, Utc::now()).await {
                tracing::warn!(event = %event, error = %e, "Failed to record usage event");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FailingStore;

    #[async_trait]
    impl UsageCounterStore for FailingStore {
        async fn increment(&self, _event: UsageEvent, _now: DateTime<Utc>) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("sheet unavailable"))
        }

        async fn snapshot(&self) -> Result<Vec<UsageCounter>, anyhow::Error> {
            Err(anyhow::anyhow!("sheet unavailable"))
        }
    }

    #[tokio::test]
    async fn test_in_memory_counts_per_kind() {
        let store = InMemoryUsageStore::new();
        let now = Utc::now();
        store.increment(UsageEvent::AuthSuccess, now).await.unwrap();
        store.increment(UsageEvent::AuthSuccess, now).await.unwrap();
        store.increment(UsageEvent::GenerateDenied, now).await.unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].kind, "auth_success");
        assert_eq!(snapshot[0].count, 2);
    }

    #[tokio::test]
    async fn test_recorder_is_fire_and_forget() {
        let store = Arc::new(InMemoryUsageStore::new());
        let recorder = UsageRecorder::new(store.clone());
        recorder.record(UsageEvent::GenerateSuccess);

        for _ in 0..50 {
            if store.count(UsageEvent::GenerateSuccess) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.count(UsageEvent::GenerateSuccess), 1);

        // A failing store never surfaces to the caller.
        UsageRecorder::new(Arc::new(FailingStore)).record(UsageEvent::AuthFailed);
    }
}
