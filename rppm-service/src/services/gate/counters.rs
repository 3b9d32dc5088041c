//! Rate-window and daily-quota counters.
//!
//! Every operation is a single atomic check-and-record: a request is only
//! counted when it is admitted, and no two concurrent calls can both take the
//! last free slot.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Recorded; `count` admissions now lie inside the window.
    Admitted { count: u32 },
    /// Window full; the oldest admission leaves it after `retry_after`.
    Limited { retry_after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    Granted { used: u32 },
    Exhausted { used: u32 },
}

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Admit and record `now` only if fewer than `limit` admissions lie in
    /// `(now - window, now]`.
    async fn record_in_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome, CounterError>;

    /// Increment the day's counter only if it is below `limit`.
    async fn consume_daily(
        &self,
        key: &str,
        day: NaiveDate,
        limit: u32,
    ) -> Result<QuotaOutcome, CounterError>;

    async fn daily_used(&self, key: &str, day: NaiveDate) -> Result<u32, CounterError>;

    /// Remove one admission recorded at `at`, undoing a `record_in_window`
    /// whose request was denied further on.
    async fn release_in_window(&self, key: &str, at: DateTime<Utc>) -> Result<(), CounterError>;

    /// Drop state that can no longer affect a decision.
    async fn prune(&self, _now: DateTime<Utc>, _window: Duration) {}

    async fn health_check(&self) -> Result<(), CounterError> {
        Ok(())
    }
}

pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now - chrono::Duration::milliseconds(window.as_millis() as i64)
}

/// Process-local counters. Lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    daily: DashMap<(String, NaiveDate), u32>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a day's counter directly. Used to seed state in tests and tools.
    pub fn set_daily(&self, key: &str, day: NaiveDate, used: u32) {
        self.daily.insert((key.to_string(), day), used);
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn record_in_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome, CounterError> {
        let start = window_start(now, window);
        let mut log = self.windows.entry(key.to_string()).or_default();

        while log.front().is_some_and(|t| *t <= start) {
            log.pop_front();
        }

        if (log.len() as u32) < limit {
            log.push_back(now);
            return Ok(WindowOutcome::Admitted {
                count: log.len() as u32,
            });
        }

        let retry_after = log
            .front()
            .map(|oldest| (*oldest - start).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(window);
        Ok(WindowOutcome::Limited { retry_after })
    }

    async fn consume_daily(
        &self,
        key: &str,
        day: NaiveDate,
        limit: u32,
    ) -> Result<QuotaOutcome, CounterError> {
        let mut used = self.daily.entry((key.to_string(), day)).or_insert(0);
        if *used >= limit {
            return Ok(QuotaOutcome::Exhausted { used: *used });
        }
        *used += 1;
        Ok(QuotaOutcome::Granted { used: *used })
    }

    async fn daily_used(&self, key: &str, day: NaiveDate) -> Result<u32, CounterError> {
        Ok(self
            .daily
            .get(&(key.to_string(), day))
            .map(|v| *v)
            .unwrap_or(0))
    }

    async fn release_in_window(&self, key: &str, at: DateTime<Utc>) -> Result<(), CounterError> {
        if let Some(mut log) = self.windows.get_mut(key) {
            if let Some(pos) = log.iter().rposition(|t| *t == at) {
                log.remove(pos);
            }
        }
        Ok(())
    }

    async fn prune(&self, now: DateTime<Utc>, window: Duration) {
        let start = window_start(now, window);
        let today = now.date_naive();

        self.windows.retain(|_, log| {
            while log.front().is_some_and(|t| *t <= start) {
                log.pop_front();
            }
            !log.is_empty()
        });
        self.daily.retain(|(_, day), _| *day >= today);
    }
}
