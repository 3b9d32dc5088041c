//! Redis-backed counters for deployments running more than one instance.
//! Each check-and-record is a Lua script, so it is atomic on the server.

use super::counters::{CounterError, CounterStore, QuotaOutcome, WindowOutcome};
use crate::config::RedisConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use redis::{aio::ConnectionManager, Client, Script};
use std::time::Duration;

const KEY_PREFIX: &str = "rppm";
const QUOTA_TTL_SECONDS: u64 = 2 * 24 * 60 * 60;

const WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
local count = redis.call('ZCARD', KEYS[1])
if count < limit then
    redis.call('ZADD', KEYS[1], now, ARGV[4])
    redis.call('PEXPIRE', KEYS[1], window)
    return {1, count + 1}
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return {0, tonumber(oldest[2]) + window - now}
"#;

const QUOTA_SCRIPT: &str = r#"
local used = tonumber(redis.call('GET', KEYS[1]) or '0')
if used >= tonumber(ARGV[1]) then
    return {0, used}
end
used = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return {1, used}
"#;

const RELEASE_SCRIPT: &str = r#"
local members = redis.call('ZRANGEBYSCORE', KEYS[1], ARGV[1], ARGV[1], 'LIMIT', 0, 1)
if #members > 0 then
    redis.call('ZREM', KEYS[1], members[1])
end
return #members
"#;

#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
    window_script: Script,
    quota_script: Script,
    release_script: Script,
}

impl RedisCounterStore {
    pub async fn new(config: &RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis for admission counters");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            manager,
            window_script: Script::new(WINDOW_SCRIPT),
            quota_script: Script::new(QUOTA_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }

    fn window_key(key: &str) -> String {
        format!("{}:rl:{}", KEY_PREFIX, key)
    }

    fn quota_key(key: &str, day: NaiveDate) -> String {
        format!("{}:quota:{}:{}", KEY_PREFIX, key, day.format("%Y-%m-%d"))
    }
}

fn unavailable(e: redis::RedisError) -> CounterError {
    CounterError::Unavailable(anyhow::Error::new(e))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn record_in_window(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowOutcome, CounterError> {
        let mut conn = self.manager.clone();
        let member = format!("{}-{}", now.timestamp_millis(), uuid::Uuid::new_v4().simple());

        let (admitted, value): (i64, i64) = self
            .window_script
            .key(Self::window_key(key))
            .arg(now.timestamp_millis())
            .arg(window.as_millis() as i64)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(if admitted == 1 {
            WindowOutcome::Admitted {
                count: value.max(0) as u32,
            }
        } else {
            WindowOutcome::Limited {
                retry_after: Duration::from_millis(value.max(0) as u64),
            }
        })
    }

    async fn consume_daily(
        &self,
        key: &str,
        day: NaiveDate,
        limit: u32,
    ) -> Result<QuotaOutcome, CounterError> {
        let mut conn = self.manager.clone();

        let (granted, used): (i64, i64) = self
            .quota_script
            .key(Self::quota_key(key, day))
            .arg(limit)
            .arg(QUOTA_TTL_SECONDS)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let used = used.max(0) as u32;
        Ok(if granted == 1 {
            QuotaOutcome::Granted { used }
        } else {
            QuotaOutcome::Exhausted { used }
        })
    }

    async fn daily_used(&self, key: &str, day: NaiveDate) -> Result<u32, CounterError> {
        let mut conn = self.manager.clone();
        let used: Option<u32> = redis::cmd("GET")
            .arg(Self::quota_key(key, day))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(used.unwrap_or(0))
    }

    async fn release_in_window(&self, key: &str, at: DateTime<Utc>) -> Result<(), CounterError> {
        let mut conn = self.manager.clone();
        let _released: i64 = self
            .release_script
            .key(Self::window_key(key))
            .arg(at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CounterError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
