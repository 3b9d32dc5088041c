//! Admission gate in front of the completion call.
//!
//! Decision order: disabled mode, owner bypass, exhausted quota, rate window,
//! then either a retry credit or a quota charge. Admitted calls then run
//! under a hard timeout.

pub mod counters;
pub mod identity;
pub mod redis_counters;
pub mod retry;

use crate::config::{OperatingMode, RppmConfig};
use crate::services::clock::Clock;
use crate::services::device::DeviceIdentity;
use crate::services::metrics;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use service_core::middleware::rate_limit::ClientAddr;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use counters::{CounterError, CounterStore, InMemoryCounterStore, QuotaOutcome, WindowOutcome};
pub use identity::{ClientIdentity, OwnerBypass};
pub use redis_counters::RedisCounterStore;
pub use retry::RetryCredits;

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub mode: OperatingMode,
    pub max_requests_per_window: u32,
    pub window: Duration,
    pub daily_quota_limit: u32,
    pub upstream_timeout: Duration,
    pub retry_credit_ttl: Duration,
}

impl GateSettings {
    pub fn from_config(config: &RppmConfig) -> Self {
        Self {
            mode: config.operating_mode(),
            max_requests_per_window: config.gate.max_requests_per_window,
            window: config.gate.window(),
            daily_quota_limit: config.gate.daily_quota_limit,
            upstream_timeout: config.gate.upstream_timeout(),
            retry_credit_ttl: config.gate.retry_credit_ttl(),
        }
    }
}

/// What the gate needs to know about one generation request.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdmissionRequest<'a> {
    pub owner_key: Option<&'a str>,
    pub source: Option<ClientAddr>,
    pub device: Option<&'a DeviceIdentity>,
    pub retry_token: Option<&'a str>,
    /// The caller brings its own upstream key, so the shared daily quota
    /// does not apply. The rate window still does.
    pub skip_quota: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionPath {
    Disabled,
    OwnerBypass,
    RetryCredit,
    Metered {
        window_limit: u32,
        window_remaining: u32,
        /// `None` when the quota was skipped for a caller-supplied key.
        quota_remaining: Option<u32>,
    },
}

impl AdmissionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionPath::Disabled => "disabled",
            AdmissionPath::OwnerBypass => "owner",
            AdmissionPath::RetryCredit => "retry_credit",
            AdmissionPath::Metered { .. } => "metered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub client: ClientIdentity,
    pub path: AdmissionPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    RateLimit { retry_after: Duration },
    QuotaExceeded { resets_at: DateTime<Utc> },
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::RateLimit { .. } => "rate_limit",
            DenyReason::QuotaExceeded { .. } => "quota_exceeded",
        }
    }

    /// Whole seconds until retrying can succeed, never zero.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let secs = match self {
            DenyReason::RateLimit { retry_after } => retry_after.as_secs_f64().ceil() as u64,
            DenyReason::QuotaExceeded { resets_at } => (*resets_at - now).num_seconds().max(0) as u64,
        };
        secs.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allow(Admission),
    Deny(DenyReason),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Counter(#[from] CounterError),
}

#[derive(Debug, Error)]
pub enum InvokeError<E> {
    #[error("upstream did not answer within the time limit")]
    Timeout { retry_token: Option<String> },
    #[error(transparent)]
    Upstream(E),
}

pub struct AdmissionGate {
    settings: GateSettings,
    bypass: OwnerBypass,
    counters: Arc<dyn CounterStore>,
    credits: RetryCredits,
    clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    pub fn new(
        settings: GateSettings,
        bypass: OwnerBypass,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let credits = RetryCredits::new(settings.retry_credit_ttl);
        Self {
            settings,
            bypass,
            counters,
            credits,
            clock,
        }
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    pub fn mode(&self) -> OperatingMode {
        self.settings.mode
    }

    pub fn bypass(&self) -> &OwnerBypass {
        &self.bypass
    }

    pub fn counters(&self) -> &Arc<dyn CounterStore> {
        &self.counters
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn admit(
        &self,
        request: &AdmissionRequest<'_>,
    ) -> Result<AdmissionDecision, GateError> {
        let client = ClientIdentity::resolve(
            request.owner_key,
            request.source,
            request.device,
            &self.bypass,
        );

        let decision = self.decide(client, request).await;
        match &decision {
            Ok(AdmissionDecision::Allow(admission)) => {
                metrics::record_admission(admission.path.as_str());
                tracing::debug!(
                    client = admission.client.kind(),
                    path = admission.path.as_str(),
                    "Request admitted"
                );
            }
            Ok(AdmissionDecision::Deny(reason)) => {
                metrics::record_admission(reason.as_str());
                tracing::info!(reason = reason.as_str(), "Request denied");
            }
            Err(e) => {
                metrics::record_admission("error");
                tracing::error!(error = %e, "Admission check failed");
            }
        }
        decision
    }

    async fn decide(
        &self,
        client: ClientIdentity,
        request: &AdmissionRequest<'_>,
    ) -> Result<AdmissionDecision, GateError> {
        if !self.settings.mode.gate_enforced() {
            return Ok(allow(client, AdmissionPath::Disabled));
        }

        if client.is_owner() {
            return Ok(allow(client, AdmissionPath::OwnerBypass));
        }

        let now = self.clock.now();
        let bucket = client.bucket_key();
        let day = now.date_naive();
        let quota_limit = self.settings.daily_quota_limit;

        // A retry credit waives the quota charge, never the rate window.
        let credit = request
            .retry_token
            .filter(|token| self.credits.is_valid(token, &bucket, now));

        if credit.is_none()
            && !request.skip_quota
            && self.counters.daily_used(&bucket, day).await? >= quota_limit
        {
            return Ok(quota_denied(day, now));
        }

        let limit = self.settings.max_requests_per_window;
        let window_count = match self
            .counters
            .record_in_window(&bucket, limit, self.settings.window, now)
            .await?
        {
            WindowOutcome::Admitted { count } => count,
            WindowOutcome::Limited { retry_after } => {
                return Ok(AdmissionDecision::Deny(DenyReason::RateLimit { retry_after }));
            }
        };

        if credit.is_some_and(|token| self.credits.redeem(token, &bucket, now)) {
            return Ok(allow(client, AdmissionPath::RetryCredit));
        }

        let quota_remaining = if request.skip_quota {
            None
        } else {
            match self.counters.consume_daily(&bucket, day, quota_limit).await? {
                QuotaOutcome::Granted { used } => Some(quota_limit.saturating_sub(used)),
                QuotaOutcome::Exhausted { .. } => {
                    // Lost the last unit to a concurrent request; give the
                    // window slot back so the denial does not count.
                    if let Err(e) = self.counters.release_in_window(&bucket, now).await {
                        tracing::warn!(error = %e, "Failed to release rate window slot");
                    }
                    return Ok(quota_denied(day, now));
                }
            }
        };

        Ok(allow(
            client,
            AdmissionPath::Metered {
                window_limit: limit,
                window_remaining: limit.saturating_sub(window_count),
                quota_remaining,
            },
        ))
    }

    /// Run an admitted call under the upstream timeout.
    ///
    /// On expiry the call's future is dropped, so a late result is never
    /// applied. Nothing is refunded; a metered caller instead receives a
    /// single-use retry token.
    pub async fn invoke_with_timeout<F, T, E>(
        &self,
        admission: &Admission,
        call: F,
    ) -> Result<T, InvokeError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.settings.upstream_timeout, call).await {
            Ok(result) => result.map_err(InvokeError::Upstream),
            Err(_) => {
                let retry_token = match admission.path {
                    AdmissionPath::Metered { .. } => Some(
                        self.credits
                            .issue(&admission.client.bucket_key(), self.clock.now()),
                    ),
                    _ => None,
                };
                metrics::record_upstream_timeout();
                tracing::warn!(
                    timeout_ms = self.settings.upstream_timeout.as_millis() as u64,
                    client = admission.client.kind(),
                    retry_credit = retry_token.is_some(),
                    "Upstream call timed out"
                );
                Err(InvokeError::Timeout { retry_token })
            }
        }
    }

    /// Drop expired counter state and retry credits.
    pub async fn prune(&self) {
        let now = self.clock.now();
        self.counters.prune(now, self.settings.window).await;
        self.credits.prune(now);
    }
}

fn allow(client: ClientIdentity, path: AdmissionPath) -> AdmissionDecision {
    AdmissionDecision::Allow(Admission { client, path })
}

fn quota_denied(day: NaiveDate, now: DateTime<Utc>) -> AdmissionDecision {
    AdmissionDecision::Deny(DenyReason::QuotaExceeded {
        resets_at: next_utc_midnight(day, now),
    })
}

/// Quota days roll over at UTC midnight.
fn next_utc_midnight(day: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
    day.succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or_else(|| now + chrono::Duration::days(1))
}
