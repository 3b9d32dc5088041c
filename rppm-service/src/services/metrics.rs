//! Prometheus metrics for rppm-service.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub static ADMISSION_DECISIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static AUTH_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub static UPSTREAM_LATENCY_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
pub static UPSTREAM_ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static UPSTREAM_TIMEOUTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
pub static UPSTREAM_TOKENS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Later calls are no-ops.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let admissions = IntCounterVec::new(
        Opts::new(
            "rppm_admission_decisions_total",
            "Admission gate decisions by outcome",
        ),
        &["outcome"],
    )?;

    let auth_attempts = IntCounterVec::new(
        Opts::new("rppm_auth_attempts_total", "Authentication attempts by result"),
        &["result"],
    )?;

    let upstream_latency = HistogramVec::new(
        HistogramOpts::new(
            "rppm_upstream_latency_seconds",
            "Completion provider latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0]),
        &["provider", "model"],
    )?;

    let upstream_errors = IntCounterVec::new(
        Opts::new("rppm_upstream_errors_total", "Completion provider errors"),
        &["provider", "error_type"],
    )?;

    let upstream_timeouts = IntCounter::new(
        "rppm_upstream_timeouts_total",
        "Admitted calls abandoned at the gate timeout",
    )?;

    let upstream_tokens = IntCounterVec::new(
        Opts::new("rppm_upstream_tokens_total", "Tokens processed by model"),
        &["model", "type"],
    )?;

    registry.register(Box::new(admissions.clone()))?;
    registry.register(Box::new(auth_attempts.clone()))?;
    registry.register(Box::new(upstream_latency.clone()))?;
    registry.register(Box::new(upstream_errors.clone()))?;
    registry.register(Box::new(upstream_timeouts.clone()))?;
    registry.register(Box::new(upstream_tokens.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = ADMISSION_DECISIONS_TOTAL.set(admissions);
    let _ = AUTH_ATTEMPTS_TOTAL.set(auth_attempts);
    let _ = UPSTREAM_LATENCY_SECONDS.set(upstream_latency);
    let _ = UPSTREAM_ERRORS_TOTAL.set(upstream_errors);
    let _ = UPSTREAM_TIMEOUTS_TOTAL.set(upstream_timeouts);
    let _ = UPSTREAM_TOKENS_TOTAL.set(upstream_tokens);

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to convert metrics to UTF-8");
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

pub fn record_admission(outcome: &str) {
    if let Some(counter) = ADMISSION_DECISIONS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_auth(result: &str) {
    if let Some(counter) = AUTH_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

pub fn record_provider_latency(provider: &str, model: &str, duration_secs: f64) {
    if let Some(histogram) = UPSTREAM_LATENCY_SECONDS.get() {
        histogram
            .with_label_values(&[provider, model])
            .observe(duration_secs);
    }
}

pub fn record_provider_error(provider: &str, error_type: &str) {
    if let Some(counter) = UPSTREAM_ERRORS_TOTAL.get() {
        counter.with_label_values(&[provider, error_type]).inc();
    }
}

pub fn record_upstream_timeout() {
    if let Some(counter) = UPSTREAM_TIMEOUTS_TOTAL.get() {
        counter.inc();
    }
}

pub fn record_tokens(model: &str, input_tokens: i32, output_tokens: i32) {
    if let Some(counter) = UPSTREAM_TOKENS_TOTAL.get() {
        counter
            .with_label_values(&[model, "input"])
            .inc_by(input_tokens.max(0) as u64);
        counter
            .with_label_values(&[model, "output"])
            .inc_by(output_tokens.max(0) as u64);
    }
}
