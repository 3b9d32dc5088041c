//! Test helpers for rppm-service integration tests.
//!
//! Builds an `AppState` over in-memory stores, a manual clock and the mock
//! provider, and drives the router with `oneshot`. No external services.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use rppm_service::config::{config_from_map, OperatingMode};
use rppm_service::models::AccessCredential;
use rppm_service::services::clock::ManualClock;
use rppm_service::services::credentials::{CredentialStore, InMemoryCredentialStore};
use rppm_service::services::gate::{GateSettings, InMemoryCounterStore, OwnerBypass};
use rppm_service::services::providers::mock::MockProvider;
use rppm_service::services::usage::InMemoryUsageStore;
use rppm_service::services::{AdmissionGate, Authenticator, CompletionInvoker, UsageRecorder};
use rppm_service::{build_router, AppState};
use secrecy::SecretString;
use serde_json::{json, Value};
use service_core::middleware::rate_limit::{create_ip_rate_limiter, IpRateLimit};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

pub const TEST_CODE: &str = "GP-0001";
pub const OWNER_KEY: &str = "owner-secret";
pub const PRIMARY_MODEL: &str = "gemini-2.5-flash";
pub const FALLBACK_MODEL: &str = "gemini-2.0-flash";
pub const CLIENT_IP: &str = "203.0.113.10";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
pub struct TestOptions {
    pub mode: OperatingMode,
    pub with_credentials: bool,
    pub max_requests_per_window: u32,
    pub daily_quota_limit: u32,
    pub upstream_timeout: Duration,
    pub auth_attempts_per_minute: u32,
    pub primary_model: &'static str,
    pub fallback_model: Option<&'static str>,
    pub trust_proxy_headers: bool,
    pub owner_ips: Vec<&'static str>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Enforced,
            with_credentials: true,
            max_requests_per_window: 5,
            daily_quota_limit: 100,
            upstream_timeout: Duration::from_secs(5),
            auth_attempts_per_minute: 100,
            primary_model: PRIMARY_MODEL,
            fallback_model: Some(FALLBACK_MODEL),
            trust_proxy_headers: false,
            owner_ips: Vec::new(),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub credentials: Arc<InMemoryCredentialStore>,
    pub counters: Arc<InMemoryCounterStore>,
    pub provider: Arc<MockProvider>,
    pub usage: Arc<InMemoryUsageStore>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub text: String,
    pub body: Value,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_options(TestOptions::default())
    }

    pub fn with_options(options: TestOptions) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let trust = if options.trust_proxy_headers { "true" } else { "false" };
        let config = config_from_map(&HashMap::from([
            ("COMPLETION_PROVIDER", "mock"),
            ("TRUST_PROXY_HEADERS", trust),
        ]))
        .expect("Failed to build test configuration");

        let credentials = Arc::new(InMemoryCredentialStore::new());
        credentials.provision(AccessCredential::new(
            TEST_CODE,
            "Bu Sari",
            "SDN 1 Bandung",
            start_time(),
        ));

        let authenticator = if options.with_credentials {
            Authenticator::new(credentials.clone(), clock.clone())
        } else {
            Authenticator::unconfigured(clock.clone())
        };

        let counters = Arc::new(InMemoryCounterStore::new());
        let gate = AdmissionGate::new(
            GateSettings {
                mode: options.mode,
                max_requests_per_window: options.max_requests_per_window,
                window: Duration::from_secs(60),
                daily_quota_limit: options.daily_quota_limit,
                upstream_timeout: options.upstream_timeout,
                retry_credit_ttl: Duration::from_secs(600),
            },
            OwnerBypass::new(
                Some(SecretString::new(OWNER_KEY.to_string())),
                options
                    .owner_ips
                    .iter()
                    .map(|ip| ip.parse::<IpAddr>().expect("Invalid owner IP")),
            ),
            counters.clone(),
            clock.clone(),
        );

        let provider = Arc::new(MockProvider::new());
        let invoker = CompletionInvoker::new(
            provider.clone(),
            options.primary_model,
            options.fallback_model.map(str::to_string),
        );

        let usage = Arc::new(InMemoryUsageStore::new());

        let credential_store: Option<Arc<dyn CredentialStore>> = if options.with_credentials {
            Some(credentials.clone() as Arc<dyn CredentialStore>)
        } else {
            None
        };

        let state = AppState {
            config,
            authenticator: Arc::new(authenticator),
            gate: Arc::new(gate),
            invoker,
            usage: UsageRecorder::new(usage.clone()),
            credentials: credential_store,
            auth_rate_limit: IpRateLimit::new(
                create_ip_rate_limiter(options.auth_attempts_per_minute, 60),
                options.trust_proxy_headers,
            ),
        };

        Self {
            router: build_router(state.clone()),
            state,
            clock,
            credentials,
            counters,
            provider,
            usage,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let res = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed to respond");

        let status = res.status();
        let headers = res.headers().clone();
        let bytes = res
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let text = String::from_utf8_lossy(&bytes).to_string();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        TestResponse {
            status,
            headers,
            text,
            body,
        }
    }

    pub async fn post_json(&self, path: &str, ip: &str, body: Value) -> TestResponse {
        self.post_json_with_headers(path, ip, &[], body).await
    }

    /// POST from a socket peer at `ip`.
    pub async fn post_json_with_headers(
        &self,
        path: &str,
        ip: &str,
        headers: &[(&str, &str)],
        body: Value,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .extension(peer(ip));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn get(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn authenticate(&self, code: &str, device_id: &str, ip: &str) -> TestResponse {
        self.post_json(
            "/api/auth",
            ip,
            json!({ "code": code, "device_id": device_id }),
        )
        .await
    }

    pub async fn generate(&self, ip: &str, body: Value) -> TestResponse {
        self.post_json("/api/generate", ip, body).await
    }

    /// Wait for background usage writes to land.
    pub async fn wait_for_usage(&self, event: rppm_service::models::UsageEvent, count: i64) {
        for _ in 0..50 {
            if self.usage.count(event) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn peer(ip: &str) -> ConnectInfo<SocketAddr> {
    let ip: IpAddr = ip.parse().expect("Invalid test IP");
    ConnectInfo(SocketAddr::new(ip, 40000))
}

pub fn lesson_body() -> Value {
    json!({
        "teacher_name": "Bu Sari",
        "school_name": "SDN 1 Bandung",
        "subject": "IPAS",
        "grade": 4,
        "topic": "Siklus air",
        "meetings": 2,
        "minutes_per_meeting": 70,
        "learning_model": "Problem Based Learning"
    })
}

pub fn lesson_body_with(extra: Value) -> Value {
    let mut body = lesson_body();
    if let (Some(target), Some(fields)) = (body.as_object_mut(), extra.as_object()) {
        for (k, v) in fields {
            target.insert(k.clone(), v.clone());
        }
    }
    body
}
