//! Health, metrics and owner usage endpoints.

mod common;

use axum::http::StatusCode;
use common::{lesson_body, TestApp, TestOptions, CLIENT_IP, OWNER_KEY, TEST_CODE};
use rppm_service::config::OperatingMode;
use rppm_service::models::UsageEvent;
use rppm_service::services::metrics::init_metrics;

#[tokio::test]
async fn health_check_reports_mode_and_stores() {
    let app = TestApp::spawn();

    let res = app.get("/health", &[]).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "ok");
    assert_eq!(res.body["service"], "rppm-service");
    assert_eq!(res.body["mode"], "enforced");
    assert_eq!(res.body["checks"]["credentials"], "ok");
    assert_eq!(res.body["checks"]["counters"], "ok");
}

#[tokio::test]
async fn health_check_in_unconfigured_mode() {
    let app = TestApp::with_options(TestOptions {
        mode: OperatingMode::Unconfigured,
        with_credentials: false,
        ..Default::default()
    });

    let res = app.get("/health", &[]).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["mode"], "unconfigured");
    assert_eq!(res.body["checks"]["credentials"], "not_configured");
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let app = TestApp::spawn();

    let res = app.get("/health", &[("x-request-id", "req-42")]).await;
    assert_eq!(res.headers["x-request-id"], "req-42");
    assert_eq!(res.headers["x-content-type-options"], "nosniff");
    assert_eq!(res.headers["cache-control"], "no-store");
}

#[tokio::test]
async fn metrics_endpoint_exports_admission_decisions() {
    init_metrics().unwrap();
    let app = TestApp::spawn();

    app.generate(CLIENT_IP, lesson_body()).await;

    let res = app.get("/metrics", &[]).await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.text.contains("rppm_admission_decisions_total"));
}

#[tokio::test]
async fn usage_snapshot_requires_the_owner_key() {
    let app = TestApp::spawn();

    let res = app.get("/api/usage", &[]).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "UNAUTHORIZED");

    let res = app.get("/api/usage", &[("x-owner-key", "guess")]).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn usage_snapshot_counts_events() {
    let app = TestApp::spawn();

    app.authenticate(TEST_CODE, "fp:1f3a9c0d", CLIENT_IP).await;
    app.authenticate(TEST_CODE, "fp:77b2e410", CLIENT_IP).await;
    app.generate(CLIENT_IP, lesson_body()).await;

    app.wait_for_usage(UsageEvent::AuthSuccess, 1).await;
    app.wait_for_usage(UsageEvent::AuthFailed, 1).await;
    app.wait_for_usage(UsageEvent::GenerateSuccess, 1).await;

    let res = app.get("/api/usage", &[("x-owner-key", OWNER_KEY)]).await;
    assert_eq!(res.status, StatusCode::OK);

    let counters = res.body["counters"].as_array().unwrap();
    let count = |kind: &str| {
        counters
            .iter()
            .find(|c| c["kind"] == kind)
            .and_then(|c| c["count"].as_i64())
            .unwrap_or(0)
    };
    assert_eq!(count("auth_success"), 1);
    assert_eq!(count("auth_failed"), 1);
    assert_eq!(count("generate_success"), 1);
    assert_eq!(count("generate_denied"), 0);
}
