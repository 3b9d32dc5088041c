//! Access-code authentication and device locking.

mod common;

use axum::http::StatusCode;
use common::{TestApp, TestOptions, CLIENT_IP, TEST_CODE};
use rppm_service::config::OperatingMode;
use serde_json::json;

const DEVICE_ONE: &str = "fp:1f3a9c0d";
const DEVICE_TWO: &str = "fp:77b2e410";

#[tokio::test]
async fn first_device_keeps_the_code() {
    let app = TestApp::spawn();

    let res = app.authenticate(TEST_CODE, DEVICE_ONE, CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["first_binding"], true);
    assert_eq!(res.body["mode"], "verified");
    assert_eq!(res.body["operating_mode"], "enforced");
    assert_eq!(res.body["profile"]["owner_name"], "Bu Sari");
    assert_eq!(res.body["profile"]["organization_name"], "SDN 1 Bandung");

    let res = app.authenticate(TEST_CODE, DEVICE_TWO, CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["error"], "DEVICE_LOCKED");

    let locked = app.credentials.get(TEST_CODE).unwrap();
    assert_eq!(locked.locked_device_id.as_deref(), Some(DEVICE_ONE));

    let res = app.authenticate(TEST_CODE, DEVICE_ONE, CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["first_binding"], false);
    assert_eq!(app.credentials.get(TEST_CODE).unwrap(), locked);
}

#[tokio::test]
async fn reset_lock_frees_the_code_for_a_new_device() {
    let app = TestApp::spawn();
    app.authenticate(TEST_CODE, DEVICE_ONE, CLIENT_IP).await;

    assert!(app.credentials.reset_lock(TEST_CODE));

    let res = app.authenticate(TEST_CODE, DEVICE_TWO, CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["first_binding"], true);
}

#[tokio::test]
async fn unknown_code_is_rejected() {
    let app = TestApp::spawn();

    let res = app.authenticate("GP-9999", DEVICE_ONE, CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["error"], "INVALID_CODE");
}

#[tokio::test]
async fn malformed_requests_are_invalid_input() {
    let app = TestApp::spawn();

    let res = app
        .post_json("/api/auth", CLIENT_IP, json!({ "code": TEST_CODE }))
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "INVALID_INPUT");

    let res = app.authenticate(TEST_CODE, "", CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(res.body["error"], "INVALID_INPUT");

    let res = app.authenticate(TEST_CODE, "tok:bad\u{7}id", CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);

    // Nothing was bound by the rejected attempts.
    assert!(app.credentials.get(TEST_CODE).unwrap().locked_device_id.is_none());
}

#[tokio::test]
async fn legacy_bare_token_is_a_weak_identity() {
    let app = TestApp::spawn();

    let res = app.authenticate(TEST_CODE, "a1b2c3d4", CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        app.credentials.get(TEST_CODE).unwrap().locked_device_id.as_deref(),
        Some("tok:a1b2c3d4")
    );

    let res = app.authenticate(TEST_CODE, "tok:a1b2c3d4", CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn concurrent_first_logins_bind_exactly_one_device() {
    let app = TestApp::spawn();

    let mut handles = Vec::new();
    for i in 0..16 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            use tower::util::ServiceExt;
            let req = axum::http::Request::builder()
                .method("POST")
                .uri("/api/auth")
                .header("content-type", "application/json")
                .extension(common::peer(&format!("198.51.100.{}", i + 1)))
                .body(axum::body::Body::from(
                    json!({ "code": TEST_CODE, "device_id": format!("fp:device{}", i) })
                        .to_string(),
                ))
                .unwrap();
            router.oneshot(req).await.unwrap().status()
        }));
    }

    let mut ok = 0;
    let mut locked = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::FORBIDDEN => locked += 1,
            other => panic!("unexpected status {}", other),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(locked, 15);
}

#[tokio::test]
async fn unconfigured_mode_is_flagged_in_every_response() {
    let app = TestApp::with_options(TestOptions {
        mode: OperatingMode::Unconfigured,
        with_credentials: false,
        ..Default::default()
    });

    for device in [DEVICE_ONE, DEVICE_TWO] {
        let res = app.authenticate("ANY-CODE", device, CLIENT_IP).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["mode"], "unconfigured");
        assert_eq!(res.body["operating_mode"], "unconfigured");
        assert_eq!(res.body["first_binding"], false);
    }
}

#[tokio::test]
async fn authentication_attempts_are_limited_per_address() {
    let app = TestApp::with_options(TestOptions {
        auth_attempts_per_minute: 3,
        ..Default::default()
    });

    for _ in 0..3 {
        let res = app.authenticate("GP-9999", DEVICE_ONE, CLIENT_IP).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    let res = app.authenticate(TEST_CODE, DEVICE_ONE, CLIENT_IP).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.body["error"], "RATE_LIMIT");
    assert!(res.headers.contains_key("retry-after"));

    // Another address is unaffected
    let res = app.authenticate(TEST_CODE, DEVICE_ONE, "198.51.100.200").await;
    assert_eq!(res.status, StatusCode::OK);
}
