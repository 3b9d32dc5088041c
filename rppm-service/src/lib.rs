pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimit},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::RppmConfig;
use crate::services::credentials::CredentialStore;
use crate::services::{AdmissionGate, Authenticator, CompletionInvoker, UsageRecorder};

#[derive(Clone)]
pub struct AppState {
    pub config: RppmConfig,
    pub authenticator: Arc<Authenticator>,
    pub gate: Arc<AdmissionGate>,
    pub invoker: CompletionInvoker,
    pub usage: UsageRecorder,
    /// `None` in unconfigured mode.
    pub credentials: Option<Arc<dyn CredentialStore>>,
    pub auth_rate_limit: IpRateLimit,
}

pub fn build_router(state: AppState) -> Router {
    // Brute-force protection for access codes
    let auth_route = Router::new()
        .route("/api/auth", post(handlers::auth::authenticate))
        .layer(from_fn_with_state(
            state.auth_rate_limit.clone(),
            ip_rate_limit_middleware,
        ));

    let origins: Vec<HeaderValue> = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/api/generate", post(handlers::generate::generate))
        .route("/api/usage", get(handlers::usage::usage_snapshot))
        .merge(auth_route)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    HeaderName::from_static(handlers::OWNER_KEY_HEADER),
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ])
                .expose_headers([
                    header::RETRY_AFTER,
                    HeaderName::from_static(handlers::generate::RATE_LIMIT_LIMIT_HEADER),
                    HeaderName::from_static(handlers::generate::RATE_LIMIT_REMAINING_HEADER),
                    HeaderName::from_static(REQUEST_ID_HEADER),
                ]),
        )
}
