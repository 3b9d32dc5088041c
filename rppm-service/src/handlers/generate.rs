use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Json, Query, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::rate_limit::client_addr;
use std::net::SocketAddr;
use validator::Validate;

use super::{owner_key, OwnerKeyQuery};
use crate::dtos::{AdmissionSummary, GenerateRequest, GenerateResponse};
use crate::models::UsageEvent;
use crate::services::device::DeviceIdentity;
use crate::services::gate::{
    AdmissionDecision, AdmissionPath, AdmissionRequest, DenyReason, InvokeError,
};
use crate::services::lesson::{build_prompts, parse_document, DocumentHeader, LessonPlan};
use crate::services::providers::CompletionOptions;
use crate::AppState;

pub const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

const TEMPERATURE: f32 = 0.7;

/// Count a request that ended before reaching the model, then pass the
/// error on.
fn failed(state: &AppState, err: impl Into<AppError>) -> AppError {
    state.usage.record(UsageEvent::GenerateFailed);
    err.into()
}

/// Generate one lesson plan.
///
/// Admission runs before any upstream work: a denied request never reaches
/// the model, and an admitted one is bounded by the gate's timeout.
pub async fn generate(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<OwnerKeyQuery>,
    headers: HeaderMap,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = payload
        .map_err(|e| failed(&state, AppError::BadRequest(anyhow::anyhow!(e.body_text()))))?;
    req.validate().map_err(|e| failed(&state, e))?;
    let lesson = req.lesson().map_err(|e| failed(&state, e))?;

    let device = req
        .device_id
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(DeviceIdentity::parse)
        .transpose()
        .map_err(|e| failed(&state, AppError::BadRequest(anyhow::Error::new(e))))?;

    let caller_key = req
        .api_key
        .as_ref()
        .filter(|k| !k.expose_secret().trim().is_empty());

    let source = client_addr(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.config.gate.trust_proxy_headers,
    );

    let admission_request = AdmissionRequest {
        owner_key: owner_key(&headers, &query),
        source,
        device: device.as_ref(),
        retry_token: req.retry_token.as_deref(),
        skip_quota: caller_key.is_some(),
    };

    let decision = state
        .gate
        .admit(&admission_request)
        .await
        .map_err(|e| failed(&state, e))?;

    let admission = match decision {
        AdmissionDecision::Allow(admission) => admission,
        AdmissionDecision::Deny(reason) => {
            state.usage.record(UsageEvent::GenerateDenied);
            let retry_after = Some(reason.retry_after_secs(state.gate.now()));
            return Err(match reason {
                DenyReason::RateLimit { .. } => AppError::TooManyRequests(
                    "Too many generation requests. Please wait before trying again.".to_string(),
                    retry_after,
                ),
                DenyReason::QuotaExceeded { .. } => AppError::QuotaExceeded { retry_after },
            });
        }
    };

    let prompts = build_prompts(&lesson);
    let options = CompletionOptions {
        temperature: Some(TEMPERATURE),
        max_output_tokens: None,
        json_response: true,
        api_key_override: caller_key.cloned(),
    };

    let completion = match state
        .gate
        .invoke_with_timeout(
            &admission,
            state.invoker.complete(&prompts.system, &prompts.user, options),
        )
        .await
    {
        Ok(completion) => completion,
        Err(InvokeError::Timeout { retry_token }) => {
            state.usage.record(UsageEvent::GenerateTimeout);
            return Err(AppError::GatewayTimeout {
                timeout_ms: state.gate.settings().upstream_timeout.as_millis() as u64,
                retry_token,
            });
        }
        Err(InvokeError::Upstream(e)) => {
            state.usage.record(UsageEvent::GenerateFailed);
            return Err(e.into());
        }
    };

    let body = match parse_document(&completion.text) {
        Ok(body) => body,
        Err(e) => {
            state.usage.record(UsageEvent::GenerateFailed);
            return Err(e.into());
        }
    };

    state.usage.record(UsageEvent::GenerateSuccess);

    tracing::info!(
        model = %completion.model,
        path = admission.path.as_str(),
        grade = lesson.grade,
        meetings = lesson.meetings,
        "Lesson plan generated"
    );

    let response = GenerateResponse {
        document: LessonPlan {
            header: DocumentHeader::new(&lesson, state.gate.now()),
            body,
        },
        model: completion.model,
        admission: AdmissionSummary::from(&admission.path),
    };

    let mut res = Json(response).into_response();
    if let AdmissionPath::Metered {
        window_limit,
        window_remaining,
        ..
    } = admission.path
    {
        let headers = res.headers_mut();
        headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(window_limit));
        headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(window_remaining));
    }

    Ok(res)
}
