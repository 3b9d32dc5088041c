use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

/// Liveness plus dependency checks. Unreachable credential or counter stores
/// make the service unhealthy; a provider without a key only degrades it.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let credentials = match &state.credentials {
        Some(store) => match store.health_check().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::error!(error = %e, "Credential store health check failed");
                "unavailable"
            }
        },
        None => "not_configured",
    };

    let counters = match state.gate.counters().health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "Counter store health check failed");
            "unavailable"
        }
    };

    let provider = match state.invoker.provider().health_check().await {
        Ok(()) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Completion provider not ready");
            "not_configured"
        }
    };

    let healthy = credentials != "unavailable" && counters != "unavailable";
    let status = if !healthy {
        "unhealthy"
    } else if provider == "ok" {
        "ok"
    } else {
        "degraded"
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": state.config.service_name,
            "version": env!("CARGO_PKG_VERSION"),
            "mode": state.gate.mode().as_str(),
            "checks": {
                "credentials": credentials,
                "counters": counters,
                "provider": provider,
            }
        })),
    )
}
