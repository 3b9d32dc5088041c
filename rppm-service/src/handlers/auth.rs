use axum::extract::{rejection::JsonRejection, Json, State};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{AuthRequest, AuthResponse};
use crate::models::UsageEvent;
use crate::services::authenticator::AuthError;
use crate::services::device::DeviceIdentity;
use crate::services::metrics;
use crate::AppState;

/// Exchange an access code for the owner's profile, binding the code to the
/// calling device on first use.
pub async fn authenticate(
    State(state): State<AppState>,
    payload: Result<Json<AuthRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(anyhow::anyhow!(e.body_text())))?;
    req.validate()?;

    let device = DeviceIdentity::parse(&req.device_id)
        .map_err(|e| AppError::BadRequest(anyhow::Error::new(e)))?;

    match state.authenticator.authenticate(&req.code, &device).await {
        Ok(success) => {
            metrics::record_auth(if success.first_binding { "bound" } else { "success" });
            state.usage.record(UsageEvent::AuthSuccess);

            Ok(Json(AuthResponse {
                profile: success.profile,
                mode: success.mode,
                first_binding: success.first_binding,
                operating_mode: state.gate.mode().as_str(),
            }))
        }
        Err(e) => {
            let label = match &e {
                AuthError::InvalidInput(_) => "invalid_input",
                AuthError::InvalidCode => "invalid_code",
                AuthError::DeviceLocked => "device_locked",
                AuthError::ServerError(_) => "error",
            };
            metrics::record_auth(label);
            if !matches!(e, AuthError::ServerError(_)) {
                state.usage.record(UsageEvent::AuthFailed);
            }
            Err(e.into())
        }
    }
}
