use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;
use service_core::error::AppError;

use super::{owner_key, OwnerKeyQuery};
use crate::models::UsageCounter;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub counters: Vec<UsageCounter>,
}

/// Owner-only snapshot of the usage counters.
pub async fn usage_snapshot(
    State(state): State<AppState>,
    Query(query): Query<OwnerKeyQuery>,
    headers: HeaderMap,
) -> Result<Json<UsageResponse>, AppError> {
    let authorized = owner_key(&headers, &query).is_some_and(|key| state.gate.bypass().matches_key(key));
    if !authorized {
        return Err(AppError::Unauthorized(anyhow::anyhow!("owner key required")));
    }

    let counters = state.usage.store().snapshot().await.map_err(AppError::InternalError)?;
    Ok(Json(UsageResponse { counters }))
}
