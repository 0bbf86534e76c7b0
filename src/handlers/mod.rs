pub mod banks;
pub mod settlements;
pub mod transactions;
pub mod vpa;
pub mod ws;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::error::AppError;
use crate::health::{check_health, RedisChecker, StoreChecker};
use crate::ports::AuditRepository;
use crate::AppState;

/// Malformed or unknown-field bodies are argument errors like any other validation failure.
pub(crate) fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store = StoreChecker::new(state.store.clone());
    let redis = state.redis_url.clone().map(RedisChecker::new);
    let report = check_health(store, redis, state.started_at).await;

    let status_code = if report.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(report))
}

pub async fn audit_trail(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let entries = state.store.audit_trail(&entity_type, &entity_id).await?;
    Ok(Json(entries))
}
