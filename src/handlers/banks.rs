use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::parse_body;
use crate::error::AppError;
use crate::schemas::{HeartbeatRequest, ListBanksQuery, RegisterBankRequest, UpdateBankStatusRequest};
use crate::AppState;

pub async fn register_bank(
    State(state): State<AppState>,
    payload: Result<Json<RegisterBankRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_body(payload)?;
    let bank = state.registry.register_bank(req).await?;
    Ok((StatusCode::CREATED, Json(bank)))
}

pub async fn list_banks(
    State(state): State<AppState>,
    Query(query): Query<ListBanksQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.registry.list_banks(query.status).await?))
}

pub async fn get_bank_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.registry.get_status(&code).await?))
}

pub async fn update_bank_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
    payload: Result<Json<UpdateBankStatusRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_body(payload)?;
    Ok(Json(state.registry.update_status(&code, req.status).await?))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Path(code): Path<String>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_body(payload)?;
    Ok(Json(state.registry.heartbeat(&code, req.into()).await?))
}
