use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::parse_body;
use crate::error::AppError;
use crate::schemas::{ListTransactionsQuery, ProcessTransactionRequest, ReverseTransactionRequest};
use crate::AppState;

/// Terminal outcomes after intake (including FAILED and TIMEOUT) are 200 with the
/// status in the body; only errors raised before persistence use error statuses.
pub async fn process_transaction(
    State(state): State<AppState>,
    payload: Result<Json<ProcessTransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_body(payload)?;
    let result = state.engine.process(req).await?;
    Ok((StatusCode::OK, Json(result)))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.engine.get_status(&id).await?))
}

pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.engine.cancel(&id).await?))
}

pub async fn reverse_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ReverseTransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_body(payload)?;
    Ok(Json(state.engine.reverse(&id, req).await?))
}

pub async fn transaction_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.engine.history(&id).await?))
}

pub async fn get_by_rrn(
    State(state): State<AppState>,
    Path(rrn): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.engine.get_by_rrn(&rrn).await?))
}

pub async fn list_by_vpa(
    State(state): State<AppState>,
    Path(vpa): Path<String>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.engine.list_by_vpa(&vpa, query.limit).await?))
}
