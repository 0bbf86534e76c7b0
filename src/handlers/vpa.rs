use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::parse_body;
use crate::error::AppError;
use crate::schemas::{RegisterVpaRequest, ResolveVpaResponse};
use crate::validation::normalize_vpa;
use crate::AppState;

/// Unknown VPAs are a normal answer (`exists = false`), not a 404.
pub async fn resolve_vpa(
    State(state): State<AppState>,
    Path(vpa): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let resolved = state.directory.resolve(&vpa).await?;
    Ok(Json(ResolveVpaResponse::from_resolution(normalize_vpa(&vpa), resolved)))
}

pub async fn register_vpa(
    State(state): State<AppState>,
    payload: Result<Json<RegisterVpaRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_body(payload)?;
    let registered = state.directory.register(req).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

pub async fn deactivate_vpa(
    State(state): State<AppState>,
    Path(vpa): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.directory.deactivate(&vpa).await?;
    Ok(StatusCode::NO_CONTENT)
}
