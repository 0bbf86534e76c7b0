use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use super::parse_body;
use crate::error::AppError;
use crate::schemas::{InitiateSettlementRequest, ReportFormat, SettlementReportQuery};
use crate::AppState;

#[derive(Deserialize)]
pub struct SettlementDateQuery {
    pub date: NaiveDate,
}

pub async fn initiate_settlement(
    State(state): State<AppState>,
    payload: Result<Json<InitiateSettlementRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = parse_body(payload)?;
    let batch = state.settlement.create_batch(req.settlement_date).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn list_settlements(
    State(state): State<AppState>,
    Query(query): Query<SettlementDateQuery>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.settlement.list_batches(query.date).await?))
}

pub async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.settlement.get_batch(&id).await?))
}

pub async fn settlement_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SettlementReportQuery>,
) -> Result<Response, AppError> {
    let bank_code = query.bank_code.as_deref();
    match query.format {
        ReportFormat::Json => Ok(Json(state.settlement.report(&id, bank_code).await?).into_response()),
        ReportFormat::Csv => {
            let body = state.settlement.report_csv(&id, bank_code).await?;
            let disposition = format!("attachment; filename=\"{}.csv\"", id);
            Ok((
                [
                    (header::CONTENT_TYPE, "text/csv".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                body,
            )
                .into_response())
        }
    }
}
