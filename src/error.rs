use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("VPA not found: {0}")]
    VpaNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Bank unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Settlement in progress: {0}")]
    SettlementInProgress(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) | AppError::Integrity(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::VpaNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::InvalidState(_) | AppError::SettlementInProgress(_) => {
                StatusCode::CONFLICT
            }
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Stable wire code callers branch on.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "INVALID_ARGUMENT",
            AppError::VpaNotFound(_) => "VPA_NOT_FOUND",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::Unavailable(_) => "BANK_UNAVAILABLE",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Integrity(_) => "INTEGRITY_VIOLATION",
            AppError::SettlementInProgress(_) => "SETTLEMENT_IN_PROGRESS",
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => AppError::Database(e),
            RepositoryError::NotFound(msg) => AppError::NotFound(msg),
            RepositoryError::Conflict(msg) => AppError::Conflict(msg),
            RepositoryError::Integrity(msg) => AppError::Integrity(msg),
            RepositoryError::Corrupt(msg) => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_maps_to_invalid_argument() {
        let error = AppError::Validation("amount must be positive".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_vpa_not_found_status_code() {
        let error = AppError::VpaNotFound("ghost@bank9".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(error.code(), "VPA_NOT_FOUND");
    }

    #[test]
    fn test_database_error_is_internal() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code(), "INTERNAL");
    }

    #[test]
    fn test_settlement_in_progress_is_conflict() {
        let error = AppError::SettlementInProgress("2025-01-15".to_string());
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.code(), "SETTLEMENT_IN_PROGRESS");
    }

    #[test]
    fn test_repository_conflict_converts() {
        let error: AppError = RepositoryError::Conflict("dup".to_string()).into();
        assert_eq!(error.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_error_response_body_carries_code() {
        let error = AppError::Unavailable("HDFC is SUSPENDED".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "BANK_UNAVAILABLE");
        assert_eq!(json["status"], 503);
    }
}
