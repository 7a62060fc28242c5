use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::responses::{ApiResponse, ErrorCode, ErrorResponse};

/// Postgres SQLSTATE for a relation that does not exist.
const UNDEFINED_TABLE: &str = "42P01";

pub type Result<T> = std::result::Result<T, AppError>;

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("validation failed")]
    ValidationDetails(serde_json::Value),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("session expired")]
    SessionExpired,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("duplicate operation: {0}")]
    DuplicateOperation(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Machine-readable code carried in the error envelope.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) | AppError::ValidationDetails(_) => ErrorCode::ValidationError,
            AppError::Unauthorized(_) => ErrorCode::Unauthorized,
            AppError::SessionExpired => ErrorCode::SessionExpired,
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::StateConflict(_) => ErrorCode::StateConflict,
            AppError::VersionConflict(_) => ErrorCode::VersionConflict,
            AppError::DuplicateOperation(_) => ErrorCode::DuplicateOperation,
            AppError::PayloadTooLarge(_) => ErrorCode::PayloadTooLarge,
            AppError::UnsupportedMediaType(_) => ErrorCode::UnsupportedMediaType,
            AppError::Database(e) if is_undefined_table(e) => ErrorCode::SchemaNotReady,
            AppError::Database(_) | AppError::Migration(_) => ErrorCode::DatabaseError,
            AppError::Configuration(_) => ErrorCode::ConfigurationError,
            AppError::Serialization(_) | AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code().status()
    }

    /// Builds the error body. Server-side failures never leak their cause.
    pub fn to_error_response(&self) -> ErrorResponse {
        let code = self.code();
        match self {
            AppError::Validation(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::StateConflict(msg)
            | AppError::VersionConflict(msg)
            | AppError::DuplicateOperation(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::UnsupportedMediaType(msg) => ErrorResponse::new(code, msg.clone()),
            AppError::ValidationDetails(details) => {
                ErrorResponse::new(code, "Request validation failed").with_details(details.clone())
            }
            AppError::SessionExpired => {
                ErrorResponse::new(code, "Session expired, please sign in again")
            }
            _ if code == ErrorCode::SchemaNotReady => {
                ErrorResponse::new(code, "Database schema is not ready")
            }
            _ => ErrorResponse::new(code, code.default_message()),
        }
    }

    /// Renders the full envelope, optionally tagged with a request id.
    pub fn into_envelope(self, request_id: Option<String>) -> (StatusCode, ApiResponse<()>) {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = ?self.code(), "request failed: {}", self);
        }
        let body = ApiResponse::<()>::error(self.to_error_response()).with_request_id(request_id);
        (status, body)
    }
}

fn is_undefined_table(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNDEFINED_TABLE),
        _ => false,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.into_envelope(None);
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge(rejection.body_text()),
            StatusCode::UNSUPPORTED_MEDIA_TYPE => {
                AppError::UnsupportedMediaType(rejection.body_text())
            }
            _ => AppError::Validation(rejection.body_text()),
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: serde_json::Map<String, serde_json::Value> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages: Vec<serde_json::Value> = errs
                    .iter()
                    .map(|e| {
                        let message = e
                            .message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string());
                        serde_json::Value::String(message)
                    })
                    .collect();
                (field.to_string(), serde_json::Value::Array(messages))
            })
            .collect();
        AppError::ValidationDetails(serde_json::Value::Object(details))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::SessionExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::StateConflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::DuplicateOperation("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::PayloadTooLarge("x".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::UnsupportedMediaType("x".into()).status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            AppError::Database(sqlx::Error::RowNotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::Configuration("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_session_expired_has_distinct_code() {
        assert_eq!(AppError::SessionExpired.code(), ErrorCode::SessionExpired);
        assert_ne!(
            AppError::SessionExpired.code(),
            AppError::Unauthorized("x".into()).code()
        );
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err = AppError::Internal(anyhow::anyhow!("connection string leaked"));
        let body = err.to_error_response();
        assert_eq!(body.code, ErrorCode::InternalError);
        assert!(!body.message.contains("leaked"));
    }

    #[test]
    fn test_envelope_carries_request_id() {
        let (status, body) =
            AppError::NotFound("Assessment not found".into()).into_envelope(Some("req-1".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.success);
        assert_eq!(body.request_id.as_deref(), Some("req-1"));
        assert_eq!(body.error.unwrap().message, "Assessment not found");
    }
}
