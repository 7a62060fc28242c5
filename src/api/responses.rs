use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Assessment, AssessmentAnswer, AssessmentStatus};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            request_id: None,
        }
    }

    pub fn error(error: ErrorResponse) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(error),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Error codes shared by every endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    SessionExpired,
    Forbidden,
    NotFound,
    StateConflict,
    VersionConflict,
    DuplicateOperation,
    PayloadTooLarge,
    UnsupportedMediaType,
    InternalError,
    DatabaseError,
    ConfigurationError,
    SchemaNotReady,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized | ErrorCode::SessionExpired => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::StateConflict
            | ErrorCode::VersionConflict
            | ErrorCode::DuplicateOperation => StatusCode::CONFLICT,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorCode::InternalError
            | ErrorCode::DatabaseError
            | ErrorCode::ConfigurationError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::SchemaNotReady => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "Request validation failed",
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::SessionExpired => "Session expired, please sign in again",
            ErrorCode::Forbidden => "Access denied",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::StateConflict => "Resource is in a conflicting state",
            ErrorCode::VersionConflict => "Resource was modified concurrently",
            ErrorCode::DuplicateOperation => "Operation was already performed",
            ErrorCode::PayloadTooLarge => "Payload too large",
            ErrorCode::UnsupportedMediaType => "Unsupported media type",
            ErrorCode::InternalError => "An internal error occurred",
            ErrorCode::DatabaseError => "A database error occurred",
            ErrorCode::ConfigurationError => "Server is misconfigured",
            ErrorCode::SchemaNotReady => "Database schema is not ready",
        }
    }
}

/// Error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub database: bool,
}

/// Saved answer DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerResponse {
    pub id: Uuid,
    pub assessment_id: Uuid,
    pub step_id: String,
    pub question_id: String,
    pub answer_value: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<AssessmentAnswer> for AnswerResponse {
    fn from(answer: AssessmentAnswer) -> Self {
        Self {
            id: answer.id,
            assessment_id: answer.assessment_id,
            step_id: answer.step_id,
            question_id: answer.question_id,
            answer_value: answer.answer_value,
            updated_at: answer.updated_at,
        }
    }
}

/// Assessment DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResponse {
    pub id: Uuid,
    pub funnel_slug: String,
    pub status: AssessmentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Assessment> for AssessmentResponse {
    fn from(assessment: Assessment) -> Self {
        Self {
            id: assessment.id,
            funnel_slug: assessment.funnel_slug,
            status: assessment.status,
            created_at: assessment.created_at,
            completed_at: assessment.completed_at,
        }
    }
}
