use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::api::requests::{CreateAssessmentRequest, SaveAnswerRequest};
use crate::api::responses::{AnswerResponse, ApiResponse, AssessmentResponse, HealthResponse};
use crate::auth::authenticate;
use crate::error::AppError;
use crate::idempotency::IdempotencyScope;
use crate::observability::AggregatedHealth;

use super::routes::{AppState, REQUEST_ID_HEADER};

fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn error_response(error: AppError, request_id: Option<String>) -> Response {
    let (status, body) = error.into_envelope(request_id);
    (status, Json(body)).into_response()
}

fn parse_body<T: serde::de::DeserializeOwned>(payload: &serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(payload.clone()).map_err(|e| AppError::Validation(e.to_string()))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let database = match &state.health_checker {
        Some(checker) => !checker.check_database().await.status.is_unhealthy(),
        None => true,
    };

    let response = HealthResponse {
        status: if database { "healthy".to_string() } else { "degraded".to_string() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        database,
    };

    Json(ApiResponse::success(response))
}

/// Detailed health check with per-dependency status.
pub async fn detailed_health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<AggregatedHealth>>) {
    let health = match &state.health_checker {
        Some(checker) => checker.check_all().await,
        None => AggregatedHealth::new(env!("CARGO_PKG_VERSION").to_string(), 0, Vec::new()),
    };

    let status = if health.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(ApiResponse::success(health)))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let ready = match &state.health_checker {
        Some(checker) => checker.is_ready().await,
        None => true,
    };

    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Assessment Handlers
// ============================================================================

/// Start an assessment.
pub async fn create_assessment(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let request_id = request_id(&headers);
    let payload = match body {
        Ok(Json(payload)) => payload,
        Err(rejection) => return error_response(rejection.into(), request_id),
    };

    let auth = authenticate(state.identity.as_ref(), &headers).await;
    let owner = auth.as_ref().ok().map(|identity| identity.user_id);
    let scope = IdempotencyScope::from_request(owner, method, uri.path(), &headers);
    let parsed = parse_body::<CreateAssessmentRequest>(&payload);
    let service = state.assessments.clone();

    state
        .idempotency
        .execute(&scope, Some(&payload), request_id, || async move {
            let identity = auth?;
            let assessment = service.create_assessment(identity.user_id, parsed?).await?;
            Ok((StatusCode::CREATED, AssessmentResponse::from(assessment)))
        })
        .await
}

/// Save one answer of an assessment.
pub async fn save_answer(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Response {
    let request_id = request_id(&headers);
    let assessment_id = match path {
        Ok(Path(id)) => id,
        Err(rejection) => return error_response(rejection.into(), request_id),
    };
    let payload = match body {
        Ok(Json(payload)) => payload,
        Err(rejection) => return error_response(rejection.into(), request_id),
    };

    let auth = authenticate(state.identity.as_ref(), &headers).await;
    let owner = auth.as_ref().ok().map(|identity| identity.user_id);
    let scope = IdempotencyScope::from_request(owner, method, uri.path(), &headers);
    let parsed = parse_body::<SaveAnswerRequest>(&payload);
    let service = state.assessments.clone();

    state
        .idempotency
        .execute(&scope, Some(&payload), request_id, || async move {
            let identity = auth?;
            let answer = service
                .save_answer(identity.user_id, assessment_id, parsed?)
                .await?;
            Ok((StatusCode::CREATED, AnswerResponse::from(answer)))
        })
        .await
}

/// Complete an assessment. Carries no body, so replays are keyed on the header alone.
pub async fn complete_assessment(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
) -> Response {
    let request_id = request_id(&headers);
    let assessment_id = match path {
        Ok(Path(id)) => id,
        Err(rejection) => return error_response(rejection.into(), request_id),
    };

    let auth = authenticate(state.identity.as_ref(), &headers).await;
    let owner = auth.as_ref().ok().map(|identity| identity.user_id);
    let scope = IdempotencyScope::from_request(owner, method, uri.path(), &headers);
    let service = state.assessments.clone();

    state
        .idempotency
        .execute(&scope, None, request_id, || async move {
            let identity = auth?;
            let assessment = service.complete(identity.user_id, assessment_id).await?;
            Ok((StatusCode::OK, AssessmentResponse::from(assessment)))
        })
        .await
}

/// List the answers saved so far.
pub async fn list_answers(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<ApiResponse<Vec<AnswerResponse>>>, Response> {
    let request_id = request_id(&headers);
    let Path(assessment_id) = path.map_err(|e| error_response(e.into(), request_id.clone()))?;

    let identity = authenticate(state.identity.as_ref(), &headers)
        .await
        .map_err(|e| error_response(e, request_id.clone()))?;

    let answers = state
        .assessments
        .list_answers(identity.user_id, assessment_id)
        .await
        .map_err(|e| error_response(e, request_id.clone()))?;

    let items = answers.into_iter().map(AnswerResponse::from).collect();
    Ok(Json(ApiResponse::success(items).with_request_id(request_id)))
}
