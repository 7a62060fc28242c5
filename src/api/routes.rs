use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::auth::IdentityProvider;
use crate::idempotency::{IdempotencyHandler, IdempotencyHandlerConfig, InMemoryIdempotencyStore};
use crate::observability::{get_metrics, HealthChecker, LatencyTimer, RequestSpan};
use crate::repositories::InMemoryAssessmentRepository;
use crate::services::AssessmentService;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub assessments: AssessmentService,
    pub identity: Arc<dyn IdentityProvider>,
    pub idempotency: Arc<IdempotencyHandler>,
    pub max_body_bytes: usize,
    pub metrics_handle: Option<PrometheusHandle>,
    pub health_checker: Option<Arc<HealthChecker>>,
}

impl AppState {
    pub fn new(
        assessments: AssessmentService,
        identity: Arc<dyn IdentityProvider>,
        idempotency: Arc<IdempotencyHandler>,
    ) -> Self {
        Self {
            assessments,
            identity,
            idempotency,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            metrics_handle: None,
            health_checker: None,
        }
    }

    /// State backed entirely by in-memory stores.
    pub fn in_memory(
        identity: Arc<dyn IdentityProvider>,
        config: IdempotencyHandlerConfig,
    ) -> Self {
        let assessments = AssessmentService::new(Arc::new(InMemoryAssessmentRepository::new()));
        let idempotency = Arc::new(IdempotencyHandler::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            config,
        ));
        Self::new(assessments, identity, idempotency)
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Adds health checker to the state.
    pub fn with_health_checker(mut self, checker: Arc<HealthChecker>) -> Self {
        self.health_checker = Some(checker);
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

/// Creates the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let max_body_bytes = state.max_body_bytes;

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        // Assessment endpoints
        .route("/assessments", post(handlers::create_assessment))
        .route("/assessments/:id/answers", get(handlers::list_answers))
        .route("/assessments/:id/answers/save", post(handlers::save_answer))
        .route("/assessments/:id/complete", post(handlers::complete_assessment))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            RequestSpan::new(
                request_id,
                request.method().to_string(),
                request.uri().path().to_string(),
            )
            .span()
        }))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

/// Records request count and latency per matched route.
async fn track_metrics(request: Request, next: Next) -> Response {
    let timer = LatencyTimer::new();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    get_metrics().record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        timer.elapsed_ms(),
    );
    response
}
