use crate::api::responses::ApiResponse;
use crate::error::{AppError, Result};
use crate::idempotency::digest::digest;
use crate::idempotency::key::{extract_key, normalize_endpoint, CACHED_REPLAY_HEADER};
use crate::idempotency::storage::{IdempotencyRecord, IdempotencyStore, InsertOutcome};
use crate::observability::{get_metrics, mask_sensitive};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Metrics for idempotency handling.
#[derive(Debug, Default)]
pub struct IdempotencyMetrics {
    pub lookups: AtomicU64,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub conflicts: AtomicU64,
    pub stored: AtomicU64,
    pub races: AtomicU64,
    pub skipped: AtomicU64,
    pub storage_errors: AtomicU64,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_lookup(&self, outcome: &LookupOutcome) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            LookupOutcome::Hit(_) => &self.hits,
            LookupOutcome::Miss => &self.misses,
            LookupOutcome::Conflict => &self.conflicts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_lookup(outcome.label());
    }

    fn record_store(&self, outcome: &StoreOutcome) {
        let counter = match outcome {
            StoreOutcome::Stored => &self.stored,
            StoreOutcome::AlreadyRecorded => &self.races,
            StoreOutcome::Skipped(_) => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        get_metrics().record_idempotency_store(outcome.label());
    }

    fn record_storage_error(&self) {
        self.storage_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            races: self.races.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub conflicts: u64,
    pub stored: u64,
    pub races: u64,
    pub skipped: u64,
    pub storage_errors: u64,
}

impl MetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

/// Configuration for the idempotency handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyHandlerConfig {
    pub ttl_seconds: i64,
    pub cleanup_interval_seconds: u64,
}

impl Default for IdempotencyHandlerConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 86400, // 24 hours
            cleanup_interval_seconds: 3600,
        }
    }
}

/// Identifies which logical write a key belongs to.
#[derive(Debug, Clone)]
pub struct IdempotencyScope {
    pub owner: Option<Uuid>,
    pub endpoint: String,
    pub method: Method,
    pub key: Option<String>,
}

impl IdempotencyScope {
    pub fn new(owner: Option<Uuid>, path: &str, method: Method, key: Option<String>) -> Self {
        Self {
            owner,
            endpoint: normalize_endpoint(path),
            method,
            key,
        }
    }

    /// Builds the scope for an inbound request, reading the key header.
    pub fn from_request(
        owner: Option<Uuid>,
        method: Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Self {
        Self::new(owner, path, method, extract_key(headers))
    }

    /// The owner and key, when both are present.
    fn active(&self) -> Option<(Uuid, &str)> {
        match (self.owner, self.key.as_deref()) {
            (Some(owner), Some(key)) => Some((owner, key)),
            _ => None,
        }
    }
}

/// A previously produced response, replayed verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        response
            .headers_mut()
            .insert(CACHED_REPLAY_HEADER.clone(), HeaderValue::from_static("true"));
        response
    }
}

/// Result of checking the cache before running a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// Nothing usable is recorded; run the handler.
    Miss,
    /// Replay the recorded response.
    Hit(CachedResponse),
    /// The key was used before with a different payload.
    Conflict,
}

impl LookupOutcome {
    fn label(&self) -> &'static str {
        match self {
            LookupOutcome::Miss => "miss",
            LookupOutcome::Hit(_) => "hit",
            LookupOutcome::Conflict => "conflict",
        }
    }
}

/// Why a response was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoKey,
    Unauthenticated,
    NotCacheable,
    Unserializable,
    /// The expiry time is not representable.
    InvalidTtl,
    StorageFailure,
}

/// Result of recording a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// A concurrent request recorded the key first; its response stays authoritative.
    AlreadyRecorded,
    Skipped(SkipReason),
}

impl StoreOutcome {
    fn label(&self) -> &'static str {
        match self {
            StoreOutcome::Stored => "stored",
            StoreOutcome::AlreadyRecorded => "already_recorded",
            StoreOutcome::Skipped(SkipReason::NoKey) => "skipped_no_key",
            StoreOutcome::Skipped(SkipReason::Unauthenticated) => "skipped_unauthenticated",
            StoreOutcome::Skipped(SkipReason::NotCacheable) => "skipped_not_cacheable",
            StoreOutcome::Skipped(SkipReason::Unserializable) => "skipped_unserializable",
            StoreOutcome::Skipped(SkipReason::InvalidTtl) => "skipped_invalid_ttl",
            StoreOutcome::Skipped(SkipReason::StorageFailure) => "skipped_storage_failure",
        }
    }
}

/// Responses eligible for replay: any 2xx, plus the deterministic 409.
///
/// Other 4xx may depend on input the client corrects on retry, and 5xx must
/// stay retryable.
pub fn is_cacheable_status(status: StatusCode) -> bool {
    status.is_success() || status == StatusCode::CONFLICT
}

/// Handler for idempotent request processing.
///
/// Every failure inside the cache degrades to running the handler without
/// idempotency; it never fails the request.
pub struct IdempotencyHandler {
    store: Arc<dyn IdempotencyStore>,
    metrics: Arc<IdempotencyMetrics>,
    config: IdempotencyHandlerConfig,
}

impl IdempotencyHandler {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: IdempotencyHandlerConfig) -> Self {
        Self {
            store,
            metrics: Arc::new(IdempotencyMetrics::new()),
            config,
        }
    }

    /// Gets the metrics for this handler.
    pub fn metrics(&self) -> Arc<IdempotencyMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Configured lifetime of a recorded response. Saturates instead of panicking.
    pub fn ttl(&self) -> Duration {
        Duration::try_seconds(self.config.ttl_seconds).unwrap_or_else(Duration::max_value)
    }

    /// Checks whether a request repeats an earlier one.
    pub async fn lookup(
        &self,
        scope: &IdempotencyScope,
        payload: Option<&serde_json::Value>,
    ) -> LookupOutcome {
        let outcome = self.lookup_inner(scope, payload).await;
        self.metrics.record_lookup(&outcome);
        outcome
    }

    async fn lookup_inner(
        &self,
        scope: &IdempotencyScope,
        payload: Option<&serde_json::Value>,
    ) -> LookupOutcome {
        let Some((owner, key)) = scope.active() else {
            return LookupOutcome::Miss;
        };

        let record = match self
            .store
            .find_active(owner, &scope.endpoint, key, Utc::now())
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => return LookupOutcome::Miss,
            Err(e) => {
                self.metrics.record_storage_error();
                tracing::warn!(
                    endpoint = %scope.endpoint,
                    key = %mask_sensitive(key, 4),
                    "idempotency lookup failed, continuing without it: {}",
                    e
                );
                return LookupOutcome::Miss;
            }
        };

        if payload.is_some() {
            let request_hash = digest(payload);
            if record.request_hash.as_deref() != Some(request_hash.as_str()) {
                tracing::info!(
                    endpoint = %scope.endpoint,
                    key = %mask_sensitive(key, 4),
                    "idempotency key reused with a different payload"
                );
                return LookupOutcome::Conflict;
            }
        }

        let status = match u16::try_from(record.response_status)
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
        {
            Some(status) => status,
            None => {
                tracing::warn!(
                    status = record.response_status,
                    "ignoring idempotency record with invalid status"
                );
                return LookupOutcome::Miss;
            }
        };

        tracing::debug!(
            endpoint = %scope.endpoint,
            key = %mask_sensitive(key, 4),
            status = status.as_u16(),
            "replaying cached response"
        );

        LookupOutcome::Hit(CachedResponse {
            status,
            body: record.response_body,
        })
    }

    /// Records a handler's response so retries can replay it.
    pub async fn store<T: Serialize + ?Sized>(
        &self,
        scope: &IdempotencyScope,
        payload: Option<&serde_json::Value>,
        status: StatusCode,
        body: &T,
        ttl: Duration,
    ) -> StoreOutcome {
        let outcome = self.store_inner(scope, payload, status, body, ttl).await;
        self.metrics.record_store(&outcome);
        outcome
    }

    async fn store_inner<T: Serialize + ?Sized>(
        &self,
        scope: &IdempotencyScope,
        payload: Option<&serde_json::Value>,
        status: StatusCode,
        body: &T,
        ttl: Duration,
    ) -> StoreOutcome {
        let Some(key) = scope.key.as_deref() else {
            return StoreOutcome::Skipped(SkipReason::NoKey);
        };
        let Some(owner) = scope.owner else {
            return StoreOutcome::Skipped(SkipReason::Unauthenticated);
        };
        if !is_cacheable_status(status) {
            return StoreOutcome::Skipped(SkipReason::NotCacheable);
        }
        if Utc::now().checked_add_signed(ttl).is_none() {
            tracing::warn!(
                ttl_seconds = self.config.ttl_seconds,
                "idempotency ttl out of range, response not recorded"
            );
            return StoreOutcome::Skipped(SkipReason::InvalidTtl);
        }

        let response_body = match serde_json::to_value(body) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("response body not cacheable: {}", e);
                return StoreOutcome::Skipped(SkipReason::Unserializable);
            }
        };

        let record = IdempotencyRecord::new(
            key.to_string(),
            owner,
            scope.endpoint.clone(),
            scope.method.as_str().to_string(),
            payload.map(|p| digest(Some(p))),
            i32::from(status.as_u16()),
            response_body,
            ttl,
        );

        match self.store.insert(&record).await {
            Ok(InsertOutcome::Inserted) => StoreOutcome::Stored,
            Ok(InsertOutcome::AlreadyExists) => {
                tracing::debug!(
                    endpoint = %scope.endpoint,
                    key = %mask_sensitive(key, 4),
                    "concurrent request recorded this key first"
                );
                StoreOutcome::AlreadyRecorded
            }
            Err(e) => {
                self.metrics.record_storage_error();
                tracing::warn!(
                    endpoint = %scope.endpoint,
                    key = %mask_sensitive(key, 4),
                    "failed to record idempotent response: {}",
                    e
                );
                StoreOutcome::Skipped(SkipReason::StorageFailure)
            }
        }
    }

    /// Executes an operation with idempotency handling.
    ///
    /// Replays a recorded response when the key was seen, answers a reused key
    /// carrying a different payload with 409 `DUPLICATE_OPERATION`, and
    /// otherwise runs `operation`, wraps its result in the API envelope and
    /// records it when the status is cacheable.
    pub async fn execute<T, F, Fut>(
        &self,
        scope: &IdempotencyScope,
        payload: Option<&serde_json::Value>,
        request_id: Option<String>,
        operation: F,
    ) -> Response
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(StatusCode, T)>>,
    {
        match self.lookup(scope, payload).await {
            LookupOutcome::Hit(cached) => return cached.into_response(),
            LookupOutcome::Conflict => {
                let (status, body) = AppError::DuplicateOperation(
                    "Idempotency key was already used with a different request payload"
                        .to_string(),
                )
                .into_envelope(request_id);
                return (status, Json(body)).into_response();
            }
            LookupOutcome::Miss => {}
        }

        let rendered = match operation().await {
            Ok((status, data)) => serde_json::to_value(
                ApiResponse::success(data).with_request_id(request_id.clone()),
            )
            .map(|body| (status, body))
            .map_err(AppError::Serialization),
            Err(e) => {
                let (status, body) = e.into_envelope(request_id.clone());
                serde_json::to_value(body)
                    .map(|body| (status, body))
                    .map_err(AppError::Serialization)
            }
        };

        match rendered {
            Ok((status, body)) => {
                self.store(scope, payload, status, &body, self.ttl()).await;
                (status, Json(body)).into_response()
            }
            Err(e) => {
                let (status, body) = e.into_envelope(request_id);
                (status, Json(body)).into_response()
            }
        }
    }

    /// Runs cleanup of expired idempotency records.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.store.cleanup_expired(Utc::now()).await?;
        get_metrics().record_idempotency_cleanup(removed);
        Ok(removed)
    }
}

/// Background cleanup job for expired idempotency records.
pub struct IdempotencyCleanupJob {
    handler: Arc<IdempotencyHandler>,
    interval_seconds: u64,
}

impl IdempotencyCleanupJob {
    pub fn new(handler: Arc<IdempotencyHandler>, interval_seconds: u64) -> Self {
        Self {
            handler,
            interval_seconds: interval_seconds.max(1),
        }
    }

    /// Runs the cleanup job once.
    pub async fn run_once(&self) -> Result<u64> {
        self.handler.cleanup_expired().await
    }

    /// Starts the cleanup job in a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(
                self.interval_seconds,
            ));

            loop {
                interval.tick().await;

                match self.handler.cleanup_expired().await {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Cleaned up {} expired idempotency records", count);
                        }
                        let snapshot = self.handler.metrics().snapshot();
                        tracing::debug!(
                            lookups = snapshot.lookups,
                            hit_rate = snapshot.hit_rate(),
                            storage_errors = snapshot.storage_errors,
                            "idempotency cache stats"
                        );
                    }
                    Err(e) => {
                        tracing::error!("Failed to cleanup expired idempotency records: {}", e);
                    }
                }
            }
        })
    }
}
