use metrics::{counter, histogram, describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Metrics collector for the assessment API.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    pub fn record_idempotency_lookup(&self, outcome: &str) {
        counter!("idempotency_lookups_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_idempotency_store(&self, outcome: &str) {
        counter!("idempotency_stores_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_idempotency_cleanup(&self, removed: u64) {
        counter!("idempotency_records_expired_total").increment(removed);
    }

    pub fn record_answer_saved(&self, funnel_slug: &str) {
        counter!("assessment_answers_saved_total", "funnel" => funnel_slug.to_string()).increment(1);
    }

    pub fn record_assessment_completed(&self, funnel_slug: &str) {
        counter!("assessments_completed_total", "funnel" => funnel_slug.to_string()).increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }

    pub fn record_db_query(&self, query_type: &str, duration_ms: f64, success: bool) {
        counter!("db_queries_total", "type" => query_type.to_string(), "success" => success.to_string()).increment(1);
        histogram!("db_query_duration_ms", "type" => query_type.to_string()).record(duration_ms);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the metrics system and returns the Prometheus handle.
pub fn init_metrics() -> PrometheusHandle {
    let handle = METRICS_HANDLE.get_or_init(|| {
        let builder = PrometheusBuilder::new();
        let handle = match builder.install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                // Another recorder is already installed; render from a detached one.
                tracing::warn!("Prometheus recorder not installed: {}", e);
                PrometheusBuilder::new().build_recorder().handle()
            }
        };

        describe_metrics();
        handle
    });

    METRICS.get_or_init(Metrics::new);

    handle.clone()
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!(
        "idempotency_lookups_total",
        Unit::Count,
        "Idempotency lookups by outcome (hit, miss, conflict)"
    );
    describe_counter!(
        "idempotency_stores_total",
        Unit::Count,
        "Idempotency store attempts by outcome"
    );
    describe_counter!(
        "idempotency_records_expired_total",
        Unit::Count,
        "Expired idempotency records removed by the sweep"
    );

    describe_counter!(
        "assessment_answers_saved_total",
        Unit::Count,
        "Total assessment answers saved"
    );
    describe_counter!("assessments_completed_total", Unit::Count, "Total assessments completed");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!(
        "http_request_duration_ms",
        Unit::Milliseconds,
        "HTTP request latency in milliseconds"
    );

    describe_counter!("db_queries_total", Unit::Count, "Total database queries");
    describe_histogram!(
        "db_query_duration_ms",
        Unit::Milliseconds,
        "Database query latency in milliseconds"
    );
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
