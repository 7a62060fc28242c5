use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;

use super::metrics::{get_metrics, LatencyTimer};

/// Tables the service cannot run without.
const REQUIRED_TABLES: [&str; 4] = [
    "assessments",
    "assessment_answers",
    "user_sessions",
    "idempotency_keys",
];

const DATABASE_TIMEOUT: Duration = Duration::from_secs(5);
const DATABASE_LATENCY_THRESHOLD_MS: f64 = 100.0;

/// Health status of a service or dependency, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    pub fn is_degraded(&self) -> bool {
        *self == HealthStatus::Degraded
    }

    pub fn is_unhealthy(&self) -> bool {
        *self == HealthStatus::Unhealthy
    }
}

/// Result of probing one dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

/// Overall health: the worst status among the dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = dependencies
            .iter()
            .map(|d| d.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }
}

/// Probes the database and the migrated schema.
pub struct HealthChecker {
    pool: PgPool,
    start_time: std::time::Instant,
}

impl HealthChecker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            start_time: std::time::Instant::now(),
        }
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        let database = self.check_database().await;
        let mut dependencies = vec![database];
        if !dependencies[0].status.is_unhealthy() {
            dependencies.push(self.check_schema().await);
        }

        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.uptime_seconds(),
            dependencies,
        )
    }

    /// Round-trips `SELECT 1`, degraded past the latency threshold.
    pub async fn check_database(&self) -> DependencyHealth {
        let timer = LatencyTimer::new();
        let result = tokio::time::timeout(
            DATABASE_TIMEOUT,
            sqlx::query("SELECT 1").fetch_one(&self.pool),
        )
        .await;
        let latency = timer.elapsed_ms();
        get_metrics().record_db_query("health_check", latency, matches!(result, Ok(Ok(_))));

        match result {
            Ok(Ok(_)) => classify_latency("database", latency, DATABASE_LATENCY_THRESHOLD_MS),
            Ok(Err(e)) => DependencyHealth::unhealthy("database", format!("Query failed: {}", e)),
            Err(_) => DependencyHealth::unhealthy("database", "Connection timeout"),
        }
    }

    /// Verifies migrations have created every table the handlers touch.
    pub async fn check_schema(&self) -> DependencyHealth {
        let timer = LatencyTimer::new();
        let mut missing = Vec::new();

        for table in REQUIRED_TABLES {
            let found: Result<bool, sqlx::Error> = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_schema = current_schema() AND table_name = $1
                )
                "#,
            )
            .bind(table)
            .fetch_one(&self.pool)
            .await;

            match found {
                Ok(true) => {}
                Ok(false) => missing.push(table),
                Err(e) => {
                    return DependencyHealth::unhealthy("schema", format!("Query failed: {}", e))
                }
            }
        }

        schema_health(&missing, timer.elapsed_ms())
    }

    /// Ready once the database answers and the schema is in place.
    pub async fn is_ready(&self) -> bool {
        !self.check_all().await.status.is_unhealthy()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Marks a reachable dependency degraded once it answers slower than `threshold_ms`.
pub fn classify_latency(name: &str, latency_ms: f64, threshold_ms: f64) -> DependencyHealth {
    let mut health = DependencyHealth::healthy(name, latency_ms);
    if latency_ms > threshold_ms {
        health.status = HealthStatus::Degraded;
        health.message = Some("High latency detected".to_string());
    }
    health
}

fn schema_health(missing: &[&str], latency_ms: f64) -> DependencyHealth {
    if missing.is_empty() {
        DependencyHealth::healthy("schema", latency_ms)
    } else {
        DependencyHealth::unhealthy(
            "schema",
            format!("Missing tables: {}", missing.join(", ")),
        )
    }
}
