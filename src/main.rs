use assessment_api::api::{create_router, AppState};
use assessment_api::auth::PostgresIdentityProvider;
use assessment_api::config::Settings;
use assessment_api::idempotency::{
    IdempotencyCleanupJob, IdempotencyHandler, PostgresIdempotencyStore,
};
use assessment_api::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use assessment_api::repositories::PgAssessmentRepository;
use assessment_api::services::AssessmentService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;

    // Initialize logging
    init_logging(&LogConfig::from_settings(&settings.logging));
    info!("Configuration loaded");

    let metrics_handle = init_metrics();

    // Connect to PostgreSQL
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;

    info!("Database connection established");

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    let idempotency = Arc::new(IdempotencyHandler::new(
        Arc::new(PostgresIdempotencyStore::new(pool.clone())),
        settings.idempotency.clone(),
    ));
    let _cleanup = IdempotencyCleanupJob::new(
        Arc::clone(&idempotency),
        settings.idempotency.cleanup_interval_seconds,
    )
    .start();

    let state = AppState::new(
        AssessmentService::new(Arc::new(PgAssessmentRepository::new(pool.clone()))),
        Arc::new(PostgresIdentityProvider::new(pool.clone())),
        idempotency,
    )
    .with_metrics(metrics_handle)
    .with_health_checker(Arc::new(HealthChecker::new(pool)))
    .with_max_body_bytes(settings.application.max_body_bytes);

    let address = settings.application.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {}", address);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
