use serde::Deserialize;

use crate::idempotency::IdempotencyHandlerConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    #[serde(default)]
    pub idempotency: IdempotencyHandlerConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl ApplicationSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One year.
pub const MAX_IDEMPOTENCY_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;

fn default_max_body_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values that would only fail later, inside a request.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let ttl = self.idempotency.ttl_seconds;
        if !(1..=MAX_IDEMPOTENCY_TTL_SECONDS).contains(&ttl) {
            return Err(config::ConfigError::Message(format!(
                "idempotency.ttl_seconds must be between 1 and {}, got {}",
                MAX_IDEMPOTENCY_TTL_SECONDS, ttl
            )));
        }
        Ok(())
    }
}
