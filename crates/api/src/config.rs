//! Application configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// How deliveries are registered with the courier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourierMode {
    /// Real courier over HTTP.
    Http,
    /// Synthetic tracking numbers, optionally with automatic completion.
    Simulated,
}

/// Configuration rejected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("COURIER_MODE=simulated is not allowed when APP_ENV=production")]
    SimulationInProduction,

    #[error("COURIER_MODE=http requires COURIER_BASE_URL")]
    MissingCourierBaseUrl,

    #[error("PAYMENT_WEBHOOK_SECRET must be set when APP_ENV=production")]
    MissingWebhookSecret,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json` (default `text`)
/// - `APP_ENV`: `development` or `production` (default `development`)
/// - `DATABASE_URL`: PostgreSQL URL; unset means the in-memory store
/// - `PAYMENT_WEBHOOK_SECRET`, `PAYMENT_WEBHOOK_TOLERANCE_SECS` (300)
/// - `COURIER_MODE`: `http` or `simulated` (simulated outside production)
/// - `COURIER_BASE_URL`, `COURIER_NAME`, `COURIER_TIMEOUT_MS` (5000)
/// - `SIMULATED_COMPLETION_DELAY_MS`: unset means no automatic completion
/// - `OUTBOX_RELAY_INTERVAL_MS` (5000), `OUTBOX_BATCH_SIZE` (100), `OUTBOX_MAX_ATTEMPTS` (10)
/// - `REAPER_INTERVAL_SECS` (1800), `STALE_ORDER_AGE_SECS` (1800)
/// - `CONSUMER_MAX_ATTEMPTS` (5), `CONSUMER_BACKOFF_MS` (200)
/// - `CATALOG_PATH`: JSON price list; unset means the built-in sample
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub app_env: String,
    pub database_url: Option<String>,
    pub webhook_secret: String,
    pub webhook_tolerance: Duration,
    pub courier_mode: CourierMode,
    pub courier_base_url: Option<String>,
    pub courier_name: String,
    pub courier_timeout: Duration,
    pub simulated_completion_delay: Option<Duration>,
    pub relay_interval: Duration,
    pub outbox_batch_size: usize,
    pub outbox_max_attempts: i32,
    pub reaper_interval: Duration,
    pub stale_order_age: Duration,
    pub consumer_max_attempts: u32,
    pub consumer_backoff: Duration,
    pub catalog_path: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`; unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| text(key).and_then(|v| v.trim().parse::<u64>().ok());

        let app_env = text("APP_ENV").unwrap_or(defaults.app_env);
        let production = app_env.eq_ignore_ascii_case("production");

        let courier_mode = match text("COURIER_MODE").as_deref() {
            Some(m) if m.eq_ignore_ascii_case("http") => CourierMode::Http,
            Some(m) if m.eq_ignore_ascii_case("simulated") => CourierMode::Simulated,
            _ if production => CourierMode::Http,
            _ => CourierMode::Simulated,
        };

        let log_format = match text("LOG_FORMAT").as_deref() {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            host: text("HOST").unwrap_or(defaults.host),
            port: text("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: text("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            app_env,
            database_url: text("DATABASE_URL"),
            webhook_secret: lookup("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            webhook_tolerance: parsed("PAYMENT_WEBHOOK_TOLERANCE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.webhook_tolerance),
            courier_mode,
            courier_base_url: text("COURIER_BASE_URL"),
            courier_name: text("COURIER_NAME").unwrap_or(defaults.courier_name),
            courier_timeout: parsed("COURIER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.courier_timeout),
            simulated_completion_delay: parsed("SIMULATED_COMPLETION_DELAY_MS")
                .map(Duration::from_millis),
            relay_interval: parsed("OUTBOX_RELAY_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.relay_interval),
            outbox_batch_size: parsed("OUTBOX_BATCH_SIZE")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.outbox_batch_size),
            outbox_max_attempts: parsed("OUTBOX_MAX_ATTEMPTS")
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(defaults.outbox_max_attempts),
            reaper_interval: parsed("REAPER_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            stale_order_age: parsed("STALE_ORDER_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_order_age),
            consumer_max_attempts: parsed("CONSUMER_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.consumer_max_attempts),
            consumer_backoff: parsed("CONSUMER_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.consumer_backoff),
            catalog_path: text("CATALOG_PATH"),
        }
    }

    /// Rejects combinations that must never run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_production() && self.courier_mode == CourierMode::Simulated {
            return Err(ConfigError::SimulationInProduction);
        }
        if self.courier_mode == CourierMode::Http && self.courier_base_url.is_none() {
            return Err(ConfigError::MissingCourierBaseUrl);
        }
        if self.is_production() && self.webhook_secret.trim().is_empty() {
            return Err(ConfigError::MissingWebhookSecret);
        }
        if self.relay_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("OUTBOX_RELAY_INTERVAL_MS"));
        }
        if self.reaper_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("REAPER_INTERVAL_SECS"));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            app_env: "development".to_string(),
            database_url: None,
            webhook_secret: String::new(),
            webhook_tolerance: Duration::from_secs(300),
            courier_mode: CourierMode::Simulated,
            courier_base_url: None,
            courier_name: "courier".to_string(),
            courier_timeout: Duration::from_millis(5000),
            simulated_completion_delay: None,
            relay_interval: Duration::from_millis(5000),
            outbox_batch_size: 100,
            outbox_max_attempts: 10,
            reaper_interval: Duration::from_secs(1800),
            stale_order_age: Duration::from_secs(1800),
            consumer_max_attempts: 5,
            consumer_backoff: Duration::from_millis(200),
            catalog_path: None,
        }
    }
}
