//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which repository backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            _ => Err(ConfigError::InvalidValue("STORE_BACKEND")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository backend
    pub store_backend: StoreBackend,

    /// Database connection URL (required for the postgres backend)
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,

    /// Admission tuning
    pub admission: AdmissionSettings,

    /// Aggregate recompute tuning
    pub consistency: ConsistencySettings,

    /// Notification channel capacity
    pub notification_queue_capacity: usize,

    /// Interval of the aggregate reconciliation job
    pub reconcile_interval: Duration,

    /// Approve new reviews immediately instead of leaving them pending
    pub auto_approve_reviews: bool,
}

/// Admission controller tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSettings {
    /// Longest a request waits for an event's critical section
    pub lock_timeout: Duration,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2_000),
        }
    }
}

/// Consistency engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencySettings {
    /// Attempts of the reload-recompute-save cycle on the fallback path
    pub max_attempts: u32,
    /// Base delay between attempts (grows linearly, plus jitter)
    pub backoff: Duration,
}

impl Default for ConsistencySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Duration::from_millis(20),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend: StoreBackend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let database_url = env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10)?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_or("PORT", 3000)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let log_json = env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let admission = AdmissionSettings {
            lock_timeout: Duration::from_millis(parse_or("ADMISSION_LOCK_TIMEOUT_MS", 2_000)?),
        };

        let max_attempts: u32 = parse_or("RECOMPUTE_MAX_ATTEMPTS", 4)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue("RECOMPUTE_MAX_ATTEMPTS"));
        }
        let consistency = ConsistencySettings {
            max_attempts,
            backoff: Duration::from_millis(parse_or("RECOMPUTE_BACKOFF_MS", 20)?),
        };

        let notification_queue_capacity: usize = parse_or("NOTIFICATION_QUEUE_CAPACITY", 1024)?;
        if notification_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("NOTIFICATION_QUEUE_CAPACITY"));
        }

        let reconcile_interval = Duration::from_secs(parse_or("RECONCILE_INTERVAL_SECS", 30)?);

        let auto_approve_reviews = parse_or("AUTO_APPROVE_REVIEWS", false)?;

        Ok(Self {
            store_backend,
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            log_json,
            admission,
            consistency,
            notification_queue_capacity,
            reconcile_interval,
            auto_approve_reviews,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
