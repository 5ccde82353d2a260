//! Configuration loaded from environment variables.

use roster_engine::{Expr, Policy, RetryConfig};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Database and retry settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    pub max_connections: u32,
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup` instead of the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingVar("DATABASE_URL"))?;
        let max_connections = parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;
        let max_attempts = parse_or(&lookup, "RETRY_MAX_ATTEMPTS", 3u32)?;
        let initial_delay_ms = parse_or(&lookup, "RETRY_INITIAL_DELAY_MS", 100u64)?;

        Ok(Self {
            database_url,
            max_connections,
            retry: RetryConfig::new(max_attempts)
                .with_initial_delay(Duration::from_millis(initial_delay_ms)),
        })
    }
}

/// What `roster-sync` reconciles.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub collection: String,
    /// JSON file holding an array of objects.
    pub input: PathBuf,
    pub key_field: String,
    pub policy: Policy,
    pub filter: Option<Expr>,
}

impl SyncJob {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let collection =
            lookup("SYNC_COLLECTION").ok_or(ConfigError::MissingVar("SYNC_COLLECTION"))?;
        let input = lookup("SYNC_INPUT")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingVar("SYNC_INPUT"))?;
        let key_field = lookup("SYNC_KEY_FIELD").unwrap_or_else(|| "id".to_string());

        let policy = match lookup("SYNC_POLICY") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidPolicy(raw))?,
            None => Policy::sync(),
        };

        let filter = lookup("SYNC_FILTER")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(ConfigError::InvalidFilter)?;

        Ok(Self {
            collection,
            input,
            key_field,
            policy,
            filter,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            name,
            value: raw,
        }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),

    #[error("Invalid {name} value: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("Invalid SYNC_POLICY value: {0} (expected sync, add-or-update or add-or-remove)")]
    InvalidPolicy(String),

    #[error("Invalid SYNC_FILTER expression")]
    InvalidFilter(#[source] serde_json::Error),
}
