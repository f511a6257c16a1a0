//! Service configuration.

use std::str::FromStr;
use std::time::Duration;

use cafeledger_common::constants::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_OPERATION_TIMEOUT};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable lines.
    Plain,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "plain" | "text" => Ok(LogFormat::Plain),
            other => Err(format!("Unknown log format: {other}")),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Database URL. In-memory storage when unset.
    pub database_url: Option<String>,
    /// Maximum pooled database connections.
    pub max_connections: u32,
    /// Create the schema on startup.
    pub run_migrations: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 16,
            run_migrations: true,
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Deadline applied to every ledger operation.
    pub operation_timeout: Duration,
    /// Maximum operations executing at once.
    pub max_in_flight: usize,
    /// Time allowed for in-flight operations to finish on shutdown.
    pub drain_timeout: Duration,
    /// Log level.
    pub log_level: String,
    /// Log format.
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_in_flight: 1024,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.storage.database_url = Some(url);
            }
        }

        if let Ok(max) = std::env::var("DATABASE_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.storage.max_connections = max;
            }
        }

        if let Ok(ms) = std::env::var("LEDGER_OPERATION_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.operation_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(max) = std::env::var("LEDGER_MAX_IN_FLIGHT") {
            if let Ok(max) = max.parse() {
                config.max_in_flight = max;
            }
        }

        if let Ok(secs) = std::env::var("LEDGER_DRAIN_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse() {
                config.drain_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            if let Ok(format) = format.parse() {
                config.log_format = format;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.operation_timeout.is_zero() {
            return Err("Operation timeout cannot be 0".to_string());
        }

        if self.max_in_flight == 0 {
            return Err("Max in-flight operations cannot be 0".to_string());
        }

        if self.max_in_flight > u32::MAX as usize {
            return Err("Max in-flight operations is too large".to_string());
        }

        if self.storage.database_url.is_some() && self.storage.max_connections == 0 {
            return Err("Database max connections cannot be 0".to_string());
        }

        Ok(())
    }
}
