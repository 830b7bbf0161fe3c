use std::env;
use std::net::{AddrParseError, SocketAddr};

use thiserror::Error;

/// Deployment environment. Development is permissive: webhook signature
/// verification is skipped (loudly) when no secret is configured. Production
/// fails closed instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    #[must_use]
    pub fn is_permissive(&self) -> bool {
        matches!(self, Self::Development)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub bind_addr: SocketAddr,
    pub build_sha: String,
    pub db_url: Option<String>,
    pub environment: Environment,
    pub master_encryption_key: String,
    pub exotel_webhook_secret: Option<String>,
    pub plivo_webhook_secret: Option<String>,
    pub default_retention_days: i32,
    pub dedup_capacity: usize,
    pub reaper_interval_seconds: u64,
    pub reaper_timeout_seconds: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid CALLKEEPER_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid CALLKEEPER_ENV: {0}")]
    InvalidEnvironment(String),
    #[error("MASTER_ENCRYPTION_KEY must be set")]
    MissingMasterKey,
    #[error("MASTER_ENCRYPTION_KEY must be at least 32 characters, got {0}")]
    MasterKeyTooShort(usize),
    #[error("CALLKEEPER_DEFAULT_RETENTION_DAYS must be between 1 and 365, got {0}")]
    RetentionDaysOutOfRange(i32),
    #[error("invalid {key}: {value}")]
    InvalidNumber { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = env::var("CALLKEEPER_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse::<SocketAddr>()?;
        let service_name =
            env::var("CALLKEEPER_SERVICE_NAME").unwrap_or_else(|_| "callkeeper".to_string());
        let build_sha = env::var("CALLKEEPER_BUILD_SHA").unwrap_or_else(|_| "dev".to_string());
        let db_url = env::var("DB_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .filter(|value| !value.trim().is_empty());

        let environment = match env::var("CALLKEEPER_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "development" | "dev" => Environment::Development,
            "production" | "prod" => Environment::Production,
            other => return Err(ConfigError::InvalidEnvironment(other.to_string())),
        };

        let master_encryption_key = env::var("MASTER_ENCRYPTION_KEY")
            .ok()
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingMasterKey)?;
        if master_encryption_key.len() < 32 {
            return Err(ConfigError::MasterKeyTooShort(master_encryption_key.len()));
        }

        let exotel_webhook_secret = env::var("EXOTEL_WEBHOOK_SECRET")
            .ok()
            .filter(|value| !value.is_empty());
        let plivo_webhook_secret = env::var("PLIVO_WEBHOOK_SECRET")
            .ok()
            .filter(|value| !value.is_empty());

        let default_retention_days =
            parse_number::<i32>("CALLKEEPER_DEFAULT_RETENTION_DAYS", 15)?;
        if !(1..=365).contains(&default_retention_days) {
            return Err(ConfigError::RetentionDaysOutOfRange(default_retention_days));
        }

        let dedup_capacity = parse_number::<usize>("CALLKEEPER_DEDUP_CAPACITY", 1000)?;
        let reaper_interval_seconds =
            parse_number::<u64>("CALLKEEPER_REAPER_INTERVAL_SECONDS", 3600)?;
        let reaper_timeout_seconds =
            parse_number::<u64>("CALLKEEPER_REAPER_TIMEOUT_SECONDS", 300)?;

        Ok(Self {
            service_name,
            bind_addr,
            build_sha,
            db_url,
            environment,
            master_encryption_key,
            exotel_webhook_secret,
            plivo_webhook_secret,
            default_retention_days,
            dedup_capacity,
            reaper_interval_seconds,
            reaper_timeout_seconds,
        })
    }

    /// A fully specified config for tests: permissive environment, memory
    /// stores, no webhook secrets unless a test sets them.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            service_name: "callkeeper-test".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            build_sha: "test".to_string(),
            db_url: None,
            environment: Environment::Development,
            master_encryption_key: "test-master-encryption-key-0123456789".to_string(),
            exotel_webhook_secret: None,
            plivo_webhook_secret: None,
            default_retention_days: 15,
            dedup_capacity: 1000,
            reaper_interval_seconds: 0,
            reaper_timeout_seconds: 30,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        Err(_) => Ok(default),
    }
}
