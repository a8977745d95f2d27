use serde::Deserialize;
use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

// Top-level configuration, one group per concern
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub holds: HoldsConfig,
    pub rate_limit: RateLimitConfig,
    pub features: FeatureFlags,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected pretty or json, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(format!("expected memory or postgres, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// JSON catalog loaded by the memory backend.
    pub catalog_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Rate-limit counters live in Redis when set.
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoldsConfig {
    pub ttl_minutes: i64,
    pub max_seats: usize,
    pub sweep_interval_seconds: u64,
    /// How long cancelled and expired holds stay readable before the sweeper drops them.
    pub retention_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub lookup_max: u64,
    pub default_max: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_rate_limiting: bool,
    pub enable_sweeper: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("{var} must be set when {because}")]
    Missing { var: &'static str, because: &'static str },
}

/// Reads `var` through `lookup`, falling back to `default`, and parses it.
fn parsed<T, F>(lookup: &F, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid { var, reason: e.to_string() })
}

fn positive<T>(var: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid { var, reason: "must be greater than zero".to_string() })
    }
}

fn within<T>(var: &'static str, value: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: PartialOrd + Display,
{
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            var,
            reason: format!("must be between {} and {}", range.start(), range.end()),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok().filter(|v| !v.is_empty()))
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Config {
            app: AppConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed(&lookup, "PORT", "8000")?,
                environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
                rust_log: lookup("RUST_LOG").unwrap_or_else(|| "seat_hold=debug,tower_http=debug".to_string()),
                log_format: parsed(&lookup, "LOG_FORMAT", "pretty")?,
            },
            storage: StorageConfig {
                backend: parsed(&lookup, "STORAGE_BACKEND", "memory")?,
                catalog_path: lookup("CATALOG_PATH"),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL"),
                pool_size: positive("DB_POOL_SIZE", parsed(&lookup, "DB_POOL_SIZE", "20")?)?,
            },
            redis: RedisConfig {
                url: lookup("REDIS_URL"),
            },
            holds: HoldsConfig {
                ttl_minutes: within("HOLD_TTL_MINUTES", parsed(&lookup, "HOLD_TTL_MINUTES", "10")?, 1..=1440)?,
                max_seats: within("MAX_SEATS_PER_HOLD", parsed(&lookup, "MAX_SEATS_PER_HOLD", "4")?, 1..=4)?,
                sweep_interval_seconds: positive(
                    "SWEEP_INTERVAL_SECONDS",
                    parsed(&lookup, "SWEEP_INTERVAL_SECONDS", "30")?,
                )?,
                retention_minutes: within(
                    "HOLD_RETENTION_MINUTES",
                    parsed(&lookup, "HOLD_RETENTION_MINUTES", "60")?,
                    1..=10_080,
                )?,
            },
            rate_limit: RateLimitConfig {
                window_seconds: positive(
                    "RATE_LIMIT_WINDOW_SECONDS",
                    parsed(&lookup, "RATE_LIMIT_WINDOW_SECONDS", "60")?,
                )?,
                lookup_max: parsed(&lookup, "RATE_LIMIT_LOOKUP_MAX", "5")?,
                default_max: parsed(&lookup, "RATE_LIMIT_DEFAULT_MAX", "100")?,
            },
            features: FeatureFlags {
                enable_rate_limiting: parsed(&lookup, "ENABLE_RATE_LIMITING", "true")?,
                enable_sweeper: parsed(&lookup, "ENABLE_SWEEPER", "true")?,
            },
        };

        if config.storage.backend == StorageBackend::Postgres && config.database.url.is_none() {
            return Err(ConfigError::Missing {
                var: "DATABASE_URL",
                because: "STORAGE_BACKEND=postgres",
            });
        }
        Ok(config)
    }
}
