//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

/// All runtime configuration, sourced from environment variables with
/// the documented defaults.
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub port: u16,
    pub env: String,
    pub log_level: String,

    // CORS
    pub allowed_origins: Vec<String>,

    // Challenge verification
    pub turnstile_secret_key: String,
    pub turnstile_skip: bool,

    // Rate limiting
    pub rate_limit_rpm: u32,
    pub rate_limit_burst: u32,
    pub status_rate_limit_rpm: u32,
    pub status_rate_limit_burst: u32,

    // Worker pool
    pub max_workers: usize,
    pub max_queue_size: usize,

    // Object storage
    pub r2_account_id: String,
    pub r2_access_key_id: String,
    pub r2_secret_access_key: String,
    pub r2_bucket_name: String,
    pub r2_public_url: String,

    // File limits
    pub max_file_size: u64,
    pub max_duration_secs: u32,
    pub presigned_url_expiry: Duration,

    // Retention
    pub local_cleanup_interval: Duration,
    pub r2_cleanup_interval: Duration,
    pub r2_max_file_age: Duration,

    // Paths
    pub temp_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Loads configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: parse_or(env("PORT").as_deref(), 8080),
            env: env_or("ENV", "development"),
            log_level: env_or("LOG_LEVEL", "info"),

            allowed_origins: split_csv(&env_or("ALLOWED_ORIGINS", "http://localhost:3000")),

            turnstile_secret_key: env_or("TURNSTILE_SECRET_KEY", ""),
            turnstile_skip: parse_bool(env("TURNSTILE_SKIP").as_deref(), false),

            rate_limit_rpm: parse_or(env("RATE_LIMIT_RPM").as_deref(), 5),
            rate_limit_burst: parse_or(env("RATE_LIMIT_BURST").as_deref(), 2),
            status_rate_limit_rpm: parse_or(env("STATUS_RATE_LIMIT_RPM").as_deref(), 60),
            status_rate_limit_burst: parse_or(env("STATUS_RATE_LIMIT_BURST").as_deref(), 10),

            max_workers: parse_or(env("MAX_WORKERS").as_deref(), 3),
            max_queue_size: parse_or(env("MAX_QUEUE_SIZE").as_deref(), 10),

            r2_account_id: env_or("R2_ACCOUNT_ID", ""),
            r2_access_key_id: env_or("R2_ACCESS_KEY_ID", ""),
            r2_secret_access_key: env_or("R2_SECRET_ACCESS_KEY", ""),
            r2_bucket_name: env_or("R2_BUCKET_NAME", ""),
            r2_public_url: env_or("R2_PUBLIC_URL", ""),

            max_file_size: parse_or(env("MAX_FILE_SIZE").as_deref(), 524_288_000),
            max_duration_secs: parse_or(env("MAX_DURATION").as_deref(), 1800),
            presigned_url_expiry: minutes(parse_or(env("PRESIGNED_URL_EXPIRY").as_deref(), 15)),

            local_cleanup_interval: minutes(parse_or(env("LOCAL_CLEANUP_INTERVAL").as_deref(), 5)),
            r2_cleanup_interval: minutes(parse_or(env("R2_CLEANUP_INTERVAL").as_deref(), 30)),
            r2_max_file_age: minutes(parse_or(env("R2_MAX_FILE_AGE").as_deref(), 60)),

            temp_dir: PathBuf::from(env_or("TEMP_DIR", "./tmp")),
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
        }
    }

    /// True when running in development mode.
    #[must_use]
    pub fn is_development(&self) -> bool {
        self.env == "development"
    }

    /// True when running in production mode.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    /// The R2 configuration slice of this config.
    #[must_use]
    pub fn r2(&self) -> crate::storage::R2Config {
        crate::storage::R2Config {
            account_id: self.r2_account_id.clone(),
            access_key_id: self.r2_access_key_id.clone(),
            secret_access_key: self.r2_secret_access_key.clone(),
            bucket: self.r2_bucket_name.clone(),
            public_url: self.r2_public_url.clone(),
        }
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env(key).unwrap_or_else(|| default.to_string())
}

/// Parses a value, falling back to the default on absence or garbage.
fn parse_or<T: std::str::FromStr>(value: Option<&str>, default: T) -> T {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|value| value.trim().to_ascii_lowercase()) {
        Some(value) if value == "true" || value == "1" => true,
        Some(value) if value == "false" || value == "0" => false,
        _ => default,
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count * 60)
}
