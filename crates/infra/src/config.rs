//! Configuration loading and representation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use folio_moderation::RetryPolicy;

/// Retry pipeline tuning knobs.
#[derive(Clone, Debug)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_max_ms: u64,
    pub retry_interval_ms: u64,
    pub batch_size: usize,
    pub retention_days: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 30_000,
            max_delay_ms: 300_000,
            backoff_multiplier: 2.0,
            jitter_max_ms: 5_000,
            retry_interval_ms: 60_000,
            batch_size: 10,
            retention_days: 7,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
            jitter_max: Duration::from_millis(self.jitter_max_ms),
        }
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Process configuration, loaded from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub moderation_api_url: String,
    pub base_upload_path: PathBuf,
    /// Shared secret for verifying inbound callback signatures. Optional;
    /// when unset, signature verification is skipped.
    pub webhook_secret: Option<String>,
    /// Static key guarding the admin routes. Optional.
    pub api_key: Option<String>,
    pub webhook_timeout: Duration,
    pub retry: RetrySettings,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{name} is invalid: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load from OS env; `.env` is loaded by `main` before calling this.
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is missing")?;

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("PORT", 8080)?;

        let moderation_api_url = std::env::var("MODERATION_API_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5000".to_string());
        let base_upload_path =
            PathBuf::from(std::env::var("BASE_UPLOAD_PATH").unwrap_or_else(|_| "uploads".to_string()));

        let retry = RetrySettings {
            max_retries: env_parse("MAX_RETRIES", 5)?,
            initial_delay_ms: env_parse("INITIAL_DELAY_MS", 30_000)?,
            max_delay_ms: env_parse("MAX_DELAY_MS", 300_000)?,
            backoff_multiplier: env_parse("BACKOFF_MULTIPLIER", 2.0)?,
            jitter_max_ms: env_parse("JITTER_MAX_MS", 5_000)?,
            retry_interval_ms: env_parse("RETRY_INTERVAL_MS", 60_000)?,
            batch_size: env_parse("BATCH_SIZE", 10)?,
            retention_days: env_parse("RETENTION_DAYS", 7)?,
        };

        Ok(Self {
            database_url,
            host,
            port,
            moderation_api_url,
            base_upload_path,
            webhook_secret: env_optional("WEBHOOK_SECRET"),
            api_key: env_optional("API_KEY"),
            webhook_timeout: Duration::from_millis(env_parse("WEBHOOK_TIMEOUT_MS", 30_000)?),
            retry,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
