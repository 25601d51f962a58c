//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database URL is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::db::DEFAULT_MAX_CONNECTIONS;
use crate::error::{Error, Result};
use crate::log::DEFAULT_MAX_RECENT;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub max_connections: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Upper bound applied to `EventLog::recent`.
    pub max_recent: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            max_connections: positive_var("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_recent: positive_var("EVENT_LOG_MAX_RECENT")?.unwrap_or(DEFAULT_MAX_RECENT),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn positive_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let Ok(raw) = std::env::var(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(n) if n > T::default() => Ok(Some(n)),
        _ => Err(Error::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}
