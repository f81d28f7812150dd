use std::env;
use std::time::Duration;

use crate::error::ConfigError;
use crate::result_reporter::DeliveryMode;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_DB_URL: &str = "sqlite://quiz-state.sqlite3";

/// Runtime settings for the engine and its adapters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub api_url: String,
    pub db_url: String,
    pub tick_interval: Duration,
    pub delivery: DeliveryMode,
    pub http_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.into(),
            db_url: DEFAULT_DB_URL.into(),
            tick_interval: Duration::from_millis(1_000),
            delivery: DeliveryMode::Backend,
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Read `QUIZ_*` variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for values that do not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset or blank
    /// variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for values that do not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("QUIZ_API_URL") {
            config.api_url = url.trim().to_owned();
        }
        if let Some(url) = get("QUIZ_DB_URL") {
            config.db_url = url.trim().to_owned();
        }
        if let Some(raw) = get("QUIZ_TICK_MS") {
            let ms = parse_positive("QUIZ_TICK_MS", &raw)?;
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = get("QUIZ_DELIVERY") {
            config.delivery = raw.parse()?;
        }
        if let Some(raw) = get("QUIZ_HTTP_TIMEOUT_SECS") {
            let secs = parse_positive("QUIZ_HTTP_TIMEOUT_SECS", &raw)?;
            config.http_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_owned(),
        }),
    }
}
