use std::{env, net::SocketAddr, str::FromStr, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} is invalid: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("REQUEST_TIMEOUT_SECS ({request:?}) must exceed LOCK_TIMEOUT_SECS ({lock:?})")]
    RequestTimeoutTooShort { request: Duration, lock: Duration },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub webhook_secret: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    pub lock_timeout: Duration,
    pub max_event_attempts: i32,
    pub stale_event_after: Duration,
    pub reaper_interval: Duration,
    pub signature_tolerance_secs: i64,
    pub request_timeout: Duration,
}

impl Config {
    /// Read settings from the process environment (after `.env`, if any).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let config = Self {
            database_url: required("DATABASE_URL")?,
            webhook_secret: required("WEBHOOK_SECRET")?,
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            lock_timeout: Duration::from_secs(parse_or(&lookup, "LOCK_TIMEOUT_SECS", 5)?),
            max_event_attempts: parse_or(&lookup, "MAX_EVENT_ATTEMPTS", 5)?,
            stale_event_after: Duration::from_secs(parse_or(&lookup, "STALE_EVENT_SECS", 120)?),
            reaper_interval: Duration::from_secs(parse_or(&lookup, "REAPER_INTERVAL_SECS", 60)?),
            signature_tolerance_secs: parse_or(&lookup, "SIGNATURE_TOLERANCE_SECS", 300)?,
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 10)?),
        };

        // A request cut off mid-transaction leaves its event `processing`
        // until the reaper runs, so the lock wait must fit inside the request.
        if config.request_timeout <= config.lock_timeout {
            return Err(ConfigError::RequestTimeoutTooShort {
                request: config.request_timeout,
                lock: config.lock_timeout,
            });
        }
        Ok(config)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
