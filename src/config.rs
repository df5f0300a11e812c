//! Server configuration from the environment.
//!
//! `.env` is loaded by `main` before [`ServerConfig::from_env`] runs, so every
//! value here may come from either the process environment or that file.
//! Unset or unparsable values fall back to their defaults.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
const DEFAULT_WS_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// `None` runs memory-only: nothing survives a restart.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Debounce between background chunk flushes.
    pub flush_interval_ms: u64,
    /// Per-connection outbound frame queue.
    pub ws_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            ws_channel_capacity: DEFAULT_WS_CHANNEL_CAPACITY,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            flush_interval_ms: env_parse("FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS),
            ws_channel_capacity: env_parse("WS_CHANNEL_CAPACITY", DEFAULT_WS_CHANNEL_CAPACITY).max(1),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    parse_or(std::env::var(key).ok().as_deref(), default)
}

fn parse_or<T>(raw: Option<&str>, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    raw.and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}
