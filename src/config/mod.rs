use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Connection target and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host (host or host:port)
    pub host: String,

    /// User for authentication
    #[serde(default)]
    pub user: String,

    /// Password for authentication
    #[serde(default)]
    pub password: String,

    /// Database name to select
    #[serde(default)]
    pub database: String,
}

/// Pool and breaker tuning knobs
///
/// Values here are raw: out-of-range entries are clamped or defaulted when
/// the pool options are normalized, never rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool capacity (default: 5)
    #[serde(default = "default_pool_size")]
    pub pool_size: i64,

    /// Failure ratio in [0, 1] at which the breaker trips (default: 0.5)
    #[serde(default = "default_fail_rate")]
    pub fail_rate: f64,

    /// Breaker sample window; raised to at least pool_size
    #[serde(default)]
    pub universe: i64,

    /// Per-call timeout in milliseconds; 0 applies no deadline
    #[serde(default)]
    pub timeout_ms: i64,

    /// Minimum seconds between regeneration attempts (default: 3)
    #[serde(default = "default_regenerate_secs")]
    pub regenerate_secs: i64,
}

fn default_pool_size() -> i64 {
    5
}

fn default_fail_rate() -> f64 {
    0.5
}

fn default_regenerate_secs() -> i64 {
    3
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            fail_rate: default_fail_rate(),
            universe: 0,
            timeout_ms: 0,
            regenerate_secs: default_regenerate_secs(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection target and credentials
    pub connection: ConnectionConfig,

    /// Pool and breaker settings
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// Recognized variables:
/// - DB_HOST (required)
/// - DB_USER, DB_PASS, DB_NAME (optional, default empty)
/// - DB_POOL_SIZE, DB_FAIL_RATE, DB_UNIVERSE, DB_TIMEOUT_MS,
///   DB_REGENERATE_SECS (optional, fall back to the serde defaults)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let host = std::env::var("DB_HOST").context("DB_HOST environment variable not set")?;
    let user = std::env::var("DB_USER").unwrap_or_default();
    let password = std::env::var("DB_PASS").unwrap_or_default();
    let database = std::env::var("DB_NAME").unwrap_or_default();

    let mut pool = PoolConfig::default();

    if let Ok(size) = std::env::var("DB_POOL_SIZE") {
        if let Ok(val) = size.parse() {
            pool.pool_size = val;
        }
    }

    if let Ok(rate) = std::env::var("DB_FAIL_RATE") {
        if let Ok(val) = rate.parse() {
            pool.fail_rate = val;
        }
    }

    if let Ok(universe) = std::env::var("DB_UNIVERSE") {
        if let Ok(val) = universe.parse() {
            pool.universe = val;
        }
    }

    if let Ok(timeout) = std::env::var("DB_TIMEOUT_MS") {
        if let Ok(val) = timeout.parse() {
            pool.timeout_ms = val;
        }
    }

    if let Ok(regenerate) = std::env::var("DB_REGENERATE_SECS") {
        if let Ok(val) = regenerate.parse() {
            pool.regenerate_secs = val;
        }
    }

    Ok(Config {
        connection: ConnectionConfig {
            host,
            user,
            password,
            database,
        },
        pool,
    })
}

/// Load configuration from file or environment
///
/// Tries the YAML file when a path is given, otherwise falls back to
/// environment variables.
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        load_from_yaml(path)
    } else {
        load_from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
connection:
  host: db-1.example.com:27017
  user: app
  password: secret
  database: orders

pool:
  pool_size: 10
  fail_rate: 0.25
  universe: 12
  timeout_ms: 1000
  regenerate_secs: 5
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.connection.host, "db-1.example.com:27017");
        assert_eq!(config.connection.user, "app");
        assert_eq!(config.connection.database, "orders");

        assert_eq!(config.pool.pool_size, 10);
        assert_eq!(config.pool.fail_rate, 0.25);
        assert_eq!(config.pool.universe, 12);
        assert_eq!(config.pool.timeout_ms, 1000);
        assert_eq!(config.pool.regenerate_secs, 5);
    }

    #[test]
    fn test_default_values() {
        let yaml = r#"
connection:
  host: db.example.com
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.connection.user, "");
        assert_eq!(config.connection.database, "");

        // Should use default pool settings
        assert_eq!(config.pool.pool_size, 5);
        assert_eq!(config.pool.fail_rate, 0.5);
        assert_eq!(config.pool.universe, 0);
        assert_eq!(config.pool.timeout_ms, 0);
        assert_eq!(config.pool.regenerate_secs, 3);
    }
}
