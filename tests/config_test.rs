use std::env;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use dbpool::PoolOptions;

/// Test loading configuration from a YAML file
#[test]
fn test_load_yaml_config() {
    let yaml = r#"
connection:
  host: db-1.example.com:27017
  user: app
  password: secret
  database: orders

pool:
  pool_size: 10
  fail_rate: 0.25
  universe: 16
  timeout_ms: 1000
  regenerate_secs: 5
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = dbpool::config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.connection.host, "db-1.example.com:27017");
    assert_eq!(config.connection.user, "app");
    assert_eq!(config.connection.password, "secret");
    assert_eq!(config.connection.database, "orders");

    assert_eq!(config.pool.pool_size, 10);
    assert_eq!(config.pool.fail_rate, 0.25);
    assert_eq!(config.pool.universe, 16);
    assert_eq!(config.pool.timeout_ms, 1000);
    assert_eq!(config.pool.regenerate_secs, 5);
}

/// Test default values for a minimal file
#[test]
fn test_default_values() {
    let yaml = r#"
connection:
  host: db.example.com
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = dbpool::config::load_from_yaml(&config_path).unwrap();

    assert_eq!(config.connection.host, "db.example.com");
    assert_eq!(config.connection.user, "");
    assert_eq!(config.connection.password, "");
    assert_eq!(config.connection.database, "");

    assert_eq!(config.pool.pool_size, 5);
    assert_eq!(config.pool.fail_rate, 0.5);
    assert_eq!(config.pool.universe, 0);
    assert_eq!(config.pool.timeout_ms, 0);
    assert_eq!(config.pool.regenerate_secs, 3);
}

/// Test loading configuration from environment variables
#[test]
fn test_load_env_config() {
    // Save original env vars
    let orig_host = env::var("DB_HOST").ok();
    let orig_user = env::var("DB_USER").ok();
    let orig_pass = env::var("DB_PASS").ok();
    let orig_name = env::var("DB_NAME").ok();
    let orig_size = env::var("DB_POOL_SIZE").ok();
    let orig_rate = env::var("DB_FAIL_RATE").ok();

    // Set test env vars
    env::set_var("DB_HOST", "env-db.test:27017");
    env::set_var("DB_USER", "env_user");
    env::set_var("DB_PASS", "env_pass");
    env::set_var("DB_NAME", "env_db");
    env::set_var("DB_POOL_SIZE", "7");
    env::set_var("DB_FAIL_RATE", "0.4");

    let config = dbpool::config::load_from_env().unwrap();

    assert_eq!(config.connection.host, "env-db.test:27017");
    assert_eq!(config.connection.user, "env_user");
    assert_eq!(config.connection.password, "env_pass");
    assert_eq!(config.connection.database, "env_db");
    assert_eq!(config.pool.pool_size, 7);
    assert_eq!(config.pool.fail_rate, 0.4);
    // Untouched settings keep their defaults
    assert_eq!(config.pool.regenerate_secs, 3);

    // Restore original env vars
    cleanup_env("DB_HOST", orig_host);
    cleanup_env("DB_USER", orig_user);
    cleanup_env("DB_PASS", orig_pass);
    cleanup_env("DB_NAME", orig_name);
    cleanup_env("DB_POOL_SIZE", orig_size);
    cleanup_env("DB_FAIL_RATE", orig_rate);
}

/// Out-of-range settings are normalized at option construction, not rejected
#[test]
fn test_options_from_config_are_clamped() {
    let yaml = r#"
connection:
  host: db.example.com

pool:
  pool_size: -1
  fail_rate: 2.5
  universe: 2
  timeout_ms: -50
  regenerate_secs: 0
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = dbpool::config::load_from_yaml(&config_path).unwrap();
    let opts = PoolOptions::from_config(&config).normalized();

    assert_eq!(opts.pool_size, 5);
    assert_eq!(opts.fail_rate, 1.0);
    assert_eq!(opts.universe, 5);
    assert_eq!(opts.timeout, Duration::ZERO);
    assert_eq!(opts.regenerate, Duration::from_secs(3));
}

/// Helper function to cleanup environment variables
fn cleanup_env(key: &str, orig_val: Option<String>) {
    match orig_val {
        Some(val) => env::set_var(key, val),
        None => env::remove_var(key),
    }
}
