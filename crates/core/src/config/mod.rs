//! Application configuration with layered loading.
//!
//! Sources, highest precedence first:
//!
//! 1. Environment variables (APPSCOUT_*, nested with `__`)
//! 2. TOML config file (if APPSCOUT_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::{ConfigError, MAX_LIST_COUNT};

/// Crawler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the metadata service.
    ///
    /// Set via APPSCOUT_API_URL environment variable.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Credential sent in the `Authorization` header.
    ///
    /// Set via APPSCOUT_API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Interface language passed to the service.
    #[serde(default = "default_hl")]
    pub hl: String,

    /// Store country passed to the service.
    #[serde(default = "default_gl")]
    pub gl: String,

    /// Keywords kept per extraction.
    #[serde(default = "default_keys_count")]
    pub keys_count: usize,

    /// Results requested per keyword search.
    #[serde(default = "default_apps_count")]
    pub apps_count: usize,

    /// Results requested per owner lookup.
    #[serde(default = "default_dev_apps_count")]
    pub dev_apps_count: usize,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Minimum spacing between outgoing requests in milliseconds.
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Newline-separated seed bundle identifiers.
    #[serde(default = "default_seed_path")]
    pub seed_path: PathBuf,

    /// Snapshot file for the resumable store.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Discard any previous snapshot on startup.
    #[serde(default)]
    pub fresh_start: bool,

    /// Refuse to start without an existing snapshot.
    #[serde(default)]
    pub require_snapshot: bool,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Records per repository batch insert.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent owner expansions.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Wait before polling an empty keyword cursor again.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Wait after an unexpected cursor error.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Time in-flight fetches get to finish once a stop is requested.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Upper bound on waiting for workers to acknowledge a stop.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Where scraped records are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    /// Local SQLite file.
    #[default]
    Sqlite,
    /// ClickHouse over its HTTP interface.
    Clickhouse,
}

/// Repository settings. `path` is used by SQLite, the rest by ClickHouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,

    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_db_url")]
    pub url: String,

    #[serde(default = "default_db_name")]
    pub name: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_db_table")]
    pub table: String,
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_hl() -> String {
    "en".into()
}

fn default_gl() -> String {
    "us".into()
}

fn default_keys_count() -> usize {
    10
}

fn default_apps_count() -> usize {
    250
}

fn default_dev_apps_count() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_request_interval_ms() -> u64 {
    0
}

fn default_user_agent() -> String {
    "appscout/0.1".into()
}

fn default_seed_path() -> PathBuf {
    PathBuf::from("./bundles.txt")
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./cache.json")
}

fn default_channel_capacity() -> usize {
    15
}

fn default_batch_size() -> usize {
    50
}

fn default_max_in_flight() -> usize {
    8
}

fn default_idle_poll_ms() -> u64 {
    1_000
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_shutdown_grace_ms() -> u64 {
    3_000
}

fn default_stop_timeout_ms() -> u64 {
    60_000
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./appscout.sqlite")
}

fn default_db_url() -> String {
    "http://127.0.0.1:8123".into()
}

fn default_db_name() -> String {
    "default".into()
}

fn default_db_user() -> String {
    "default".into()
}

fn default_db_table() -> String {
    "apps".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            path: default_db_path(),
            url: default_db_url(),
            name: default_db_name(),
            user: default_db_user(),
            password: String::new(),
            table: default_db_table(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            hl: default_hl(),
            gl: default_gl(),
            keys_count: default_keys_count(),
            apps_count: default_apps_count(),
            dev_apps_count: default_dev_apps_count(),
            timeout_ms: default_timeout_ms(),
            request_interval_ms: default_request_interval_ms(),
            user_agent: default_user_agent(),
            seed_path: default_seed_path(),
            cache_path: default_cache_path(),
            fresh_start: false,
            require_snapshot: false,
            channel_capacity: default_channel_capacity(),
            batch_size: default_batch_size(),
            max_in_flight: default_max_in_flight(),
            idle_poll_ms: default_idle_poll_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            database: DatabaseConfig::default(),
        }
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("APPSCOUT_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("APPSCOUT_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// The API credential, checked when the client is built.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no key is configured.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| ConfigError::Missing {
            field: "api_key".into(),
            hint: "Set APPSCOUT_API_KEY environment variable".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.keys_count, 10);
        assert_eq!(config.apps_count, 250);
        assert_eq!(config.channel_capacity, 15);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.shutdown_grace_ms, 3_000);
        assert_eq!(config.cache_path, PathBuf::from("./cache.json"));
        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
        assert_eq!(config.database.table, "apps");
        assert!(!config.fresh_start);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_require_api_key_missing() {
        let config = AppConfig::default();
        assert!(matches!(config.require_api_key(), Err(ConfigError::Missing { .. })));

        let config = AppConfig { api_key: Some(String::new()), ..Default::default() };
        assert!(matches!(config.require_api_key(), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_require_api_key_present() {
        let config = AppConfig { api_key: Some("test-key".into()), ..Default::default() };
        assert_eq!(config.require_api_key().unwrap(), "test-key");
    }

    #[test]
    fn test_layered_loading() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "appscout.toml",
                r#"
                hl = "de"
                batch_size = 20

                [database]
                backend = "clickhouse"
                name = "stores"
                "#,
            )?;
            jail.set_env("APPSCOUT_CONFIG_FILE", "appscout.toml");
            jail.set_env("APPSCOUT_BATCH_SIZE", "25");
            jail.set_env("APPSCOUT_DATABASE__TABLE", "apps_v2");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.hl, "de");
            assert_eq!(config.batch_size, 25);
            assert_eq!(config.database.backend, DatabaseBackend::Clickhouse);
            assert_eq!(config.database.name, "stores");
            assert_eq!(config.database.table, "apps_v2");
            assert_eq!(config.gl, "us");
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("APPSCOUT_BATCH_SIZE", "0");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid { .. })));
            Ok(())
        });
    }
}
