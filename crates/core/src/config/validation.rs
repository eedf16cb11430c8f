//! Configuration validation rules.
//!
//! Checks applied to `AppConfig` after it has been loaded from environment,
//! files, or defaults.

use crate::config::{AppConfig, DatabaseBackend};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

/// Largest result count the list endpoints accept.
pub const MAX_LIST_COUNT: usize = 1000;

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `api_url` is not an http(s) URL
    /// - a count, capacity or batch size is 0
    /// - `apps_count` or `dev_apps_count` exceeds [`MAX_LIST_COUNT`]
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `fresh_start` and `require_snapshot` are both set
    /// - the selected database backend lacks its connection settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(invalid("api_url", "must start with http:// or https://"));
        }

        for (field, value) in [
            ("keys_count", self.keys_count),
            ("apps_count", self.apps_count),
            ("dev_apps_count", self.dev_apps_count),
            ("channel_capacity", self.channel_capacity),
            ("batch_size", self.batch_size),
            ("max_in_flight", self.max_in_flight),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        for (field, value) in [("apps_count", self.apps_count), ("dev_apps_count", self.dev_apps_count)] {
            if value > MAX_LIST_COUNT {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: format!("must not exceed {MAX_LIST_COUNT}"),
                });
            }
        }

        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.fresh_start && self.require_snapshot {
            return Err(invalid("require_snapshot", "cannot be combined with fresh_start"));
        }

        match self.database.backend {
            DatabaseBackend::Sqlite if self.database.path.as_os_str().is_empty() => {
                return Err(invalid("database.path", "must not be empty for the sqlite backend"));
            }
            DatabaseBackend::Clickhouse if self.database.url.is_empty() || self.database.table.is_empty() => {
                return Err(invalid("database.url", "url and table are required for the clickhouse backend"));
            }
            _ => {}
        }

        if self.batch_size > self.channel_capacity * 100 {
            tracing::warn!(
                batch_size = self.batch_size,
                channel_capacity = self.channel_capacity,
                "batch_size is much larger than channel_capacity; batches will fill slowly"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_api_url_scheme() {
        let config = AppConfig { api_url: "ftp://example.com".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "api_url"));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let config = AppConfig { batch_size: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "batch_size"));
    }

    #[test]
    fn test_validate_zero_channel_capacity() {
        let config = AppConfig { channel_capacity: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "channel_capacity"));
    }

    #[test]
    fn test_validate_list_count_ceiling() {
        let config = AppConfig { apps_count: 5000, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "apps_count"));

        let config = AppConfig { dev_apps_count: MAX_LIST_COUNT + 1, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "dev_apps_count"));

        let config = AppConfig { apps_count: MAX_LIST_COUNT, dev_apps_count: MAX_LIST_COUNT, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 100, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_snapshot_policies_conflict() {
        let config = AppConfig { fresh_start: true, require_snapshot: true, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "require_snapshot"));
    }

    #[test]
    fn test_validate_clickhouse_requires_url() {
        let mut config = AppConfig::default();
        config.database.backend = DatabaseBackend::Clickhouse;
        config.database.url = String::new();
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "database.url"));
    }
}
