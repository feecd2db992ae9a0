use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{Config, EmbeddingProviderKind};

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".foreman";

/// Prefix for environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "FOREMAN_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),

    #[error("Invalid similarity threshold: {0}. Must be within [-1, 1]")]
    InvalidThreshold(f32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .foreman/config.yaml (project config, created by init)
    /// 3. .foreman/local.yaml (project local overrides, optional)
    /// 4. Environment variables (FOREMAN_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(CONFIG_DIR)
    }

    /// Same layering as [`ConfigLoader::load`] rooted at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let dir = dir.as_ref();
        let config: Config = Self::figment(dir)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", dir.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, without env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(dir: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Render the defaults as the YAML written by `foreman init`.
    pub fn default_yaml() -> Result<String> {
        serde_yaml::to_string(&Config::default()).context("Failed to serialize default config")
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.retry.max_attempts));
        }
        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }
        if config.retry.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry.operation_timeout_ms must be positive".to_string(),
            ));
        }

        if config.runtime.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(config.runtime.poll_interval_ms));
        }
        if config.runtime.message_batch == 0 {
            return Err(ConfigError::ValidationFailed(
                "runtime.message_batch must be at least 1".to_string(),
            ));
        }

        if !(-1.0..=1.0).contains(&config.memory.default_threshold) {
            return Err(ConfigError::InvalidThreshold(config.memory.default_threshold));
        }
        if config.memory.default_limit == 0 {
            return Err(ConfigError::ValidationFailed(
                "memory.default_limit must be at least 1".to_string(),
            ));
        }

        if config.embeddings.provider == EmbeddingProviderKind::Openai {
            if config.embeddings.model.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "embeddings.model cannot be empty".to_string(),
                ));
            }
            if config.embeddings.dimension == 0 {
                return Err(ConfigError::ValidationFailed(
                    "embeddings.dimension must be positive".to_string(),
                ));
            }
            if config.embeddings.requests_per_second == 0 {
                return Err(ConfigError::ValidationFailed(
                    "embeddings.requests_per_second must be positive".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".foreman/foreman.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.embeddings.provider, EmbeddingProviderKind::None);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: json
  retention_days: 7
runtime:
  poll_interval_ms: 200
embeddings:
  provider: openai
  dimension: 3
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.runtime.poll_interval_ms, 200);
        assert_eq!(config.runtime.jitter_ms, 250);
        assert_eq!(config.embeddings.provider, EmbeddingProviderKind::Openai);
        assert_eq!(config.embeddings.dimension, 3);
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogFormat(_)
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyDatabasePath
        ));
    }

    #[test]
    fn test_validate_retry_bounds() {
        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxAttempts(0)
        ));

        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30_000;
        config.retry.max_backoff_ms = 10_000;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBackoff(30_000, 10_000)
        ));
    }

    #[test]
    fn test_validate_threshold_range() {
        let mut config = Config::default();
        config.memory.default_threshold = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidThreshold(_)
        ));
    }

    #[test]
    fn test_validate_openai_requires_dimension() {
        let mut config = Config::default();
        config.embeddings.provider = EmbeddingProviderKind::Openai;
        config.embeddings.dimension = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ValidationFailed(_)
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "logging:\n  level: info\n  format: json\nruntime:\n  poll_interval_ms: 500\n",
        )
        .unwrap();
        fs::write(dir.path().join("local.yaml"), "logging:\n  level: debug\n").unwrap();

        let config = temp_env::with_vars_unset(
            ["FOREMAN_LOGGING__LEVEL", "FOREMAN_RUNTIME__POLL_INTERVAL_MS"],
            || ConfigLoader::load_from_dir(dir.path()).unwrap(),
        );
        assert_eq!(config.logging.level, "debug", "local.yaml should win");
        assert_eq!(config.logging.format, "json", "config.yaml value should persist");
        assert_eq!(config.runtime.poll_interval_ms, 500);
    }

    #[test]
    fn test_env_overrides_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "database:\n  path: from-file.db\nlogging:\n  level: warn\n",
        )
        .unwrap();

        let config = temp_env::with_vars(
            [
                ("FOREMAN_LOGGING__LEVEL", Some("trace")),
                ("FOREMAN_ORCHESTRATOR__STALL_THRESHOLD_SECS", Some("90")),
            ],
            || ConfigLoader::load_from_dir(dir.path()).unwrap(),
        );
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.orchestrator.stall_threshold_secs, 90);
        assert_eq!(config.database.path, "from-file.db");
    }

    #[test]
    fn test_invalid_env_value_rejected() {
        let dir = TempDir::new().unwrap();
        let result = temp_env::with_var("FOREMAN_LOGGING__FORMAT", Some("xml"), || {
            ConfigLoader::load_from_dir(dir.path())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_default_yaml_round_trips() {
        let yaml = ConfigLoader::default_yaml().unwrap();
        let config: Config = serde_yaml::from_str(&yaml).unwrap();
        ConfigLoader::validate(&config).unwrap();
    }
}
