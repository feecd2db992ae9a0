//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment: serialized defaults, the
//! project YAML files, then `FOREMAN_*` environment overrides.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader, CONFIG_DIR, ENV_PREFIX};
