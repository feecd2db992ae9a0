use serde::{Deserialize, Serialize};

/// Main configuration structure for Foreman
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Storage retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Actor runtime polling
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Orchestrator tuning
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Memory index defaults
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Embedding provider
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".foreman/foreman.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Retry policy for storage operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-attempt timeout in milliseconds
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    50
}

const fn default_max_backoff_ms() -> u64 {
    2_000
}

const fn default_operation_timeout_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

/// Actor runtime poll loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound of the uniform jitter added to each sleep
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Messages fetched per cycle
    #[serde(default = "default_message_batch")]
    pub message_batch: u32,
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_jitter_ms() -> u64 {
    250
}

const fn default_message_batch() -> u32 {
    50
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            jitter_ms: default_jitter_ms(),
            message_batch: default_message_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Seconds without a status change before a held task is stalled
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
}

const fn default_stall_threshold_secs() -> u64 {
    3_600
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stall_threshold_secs: default_stall_threshold_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MemoryConfig {
    #[serde(default = "default_similarity_threshold")]
    pub default_threshold: f32,

    #[serde(default = "default_search_limit")]
    pub default_limit: u32,

    /// Embed message bodies on send
    #[serde(default)]
    pub embed_messages: bool,
}

const fn default_similarity_threshold() -> f32 {
    0.7
}

const fn default_search_limit() -> u32 {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_similarity_threshold(),
            default_limit: default_search_limit(),
            embed_messages: false,
        }
    }
}

/// Embedding provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    None,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EmbeddingsConfig {
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProviderKind,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    /// Falls back to `OPENAI_API_KEY` when unset
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

const fn default_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::None
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

const fn default_dimension() -> usize {
    1536
}

const fn default_requests_per_second() -> u32 {
    5
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            base_url: default_embedding_base_url(),
            api_key: None,
            dimension: default_dimension(),
            requests_per_second: default_requests_per_second(),
        }
    }
}
