//! Common test utilities for integration tests
//!
//! Provides shared fixtures used across multiple integration test files.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use foreman::adapters::sqlite::{create_migrated_test_pool, initialize_database, PoolConfig};
use foreman::application::Foreman;
use foreman::domain::models::{Actor, Config};
use foreman::domain::ports::{EmbeddingProvider, NullEmbeddingProvider};
use foreman::domain::DomainResult;

/// Foreman over a fresh in-memory database, without embeddings.
pub async fn foreman() -> Foreman {
    foreman_with(Config::default(), Arc::new(NullEmbeddingProvider::new())).await
}

pub async fn foreman_with(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Foreman {
    let pool = create_migrated_test_pool()
        .await
        .expect("Failed to create test pool");
    Foreman::assemble(pool, config, embedder)
        .await
        .expect("Failed to assemble foreman")
}

/// Foreman over a file database in `dir` with a multi-connection pool, for
/// tests where writers must really race.
pub async fn file_foreman(dir: &TempDir) -> Foreman {
    let url = format!("sqlite:{}", dir.path().join("foreman.db").display());
    let pool = initialize_database(
        &url,
        Some(PoolConfig {
            max_connections: 8,
            ..PoolConfig::default()
        }),
    )
    .await
    .expect("Failed to open file database");

    let mut config = Config::default();
    config.retry.max_attempts = 10;
    config.retry.initial_backoff_ms = 5;
    config.retry.max_backoff_ms = 100;
    Foreman::assemble(pool, config, Arc::new(NullEmbeddingProvider::new()))
        .await
        .expect("Failed to assemble foreman")
}

pub async fn register(foreman: &Foreman, id: &str, role: &str, capabilities: &[&str]) -> Actor {
    let actor = capabilities
        .iter()
        .fold(Actor::new(id, role), |actor, cap| actor.with_capability(*cap));
    foreman
        .actors
        .register(actor)
        .await
        .expect("Failed to register actor")
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Deterministic embedder: one dimension per keyword, counting occurrences.
pub struct KeywordEmbedder {
    keywords: Vec<&'static str>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&'static str]) -> Self {
        Self {
            keywords: keywords.to_vec(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn dimension(&self) -> usize {
        self.keywords.len()
    }

    async fn embed(&self, text: &str) -> DomainResult<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(self
            .keywords
            .iter()
            .map(|keyword| lower.matches(keyword).count() as f32)
            .collect())
    }
}
