//! Composition root: every service wired over one SQLite pool.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use crate::adapters::embeddings::provider_from_config;
use crate::adapters::sqlite::{
    initialize_database, PoolConfig, SqliteActivityRepository, SqliteActorRepository,
    SqliteMemoryRepository, SqliteMessageRepository, SqliteSprintRepository,
    SqliteTaskRepository,
};
use crate::domain::errors::DomainResult;
use crate::domain::models::Config;
use crate::domain::ports::EmbeddingProvider;
use crate::services::{
    ActivityRecorder, ActorRegistry, MemoryIndex, MessageProtocol, RetryPolicy, SprintService,
    TaskOrchestrator,
};

#[derive(Clone)]
pub struct Foreman {
    pub pool: SqlitePool,
    pub config: Config,
    pub recorder: ActivityRecorder,
    pub actors: ActorRegistry,
    pub sprints: SprintService,
    pub messages: MessageProtocol,
    pub memory: MemoryIndex,
    pub orchestrator: TaskOrchestrator,
}

impl Foreman {
    /// Open the configured database, apply migrations and wire services.
    pub async fn open(config: Config) -> Result<Self> {
        let url = format!("sqlite:{}", config.database.path);
        let pool_config = PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        };
        let pool = initialize_database(&url, Some(pool_config))
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        let embedder = provider_from_config(&config.embeddings)
            .context("Failed to configure embedding provider")?;
        let foreman = Self::assemble(pool, config, embedder).await?;
        info!(
            database = %foreman.config.database.path,
            embeddings = foreman.memory.embeddings_enabled(),
            "Foreman ready"
        );
        Ok(foreman)
    }

    /// Wire services over an already-migrated pool and make sure the
    /// orchestrator's own actor exists.
    pub async fn assemble(
        pool: SqlitePool,
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> DomainResult<Self> {
        let retry = RetryPolicy::from(&config.retry);

        let recorder = ActivityRecorder::new(
            Arc::new(SqliteActivityRepository::new(pool.clone())),
            retry.clone(),
        );
        let actors = ActorRegistry::new(
            Arc::new(SqliteActorRepository::new(pool.clone())),
            recorder.clone(),
            retry.clone(),
        );
        let sprints = SprintService::new(
            Arc::new(SqliteSprintRepository::new(pool.clone())),
            actors.clone(),
            recorder.clone(),
            retry.clone(),
        );
        let memory = MemoryIndex::new(
            Arc::new(SqliteMemoryRepository::new(pool.clone())),
            embedder,
            config.memory.clone(),
            retry.clone(),
        );

        let mut messages = MessageProtocol::new(
            Arc::new(SqliteMessageRepository::new(pool.clone())),
            actors.clone(),
            recorder.clone(),
            retry.clone(),
        );
        if config.memory.embed_messages && memory.embeddings_enabled() {
            messages = messages.with_embeddings(memory.clone());
        }

        let orchestrator = TaskOrchestrator::new(
            Arc::new(SqliteTaskRepository::new(pool.clone())),
            actors.clone(),
            sprints.clone(),
            messages.clone(),
            recorder.clone(),
            config.orchestrator.clone(),
            retry,
        );

        actors.ensure_system_actor().await?;

        Ok(Self {
            pool,
            config,
            recorder,
            actors,
            sprints,
            messages,
            memory,
            orchestrator,
        })
    }
}
