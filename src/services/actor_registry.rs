//! Actor registration and lifecycle.

use std::sync::Arc;
use tracing::{info, instrument};

use super::activity_recorder::ActivityRecorder;
use super::retry::RetryPolicy;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ActivityCategory, ActivityRecord, Actor, CapabilitySet, SYSTEM_ACTOR_ID};
use crate::domain::ports::{ActorFilter, ActorRepository};

#[derive(Clone)]
pub struct ActorRegistry {
    repository: Arc<dyn ActorRepository>,
    recorder: ActivityRecorder,
    retry: RetryPolicy,
}

impl ActorRegistry {
    pub fn new(
        repository: Arc<dyn ActorRepository>,
        recorder: ActivityRecorder,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            recorder,
            retry,
        }
    }

    /// Register the built-in orchestrator actor if it is missing.
    pub async fn ensure_system_actor(&self) -> DomainResult<Actor> {
        if let Some(actor) = self.get(SYSTEM_ACTOR_ID).await? {
            return Ok(actor);
        }
        match self.register(Actor::system()).await {
            Ok(actor) => Ok(actor),
            // Another instance registered it first.
            Err(DomainError::Duplicate { .. }) => self.require(SYSTEM_ACTOR_ID).await,
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, actor), fields(actor_id = %actor.id, role = %actor.role))]
    pub async fn register(&self, actor: Actor) -> DomainResult<Actor> {
        actor.validate().map_err(DomainError::ValidationFailed)?;
        self.retry
            .execute("actor.insert", || self.repository.insert(&actor))
            .await?;

        self.recorder
            .record(
                ActivityRecord::new(
                    actor.id.clone(),
                    ActivityCategory::ActorRegistered,
                    format!("Registered actor {} as {}", actor.id, actor.role),
                )
                .with_output(serde_json::json!({
                    "capabilities": actor.capabilities,
                })),
            )
            .await?;
        info!("Actor registered");
        Ok(actor)
    }

    /// Mark an actor inactive. Its history stays; it receives no new
    /// assignments.
    #[instrument(skip(self))]
    pub async fn deactivate(&self, actor_id: &str) -> DomainResult<Actor> {
        let mut actor = self.require(actor_id).await?;
        if actor.is_system() {
            return Err(DomainError::ValidationFailed(
                "The orchestrator actor cannot be deactivated".to_string(),
            ));
        }
        if !actor.active {
            return Ok(actor);
        }

        actor.deactivate();
        self.retry
            .execute("actor.update", || self.repository.update(&actor))
            .await?;
        self.recorder
            .record(ActivityRecord::new(
                actor_id,
                ActivityCategory::ActorUpdated,
                format!("Deactivated actor {actor_id}"),
            ))
            .await?;
        info!("Actor deactivated");
        Ok(actor)
    }

    #[instrument(skip(self, capabilities))]
    pub async fn update_capabilities(
        &self,
        actor_id: &str,
        capabilities: CapabilitySet,
    ) -> DomainResult<Actor> {
        let mut actor = self.require(actor_id).await?;
        let before = actor.capabilities.clone();
        actor.capabilities = capabilities;
        actor.updated_at = chrono::Utc::now();

        self.retry
            .execute("actor.update", || self.repository.update(&actor))
            .await?;
        self.recorder
            .record(
                ActivityRecord::new(
                    actor_id,
                    ActivityCategory::ActorUpdated,
                    format!("Updated capabilities of {actor_id}"),
                )
                .with_input(serde_json::json!({ "before": before }))
                .with_output(serde_json::json!({ "after": actor.capabilities })),
            )
            .await?;
        Ok(actor)
    }

    pub async fn get(&self, actor_id: &str) -> DomainResult<Option<Actor>> {
        self.retry
            .execute("actor.get", || self.repository.get(actor_id))
            .await
    }

    /// Like `get`, but a missing actor is an error.
    pub async fn require(&self, actor_id: &str) -> DomainResult<Actor> {
        self.get(actor_id)
            .await?
            .ok_or_else(|| DomainError::ActorNotFound(actor_id.to_string()))
    }

    pub async fn list(&self, filter: ActorFilter) -> DomainResult<Vec<Actor>> {
        self.retry
            .execute("actor.list", || self.repository.list(filter.clone()))
            .await
    }
}
