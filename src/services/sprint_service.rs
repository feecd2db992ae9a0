//! Sprint lifecycle: PLANNING -> ACTIVE -> CLOSED.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::activity_recorder::ActivityRecorder;
use super::actor_registry::ActorRegistry;
use super::retry::RetryPolicy;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ActivityCategory, ActivityRecord, Sprint, SprintStatus};
use crate::domain::ports::SprintRepository;

#[derive(Clone)]
pub struct SprintService {
    repository: Arc<dyn SprintRepository>,
    actors: ActorRegistry,
    recorder: ActivityRecorder,
    retry: RetryPolicy,
}

impl SprintService {
    pub fn new(
        repository: Arc<dyn SprintRepository>,
        actors: ActorRegistry,
        recorder: ActivityRecorder,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            actors,
            recorder,
            retry,
        }
    }

    #[instrument(skip(self, goal))]
    pub async fn create(
        &self,
        owner: &str,
        goal: &str,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> DomainResult<Sprint> {
        let sprint = Sprint::new(owner, goal, starts_at, ends_at);
        sprint.validate().map_err(DomainError::ValidationFailed)?;
        self.actors.require(owner).await?;

        self.retry
            .execute("sprint.insert", || self.repository.insert(&sprint))
            .await?;
        self.recorder
            .record(
                ActivityRecord::new(owner, ActivityCategory::SprintChanged, format!("Created sprint {}", sprint.id))
                    .with_output(serde_json::json!({
                        "sprint_id": sprint.id,
                        "goal": sprint.goal,
                        "starts_at": sprint.starts_at,
                        "ends_at": sprint.ends_at,
                    })),
            )
            .await?;
        info!(sprint_id = %sprint.id, "Sprint created");
        Ok(sprint)
    }

    pub async fn activate(&self, id: Uuid, actor_id: &str) -> DomainResult<Sprint> {
        self.transition(id, SprintStatus::Active, actor_id).await
    }

    pub async fn close(&self, id: Uuid, actor_id: &str) -> DomainResult<Sprint> {
        self.transition(id, SprintStatus::Closed, actor_id).await
    }

    #[instrument(skip(self))]
    async fn transition(&self, id: Uuid, to: SprintStatus, actor_id: &str) -> DomainResult<Sprint> {
        self.actors.require(actor_id).await?;
        let sprint = self.require(id).await?;
        if !sprint.status.can_transition_to(to) {
            return Err(DomainError::InvalidSprintTransition {
                sprint_id: id,
                from: sprint.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let applied = self
            .retry
            .execute("sprint.transition", || self.repository.transition(id, sprint.status, to))
            .await?;
        if !applied {
            return Err(DomainError::ConcurrencyConflict {
                entity: "sprint".to_string(),
                id: id.to_string(),
            });
        }

        self.recorder
            .record(ActivityRecord::new(
                actor_id,
                ActivityCategory::SprintChanged,
                format!("Sprint {id} {} -> {}", sprint.status.as_str(), to.as_str()),
            ))
            .await?;
        info!(sprint_id = %id, status = to.as_str(), "Sprint transitioned");
        self.require(id).await
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Option<Sprint>> {
        self.retry
            .execute("sprint.get", || self.repository.get(id))
            .await
    }

    pub async fn require(&self, id: Uuid) -> DomainResult<Sprint> {
        self.get(id).await?.ok_or(DomainError::SprintNotFound(id))
    }

    pub async fn list(&self, status: Option<SprintStatus>) -> DomainResult<Vec<Sprint>> {
        self.retry
            .execute("sprint.list", || self.repository.list(status))
            .await
    }
}
