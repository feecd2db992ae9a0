//! Task repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ActivityRecord, Message, Task, TaskStatus};

/// Filters for querying tasks.
#[derive(Default, Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub sprint_id: Option<Uuid>,
    pub assignee: Option<String>,
    pub quarantined: Option<bool>,
    pub limit: Option<u32>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_sprint(mut self, sprint_id: Uuid) -> Self {
        self.sprint_id = Some(sprint_id);
        self
    }
}

/// Side effects that commit or roll back together with a task update.
#[derive(Default, Debug, Clone)]
pub struct TaskOutbox {
    /// Audit entries for the transition.
    pub records: Vec<ActivityRecord>,
    /// Stored with the same clamping and idempotency rules as a send.
    pub messages: Vec<Message>,
}

impl TaskOutbox {
    /// Queue an audit entry.
    pub fn record(&mut self, record: ActivityRecord) {
        self.records.push(record);
    }

    /// Queue a notification.
    pub fn message(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Repository port for task persistence.
///
/// Every mutation after creation goes through [`TaskRepository::compare_and_swap`].
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task together with its dependency edges.
    async fn insert(&self, task: &Task) -> DomainResult<()>;

    /// Insert several tasks atomically. Either all rows land or none do.
    async fn insert_batch(&self, tasks: &[Task]) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Load several tasks. Missing ids are silently absent from the result.
    async fn get_many(&self, ids: &[Uuid]) -> DomainResult<Vec<Task>>;

    async fn get_by_idempotency_key(&self, key: &str) -> DomainResult<Option<Task>>;

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// Replace the stored row with `updated` only if the stored version,
    /// status and assignee still equal those of `expected`.
    ///
    /// Returns `false` when the guard did not match (someone else won).
    async fn compare_and_swap(&self, expected: &Task, updated: &Task) -> DomainResult<bool> {
        Ok(self
            .commit_transition(expected, updated, &TaskOutbox::default())
            .await?
            .is_some())
    }

    /// `compare_and_swap` with the outbox written in the same transaction.
    ///
    /// Returns the stored messages on success and `None` when the guard did
    /// not match, in which case nothing from the outbox was written either.
    async fn commit_transition(
        &self,
        expected: &Task,
        updated: &Task,
        outbox: &TaskOutbox,
    ) -> DomainResult<Option<Vec<Message>>>;

    /// Set or clear the quarantine flag regardless of version.
    async fn set_quarantined(&self, id: Uuid, quarantined: bool) -> DomainResult<()>;

    /// Ids of tasks that depend on `task_id`.
    async fn get_dependents(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>>;

    /// Every `(task, depends_on)` edge in the store.
    async fn dependency_edges(&self) -> DomainResult<Vec<(Uuid, Uuid)>>;

    /// Non-quarantined tasks in `ASSIGNED`/`IN_PROGRESS` whose last status
    /// change is older than `before`.
    async fn list_stalled(&self, before: DateTime<Utc>) -> DomainResult<Vec<Task>>;
}
