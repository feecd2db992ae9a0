//! Task lifecycle, exclusive assignment and stall detection.
//!
//! The orchestrator holds no task or sprint state between calls. Every
//! mutation is a compare-and-swap on the version, status and assignee read
//! just before, so concurrent orchestrators never overwrite each other.
//! The audit records and notifications of a transition travel in a
//! [`TaskOutbox`] and commit in the same transaction as the swap.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::activity_recorder::ActivityRecorder;
use super::actor_registry::ActorRegistry;
use super::dependency_resolver::DependencyResolver;
use super::message_protocol::MessageProtocol;
use super::retry::RetryPolicy;
use super::sprint_planner::{plan_sprint, PlanItem, SprintPlan};
use super::sprint_service::SprintService;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityCategory, ActivityRecord, Actor, Message, MessageIntent, OrchestratorConfig, Task,
    TaskSpec, TaskStatus, SYSTEM_ACTOR_ID,
};
use crate::domain::ports::{ActorFilter, TaskFilter, TaskOutbox, TaskRepository};

/// One stalled task found by `detect_stalled`.
#[derive(Debug, Clone, Serialize)]
pub struct StallReport {
    pub task: Task,
    /// The alert addressed to the sprint owner (or the orchestrator).
    pub alert: Message,
    /// False when an earlier scan already raised this alert.
    pub newly_alerted: bool,
    /// Active, capable actors that could take the task over.
    pub candidates: Vec<String>,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    tasks: Arc<dyn TaskRepository>,
    actors: ActorRegistry,
    sprints: SprintService,
    messages: MessageProtocol,
    recorder: ActivityRecorder,
    resolver: DependencyResolver,
    config: OrchestratorConfig,
    retry: RetryPolicy,
}

impl TaskOrchestrator {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        actors: ActorRegistry,
        sprints: SprintService,
        messages: MessageProtocol,
        recorder: ActivityRecorder,
        config: OrchestratorConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            tasks,
            actors,
            sprints,
            messages,
            recorder,
            resolver: DependencyResolver::new(),
            config,
            retry,
        }
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.config.stall_threshold_secs)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create one task in `BACKLOG`.
    pub async fn create_task(&self, spec: TaskSpec) -> DomainResult<Task> {
        let mut created = self.create_batch(vec![spec]).await?;
        created
            .pop()
            .ok_or_else(|| DomainError::ValidationFailed("No task created".to_string()))
    }

    /// Create several tasks whose dependencies may point at each other.
    ///
    /// The combined graph is checked for cycles before anything is written;
    /// the batch is inserted atomically. Specs whose idempotency key already
    /// exists resolve to the stored task.
    #[instrument(skip(self, specs), fields(count = specs.len()))]
    pub async fn create_batch(&self, specs: Vec<TaskSpec>) -> DomainResult<Vec<Task>> {
        let mut results: Vec<Option<Task>> = Vec::with_capacity(specs.len());
        let mut fresh: Vec<Task> = Vec::new();
        let mut batch_ids = HashSet::new();

        for spec in specs {
            if let Some(key) = spec.idempotency_key.as_deref() {
                let existing = self
                    .retry
                    .execute("task.get_by_key", || self.tasks.get_by_idempotency_key(key))
                    .await?;
                if existing.is_some() {
                    results.push(existing);
                    continue;
                }
            }

            let task = Task::from_spec(spec);
            task.validate().map_err(DomainError::ValidationFailed)?;
            if !batch_ids.insert(task.id) {
                return Err(DomainError::ValidationFailed(format!(
                    "Task id {} appears twice in the batch",
                    task.id
                )));
            }
            results.push(None);
            fresh.push(task);
        }

        if fresh.is_empty() {
            return Ok(results.into_iter().flatten().collect());
        }

        let mut creators: Vec<&str> = fresh.iter().map(|t| t.created_by.as_str()).collect();
        creators.sort_unstable();
        creators.dedup();
        for creator in creators {
            self.actors.require(creator).await?;
        }
        let mut sprint_ids: Vec<Uuid> = fresh.iter().filter_map(|t| t.sprint_id).collect();
        sprint_ids.sort_unstable();
        sprint_ids.dedup();
        for sprint_id in sprint_ids {
            self.sprints.require(sprint_id).await?;
        }

        let referenced: Vec<Uuid> = fresh
            .iter()
            .flat_map(|t| t.depends_on.iter().copied())
            .filter(|id| !batch_ids.contains(id))
            .collect();
        let known: HashSet<Uuid> = self.fetch_many(&referenced).await?.into_iter().map(|t| t.id).collect();
        if let Some(missing) = self.resolver.missing_dependencies(&fresh, &known).first() {
            return Err(DomainError::TaskNotFound(*missing));
        }

        let existing_edges = self
            .retry
            .execute("task.dependency_edges", || self.tasks.dependency_edges())
            .await?;
        let edges = self.resolver.merge_edges(&existing_edges, &fresh);
        if let Some(cycle) = self.resolver.detect_cycle(&edges) {
            return Err(DomainError::DependencyCycle(cycle));
        }

        self.retry
            .execute("task.insert_batch", || self.tasks.insert_batch(&fresh))
            .await?;

        for task in &fresh {
            self.recorder
                .record(
                    ActivityRecord::new(
                        task.created_by.clone(),
                        ActivityCategory::TaskCreated,
                        format!("Created task {}: {}", task.id, task.title),
                    )
                    .with_task(task.id)
                    .with_output(serde_json::json!({
                        "priority": task.priority,
                        "estimated_effort": task.estimated_effort,
                        "depends_on": task.depends_on,
                        "sprint_id": task.sprint_id,
                    })),
                )
                .await?;
        }
        info!(created = fresh.len(), "Tasks created");

        let mut fresh = fresh.into_iter();
        Ok(results
            .into_iter()
            .filter_map(|slot| slot.or_else(|| fresh.next()))
            .collect())
    }

    /// Add `depends_on` to a task that has not started yet.
    #[instrument(skip(self))]
    pub async fn add_dependency(&self, task_id: Uuid, depends_on: Uuid, actor_id: &str) -> DomainResult<Task> {
        self.actors.require(actor_id).await?;
        if task_id == depends_on {
            return Err(DomainError::ValidationFailed(format!(
                "Task {task_id} cannot depend on itself"
            )));
        }
        let task = self.load_for_mutation(task_id).await?;
        if !matches!(
            task.status,
            TaskStatus::Backlog | TaskStatus::Assigned | TaskStatus::Blocked
        ) {
            return Err(DomainError::ValidationFailed(format!(
                "Cannot add dependencies to task {task_id} in status {}",
                task.status
            )));
        }
        if task.depends_on.contains(&depends_on) {
            return Ok(task);
        }
        self.fetch(depends_on).await?.ok_or(DomainError::TaskNotFound(depends_on))?;

        let mut updated = task.clone();
        updated.depends_on.push(depends_on);
        updated.version += 1;
        updated.updated_at = Utc::now();

        let existing_edges = self
            .retry
            .execute("task.dependency_edges", || self.tasks.dependency_edges())
            .await?;
        let edges = self
            .resolver
            .merge_edges(&existing_edges, std::slice::from_ref(&updated));
        if let Some(cycle) = self.resolver.detect_cycle(&edges) {
            return Err(DomainError::DependencyCycle(cycle));
        }

        let mut outbox = TaskOutbox::default();
        outbox.record(
            ActivityRecord::new(
                actor_id,
                ActivityCategory::DependencyAdded,
                format!("Task {task_id} now depends on {depends_on}"),
            )
            .with_task(task_id),
        );
        self.commit(&task, &updated, outbox).await?;
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Give a `BACKLOG` or `BLOCKED` task to `actor_id`.
    ///
    /// Every dependency must be `DONE`. Of several concurrent attempts
    /// exactly one wins; the others get a conflict. Repeating a call that
    /// already succeeded returns the task unchanged.
    #[instrument(skip(self))]
    pub async fn assign_task(&self, task_id: Uuid, actor_id: &str) -> DomainResult<Task> {
        let task = self.load_for_mutation(task_id).await?;
        if task.status == TaskStatus::Assigned && task.assignee.as_deref() == Some(actor_id) {
            debug!(assignee = actor_id, "Task already assigned to this actor");
            return Ok(task);
        }
        if !task.status.is_assignable() {
            return Err(assignment_conflict(&task));
        }
        self.check_assignable_actor(&task, actor_id).await?;
        self.ensure_dependencies_done(&task).await?;

        let mut updated = task.clone();
        updated.assignee = Some(actor_id.to_string());
        updated
            .transition_to(TaskStatus::Assigned)
            .map_err(DomainError::ValidationFailed)?;

        let mut outbox = TaskOutbox::default();
        stage_assignment(&mut outbox, &updated, task.status, None);
        if !self.try_commit(&task, &updated, outbox).await? {
            let current = self.require(task_id).await?;
            return Err(assignment_conflict(&current));
        }
        info!(assignee = actor_id, "Task assigned");
        Ok(updated)
    }

    /// Move a held task from `expected_assignee` to `new_actor`.
    ///
    /// Succeeds only if the task is still `ASSIGNED`, `IN_PROGRESS` or
    /// `BLOCKED` with `expected_assignee`. The task passes through `BLOCKED`
    /// and lands in `ASSIGNED`.
    #[instrument(skip(self))]
    pub async fn reassign(&self, task_id: Uuid, expected_assignee: &str, new_actor: &str) -> DomainResult<Task> {
        let task = self.load_for_mutation(task_id).await?;
        let held = task.status.is_held() || task.status == TaskStatus::Blocked;
        if !held || task.assignee.as_deref() != Some(expected_assignee) {
            return Err(assignment_conflict(&task));
        }
        if expected_assignee == new_actor {
            return Ok(task);
        }
        self.check_assignable_actor(&task, new_actor).await?;
        self.ensure_dependencies_done(&task).await?;

        let mut updated = task.clone();
        if updated.status != TaskStatus::Blocked {
            updated
                .transition_to(TaskStatus::Blocked)
                .map_err(DomainError::ValidationFailed)?;
        }
        updated.assignee = Some(new_actor.to_string());
        updated
            .transition_to(TaskStatus::Assigned)
            .map_err(DomainError::ValidationFailed)?;

        let mut outbox = TaskOutbox::default();
        if task.status != TaskStatus::Blocked {
            outbox.record(
                ActivityRecord::new(
                    SYSTEM_ACTOR_ID,
                    ActivityCategory::StatusChanged,
                    format!("Task {task_id} {} -> blocked for reassignment", task.status),
                )
                .with_task(task_id)
                .with_input(serde_json::json!({
                    "from": task.status,
                    "to": TaskStatus::Blocked,
                })),
            );
        }
        stage_notice(
            &mut outbox,
            expected_assignee,
            MessageIntent::StatusChanged,
            format!("Task {task_id} was reassigned to {new_actor}"),
            task_id,
            format!("reassigned:{task_id}:{}", updated.version),
        );
        stage_assignment(&mut outbox, &updated, TaskStatus::Blocked, Some(expected_assignee));

        if !self.try_commit(&task, &updated, outbox).await? {
            let current = self.require(task_id).await?;
            return Err(assignment_conflict(&current));
        }
        info!(from = expected_assignee, to = new_actor, "Task reassigned");
        Ok(updated)
    }

    async fn check_assignable_actor(&self, task: &Task, actor_id: &str) -> DomainResult<Actor> {
        let actor = self.actors.require(actor_id).await?;
        if !actor.active {
            return Err(DomainError::ValidationFailed(format!(
                "Actor {actor_id} is deactivated and cannot take task {}",
                task.id
            )));
        }
        if !actor.capabilities.satisfies(&task.required_capabilities) {
            return Err(DomainError::ValidationFailed(format!(
                "Actor {actor_id} lacks capabilities {:?} required by task {}",
                actor.capabilities.missing(&task.required_capabilities),
                task.id
            )));
        }
        Ok(actor)
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Move a task along the transition table on behalf of `actor_id`.
    ///
    /// `ASSIGNED` is only reachable through assignment. Entering
    /// `IN_PROGRESS` requires every dependency to be `DONE`.
    #[instrument(skip(self), fields(to = new_status.as_str()))]
    pub async fn update_status(&self, task_id: Uuid, new_status: TaskStatus, actor_id: &str) -> DomainResult<Task> {
        self.actors.require(actor_id).await?;
        if new_status == TaskStatus::Assigned {
            return Err(DomainError::ValidationFailed(format!(
                "Task {task_id} can only become assigned through assignment"
            )));
        }

        let task = self.load_for_mutation(task_id).await?;
        if !task.can_transition_to(new_status) {
            return Err(DomainError::InvalidTransition {
                task_id,
                from: task.status,
                to: new_status,
            });
        }
        if new_status == TaskStatus::InProgress {
            self.ensure_dependencies_done(&task).await?;
        }

        let mut updated = task.clone();
        updated
            .transition_to(new_status)
            .map_err(DomainError::ValidationFailed)?;
        updated.check_invariants().map_err(|detail| {
            DomainError::ValidationFailed(format!("Task {task_id}: {detail}"))
        })?;

        let mut outbox = TaskOutbox::default();
        outbox.record(
            ActivityRecord::new(
                actor_id,
                ActivityCategory::StatusChanged,
                format!("Task {task_id} {} -> {}", task.status, new_status),
            )
            .with_task(task_id)
            .with_input(serde_json::json!({
                "from": task.status,
                "to": new_status,
            })),
        );

        let mut receivers: Vec<String> = Vec::new();
        if let Some(holder) = updated.assignee.clone().or_else(|| task.assignee.clone()) {
            receivers.push(holder);
        }
        if let Some(owner) = self.sprint_owner(&updated).await? {
            if !receivers.contains(&owner) {
                receivers.push(owner);
            }
        }
        for receiver in receivers {
            stage_notice(
                &mut outbox,
                &receiver,
                MessageIntent::StatusChanged,
                format!("Task {task_id} moved from {} to {}", task.status, new_status),
                task_id,
                format!("status:{task_id}:{}:{receiver}", updated.version),
            );
        }
        self.commit(&task, &updated, outbox).await?;

        info!(from = task.status.as_str(), "Task status updated");
        Ok(updated)
    }

    /// Cancel from any non-terminal state. The previous assignee is told.
    pub async fn cancel(&self, task_id: Uuid, actor_id: &str) -> DomainResult<Task> {
        self.update_status(task_id, TaskStatus::Cancelled, actor_id).await
    }

    async fn ensure_dependencies_done(&self, task: &Task) -> DomainResult<()> {
        if task.depends_on.is_empty() {
            return Ok(());
        }
        let deps = self.fetch_many(&task.depends_on).await?;
        let statuses: HashMap<Uuid, TaskStatus> = deps.iter().map(|t| (t.id, t.status)).collect();

        let mut pending = Vec::new();
        for dep in &task.depends_on {
            match statuses.get(dep) {
                Some(TaskStatus::Done) => {}
                Some(status) => pending.push((*dep, *status)),
                None => return Err(DomainError::TaskNotFound(*dep)),
            }
        }
        if pending.is_empty() {
            Ok(())
        } else {
            Err(DomainError::UnmetDependencies {
                task_id: task.id,
                pending,
            })
        }
    }

    // ------------------------------------------------------------------
    // Stalls
    // ------------------------------------------------------------------

    /// Find held tasks whose status has not changed for `threshold` and
    /// alert their sprint owner. Reassignment is offered, never forced.
    #[instrument(skip(self))]
    pub async fn detect_stalled(&self, threshold: Duration) -> DomainResult<Vec<StallReport>> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| DomainError::ValidationFailed(format!("Invalid stall threshold: {e}")))?;
        let before = Utc::now() - threshold;
        let stalled = self
            .retry
            .execute("task.list_stalled", || self.tasks.list_stalled(before))
            .await?;

        let actors = self
            .actors
            .list(ActorFilter {
                active_only: true,
                ..Default::default()
            })
            .await?;

        let mut reports = Vec::with_capacity(stalled.len());
        for task in stalled {
            if let Err(detail) = task.check_invariants() {
                let _ = self.quarantine(&task, detail).await;
                continue;
            }

            let receiver = self
                .sprint_owner(&task)
                .await?
                .unwrap_or_else(|| SYSTEM_ACTOR_ID.to_string());
            let idle = Utc::now() - task.status_changed_at;
            let body = format!(
                "Task {} has been {} with {} for {} minutes",
                task.id,
                task.status,
                task.assignee.as_deref().unwrap_or("nobody"),
                idle.num_minutes()
            );
            let alert = Message::new(SYSTEM_ACTOR_ID, receiver, MessageIntent::Alert, body)
                .with_task(task.id)
                .with_idempotency_key(format!(
                    "stall:{}:{}",
                    task.id,
                    task.status_changed_at.timestamp_micros()
                ));
            let alert_id = alert.id;
            let stored = self.messages.send(alert).await?;
            let newly_alerted = stored.id == alert_id;

            let candidates: Vec<String> = actors
                .iter()
                .filter(|a| Some(a.id.as_str()) != task.assignee.as_deref())
                .filter(|a| !a.is_system())
                .filter(|a| a.capabilities.satisfies(&task.required_capabilities))
                .map(|a| a.id.clone())
                .collect();

            if newly_alerted {
                warn!(task_id = %task.id, idle_minutes = idle.num_minutes(), "Stalled task detected");
                self.recorder
                    .record(
                        ActivityRecord::new(
                            SYSTEM_ACTOR_ID,
                            ActivityCategory::StallDetected,
                            format!("Task {} stalled in {}", task.id, task.status),
                        )
                        .with_task(task.id)
                        .with_output(serde_json::json!({
                            "alert_id": stored.id,
                            "candidates": candidates,
                        })),
                    )
                    .await?;
            }

            reports.push(StallReport {
                task,
                alert: stored,
                newly_alerted,
                candidates,
            });
        }
        Ok(reports)
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    /// Pure planning over caller-supplied items.
    pub fn plan_sprint(&self, items: &[PlanItem], capacity: u32) -> SprintPlan {
        plan_sprint(items, capacity)
    }

    /// Plan from the stored backlog. Dependencies that are already `DONE`
    /// are dropped first; nothing is mutated.
    #[instrument(skip(self))]
    pub async fn plan_sprint_from_backlog(&self, sprint_id: Uuid, capacity: u32) -> DomainResult<SprintPlan> {
        let sprint = self.sprints.require(sprint_id).await?;
        let backlog: Vec<Task> = self
            .list_tasks(TaskFilter {
                status: Some(TaskStatus::Backlog),
                quarantined: Some(false),
                ..Default::default()
            })
            .await?
            .into_iter()
            .filter(|t| t.sprint_id.is_none() || t.sprint_id == Some(sprint_id))
            .collect();

        let in_backlog: HashSet<Uuid> = backlog.iter().map(|t| t.id).collect();
        let outside: Vec<Uuid> = backlog
            .iter()
            .flat_map(|t| t.depends_on.iter().copied())
            .filter(|id| !in_backlog.contains(id))
            .collect();
        let done: HashSet<Uuid> = self
            .fetch_many(&outside)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| t.id)
            .collect();

        let items: Vec<PlanItem> = backlog
            .iter()
            .map(|task| {
                let mut item = PlanItem::from(task);
                item.depends_on.retain(|dep| !done.contains(dep));
                item
            })
            .collect();
        let plan = plan_sprint(&items, capacity);

        self.recorder
            .record(
                ActivityRecord::new(
                    sprint.owner.clone(),
                    ActivityCategory::Decision,
                    format!(
                        "Planned sprint {sprint_id}: {} selected, {} deferred",
                        plan.selected.len(),
                        plan.deferred.len()
                    ),
                )
                .with_input(serde_json::json!({ "capacity": capacity, "backlog": items.len() }))
                .with_output(serde_json::to_value(&plan)?),
            )
            .await?;
        Ok(plan)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Load a task. A task found in an impossible state is quarantined and
    /// returned with the flag set.
    pub async fn get_task(&self, task_id: Uuid) -> DomainResult<Option<Task>> {
        let Some(mut task) = self.fetch(task_id).await? else {
            return Ok(None);
        };
        if !task.quarantined {
            if let Err(detail) = task.check_invariants() {
                let _ = self.quarantine(&task, detail).await;
                task.quarantined = true;
            }
        }
        Ok(Some(task))
    }

    pub async fn require(&self, task_id: Uuid) -> DomainResult<Task> {
        self.get_task(task_id).await?.ok_or(DomainError::TaskNotFound(task_id))
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        self.retry
            .execute("task.list", || self.tasks.list(filter.clone()))
            .await
    }

    // ------------------------------------------------------------------
    // Quarantine
    // ------------------------------------------------------------------

    /// Operator action: repair an impossible status/assignee pairing if
    /// there is one and lift the quarantine.
    #[instrument(skip(self))]
    pub async fn release_quarantine(&self, task_id: Uuid, operator_id: &str) -> DomainResult<Task> {
        self.actors.require(operator_id).await?;
        let task = self.fetch(task_id).await?.ok_or(DomainError::TaskNotFound(task_id))?;
        let violation = task.check_invariants().err();
        if !task.quarantined && violation.is_none() {
            return Ok(task);
        }

        let mut repaired = task.clone();
        let now = Utc::now();
        if repaired.status.requires_assignee() && repaired.assignee.is_none() {
            repaired.status = TaskStatus::Blocked;
            repaired.status_changed_at = now;
        }
        if repaired.status == TaskStatus::Backlog {
            repaired.assignee = None;
        }
        repaired.quarantined = false;
        repaired.version += 1;
        repaired.updated_at = now;

        let mut outbox = TaskOutbox::default();
        outbox.record(
            ActivityRecord::new(
                operator_id,
                ActivityCategory::Correction,
                format!("Released quarantine on task {task_id}"),
            )
            .with_task(task_id)
            .with_input(serde_json::json!({
                "status": task.status,
                "assignee": task.assignee,
                "violation": violation,
            }))
            .with_output(serde_json::json!({
                "status": repaired.status,
                "assignee": repaired.assignee,
            })),
        );
        self.commit(&task, &repaired, outbox).await?;
        info!(operator = operator_id, "Quarantine released");
        Ok(repaired)
    }

    async fn quarantine(&self, task: &Task, detail: String) -> DomainError {
        error!(
            task_id = %task.id,
            status = task.status.as_str(),
            assignee = ?task.assignee,
            detail = %detail,
            "Invariant violation, quarantining task"
        );
        if let Err(err) = self
            .retry
            .execute("task.set_quarantined", || self.tasks.set_quarantined(task.id, true))
            .await
        {
            error!(task_id = %task.id, error = %err, "Failed to persist quarantine flag");
        }
        let record = ActivityRecord::new(
            SYSTEM_ACTOR_ID,
            ActivityCategory::InvariantViolation,
            format!("Task {} quarantined: {detail}", task.id),
        )
        .with_task(task.id)
        .with_input(serde_json::json!({
            "status": task.status,
            "assignee": task.assignee,
            "version": task.version,
        }))
        .failed();
        if let Err(err) = self.recorder.record(record).await {
            error!(task_id = %task.id, error = %err, "Failed to record invariant violation");
        }
        DomainError::InvariantViolation {
            entity: "task".to_string(),
            id: task.id.to_string(),
            detail,
        }
    }

    // ------------------------------------------------------------------
    // Store helpers
    // ------------------------------------------------------------------

    async fn fetch(&self, task_id: Uuid) -> DomainResult<Option<Task>> {
        self.retry
            .execute("task.get", || self.tasks.get(task_id))
            .await
    }

    async fn fetch_many(&self, ids: &[Uuid]) -> DomainResult<Vec<Task>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.retry
            .execute("task.get_many", || self.tasks.get_many(ids))
            .await
    }

    async fn load_for_mutation(&self, task_id: Uuid) -> DomainResult<Task> {
        let task = self.fetch(task_id).await?.ok_or(DomainError::TaskNotFound(task_id))?;
        if task.quarantined {
            return Err(DomainError::Quarantined(task_id));
        }
        if let Err(detail) = task.check_invariants() {
            return Err(self.quarantine(&task, detail).await);
        }
        Ok(task)
    }

    /// Swap `expected` for `updated` and write `outbox` in one transaction.
    ///
    /// When an attempt commits but its reply is lost (a timeout), the retry
    /// finds the stored task already equal to `updated`; that counts as
    /// success and the outbox is not written twice.
    async fn try_commit(&self, expected: &Task, updated: &Task, outbox: TaskOutbox) -> DomainResult<bool> {
        let committed = self
            .retry
            .execute("task.commit_transition", || {
                self.tasks.commit_transition(expected, updated, &outbox)
            })
            .await?;
        match committed {
            Some(stored) => {
                self.messages.announce(&stored);
                Ok(true)
            }
            None => Ok(self
                .fetch(expected.id)
                .await?
                .is_some_and(|current| same_outcome(&current, updated))),
        }
    }

    async fn commit(&self, expected: &Task, updated: &Task, outbox: TaskOutbox) -> DomainResult<()> {
        if self.try_commit(expected, updated, outbox).await? {
            Ok(())
        } else {
            Err(DomainError::ConcurrencyConflict {
                entity: "task".to_string(),
                id: expected.id.to_string(),
            })
        }
    }

    async fn sprint_owner(&self, task: &Task) -> DomainResult<Option<String>> {
        match task.sprint_id {
            Some(sprint_id) => Ok(self.sprints.get(sprint_id).await?.map(|s| s.owner)),
            None => Ok(None),
        }
    }
}

fn same_outcome(current: &Task, updated: &Task) -> bool {
    current.version == updated.version
        && current.status == updated.status
        && current.assignee == updated.assignee
        && current.quarantined == updated.quarantined
}

/// Queue a notification from the orchestrator and its delivery record.
fn stage_notice(
    outbox: &mut TaskOutbox,
    receiver: &str,
    intent: MessageIntent,
    body: String,
    task_id: Uuid,
    idempotency_key: String,
) {
    let message = Message::new(SYSTEM_ACTOR_ID, receiver, intent, body)
        .with_task(task_id)
        .with_idempotency_key(idempotency_key);
    outbox.record(MessageProtocol::delivery_record(&message));
    outbox.message(message);
}

fn stage_assignment(outbox: &mut TaskOutbox, task: &Task, from: TaskStatus, previous: Option<&str>) {
    let assignee = task.assignee.as_deref().unwrap_or_default();
    let mut record = ActivityRecord::new(
        SYSTEM_ACTOR_ID,
        ActivityCategory::TaskAssigned,
        format!("Assigned task {} to {assignee}", task.id),
    )
    .with_task(task.id)
    .with_input(serde_json::json!({
        "from": from,
        "to": TaskStatus::Assigned,
        "assignee": assignee,
    }));
    if let Some(previous) = previous {
        record = record.with_reasoning(format!("Reassigned from {previous}"));
    }
    outbox.record(record);

    stage_notice(
        outbox,
        assignee,
        MessageIntent::TaskAssigned,
        format!("You have been assigned task {}: {}", task.id, task.title),
        task.id,
        format!("assigned:{}:{}", task.id, task.version),
    );
}

fn assignment_conflict(task: &Task) -> DomainError {
    DomainError::AssignmentConflict {
        task_id: task.id,
        status: task.status,
        assignee: task.assignee.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::SqliteTaskRepository;
    use crate::domain::errors::ErrorKind;
    use crate::domain::models::{ActivityFilter, MessageFilter, Pagination};
    use crate::services::test_support::TestServices;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    async fn setup() -> TestServices {
        let services = TestServices::new().await;
        services.register("planner", "planner", &[]).await;
        services.register("a1", "implementer", &["rust"]).await;
        services.register("a2", "implementer", &["rust"]).await;
        services
    }

    async fn create(services: &TestServices, title: &str) -> Task {
        services
            .orchestrator
            .create_task(TaskSpec::new(title, "planner"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_starts_in_backlog() {
        let services = setup().await;
        let task = create(&services, "T1").await;
        assert_eq!(task.status, TaskStatus::Backlog);
        assert!(task.assignee.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_dependency_and_creator() {
        let services = setup().await;
        let err = services
            .orchestrator
            .create_task(TaskSpec::new("T", "planner").with_dependency(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = services
            .orchestrator
            .create_task(TaskSpec::new("T", "stranger"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = services
            .orchestrator
            .create_task(TaskSpec::new("  ", "planner"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_batch_cycle_rejected_before_write() {
        let services = setup().await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let err = services
            .orchestrator
            .create_batch(vec![
                TaskSpec::new("A", "planner").with_id(a).with_dependency(b),
                TaskSpec::new("B", "planner").with_id(b).with_dependency(a),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::DependencyCycle(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(services.orchestrator.get_task(a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_with_internal_dependencies() {
        let services = setup().await;
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let created = services
            .orchestrator
            .create_batch(vec![
                TaskSpec::new("B", "planner").with_id(b).with_dependency(a),
                TaskSpec::new("A", "planner").with_id(a),
            ])
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].id, b);
        assert_eq!(services.orchestrator.require(b).await.unwrap().depends_on, vec![a]);
    }

    #[tokio::test]
    async fn test_idempotent_create() {
        let services = setup().await;
        let first = services
            .orchestrator
            .create_task(TaskSpec::new("T", "planner").with_idempotency_key("ext-1"))
            .await
            .unwrap();
        let again = services
            .orchestrator
            .create_task(TaskSpec::new("T", "planner").with_idempotency_key("ext-1"))
            .await
            .unwrap();
        assert_eq!(first.id, again.id);
    }

    #[tokio::test]
    async fn test_assign_sends_message_and_records() {
        let services = setup().await;
        let task = create(&services, "T1").await;
        let assigned = services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        assert_eq!(assigned.status, TaskStatus::Assigned);
        assert_eq!(assigned.assignee.as_deref(), Some("a1"));

        let inbox = services
            .messages
            .receive("a1", &MessageFilter::default().with_intent(MessageIntent::TaskAssigned))
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].related_task, Some(task.id));

        let records = services
            .recorder
            .query(
                &ActivityFilter::for_task(task.id).with_category(ActivityCategory::TaskAssigned),
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(records.total, 1);
    }

    #[tokio::test]
    async fn test_assign_held_task_conflicts() {
        let services = setup().await;
        let task = create(&services, "T").await;
        services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        let err = services.orchestrator.assign_task(task.id, "a2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("a1"));
    }

    #[tokio::test]
    async fn test_repeated_assign_to_holder_is_noop() {
        let services = setup().await;
        let task = create(&services, "T").await;
        let first = services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        let again = services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        assert_eq!(again.version, first.version);

        let inbox = services
            .messages
            .receive("a1", &MessageFilter::default().with_intent(MessageIntent::TaskAssigned))
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
    }

    /// Commits like the SQLite store but reports one commit as timed out.
    struct LosesOneReply {
        inner: SqliteTaskRepository,
        armed: AtomicBool,
    }

    #[async_trait]
    impl TaskRepository for LosesOneReply {
        async fn insert(&self, task: &Task) -> DomainResult<()> {
            self.inner.insert(task).await
        }

        async fn insert_batch(&self, tasks: &[Task]) -> DomainResult<()> {
            self.inner.insert_batch(tasks).await
        }

        async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
            self.inner.get(id).await
        }

        async fn get_many(&self, ids: &[Uuid]) -> DomainResult<Vec<Task>> {
            self.inner.get_many(ids).await
        }

        async fn get_by_idempotency_key(&self, key: &str) -> DomainResult<Option<Task>> {
            self.inner.get_by_idempotency_key(key).await
        }

        async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
            self.inner.list(filter).await
        }

        async fn commit_transition(
            &self,
            expected: &Task,
            updated: &Task,
            outbox: &TaskOutbox,
        ) -> DomainResult<Option<Vec<Message>>> {
            let stored = self.inner.commit_transition(expected, updated, outbox).await?;
            if stored.is_some() && self.armed.swap(false, AtomicOrdering::SeqCst) {
                return Err(DomainError::transient("task.commit_transition", "timed out"));
            }
            Ok(stored)
        }

        async fn set_quarantined(&self, id: Uuid, quarantined: bool) -> DomainResult<()> {
            self.inner.set_quarantined(id, quarantined).await
        }

        async fn get_dependents(&self, task_id: Uuid) -> DomainResult<Vec<Uuid>> {
            self.inner.get_dependents(task_id).await
        }

        async fn dependency_edges(&self) -> DomainResult<Vec<(Uuid, Uuid)>> {
            self.inner.dependency_edges().await
        }

        async fn list_stalled(&self, before: chrono::DateTime<Utc>) -> DomainResult<Vec<Task>> {
            self.inner.list_stalled(before).await
        }
    }

    #[tokio::test]
    async fn test_lost_commit_reply_is_not_a_conflict() {
        let services = setup().await;
        let task = create(&services, "T").await;
        let orchestrator = TaskOrchestrator::new(
            Arc::new(LosesOneReply {
                inner: SqliteTaskRepository::new(services.pool.clone()),
                armed: AtomicBool::new(true),
            }),
            services.actors.clone(),
            services.sprints.clone(),
            services.messages.clone(),
            services.recorder.clone(),
            services.config.orchestrator.clone(),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5), Duration::from_secs(5)),
        );

        let assigned = orchestrator.assign_task(task.id, "a1").await.unwrap();
        assert_eq!(assigned.assignee.as_deref(), Some("a1"));
        assert_eq!(assigned.version, task.version + 1);

        let records = services
            .recorder
            .query(
                &ActivityFilter::for_task(task.id).with_category(ActivityCategory::TaskAssigned),
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(records.total, 1);
        let inbox = services
            .messages
            .receive("a1", &MessageFilter::default().with_intent(MessageIntent::TaskAssigned))
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[tokio::test]
    async fn test_reassign_from_review_conflicts() {
        let services = setup().await;
        let task = create(&services, "T").await;
        services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        for status in [TaskStatus::InProgress, TaskStatus::Review] {
            services.orchestrator.update_status(task.id, status, "a1").await.unwrap();
        }

        let err = services.orchestrator.reassign(task.id, "a1", "a2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let stored = services.orchestrator.require(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Review);
        assert_eq!(stored.assignee.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_capability_and_liveness_gating() {
        let services = setup().await;
        services.register("designer", "designer", &["figma"]).await;
        let task = services
            .orchestrator
            .create_task(TaskSpec::new("T", "planner").with_required_capability("rust"))
            .await
            .unwrap();
        let err = services.orchestrator.assign_task(task.id, "designer").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        services.actors.deactivate("a2").await.unwrap();
        let err = services.orchestrator.assign_task(task.id, "a2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        services.orchestrator.assign_task(task.id, "a1").await.unwrap();
    }

    #[tokio::test]
    async fn test_dependency_gating() {
        let services = setup().await;
        let t1 = create(&services, "T1").await;
        let t2 = services
            .orchestrator
            .create_task(TaskSpec::new("T2", "planner").with_dependency(t1.id))
            .await
            .unwrap();

        let err = services.orchestrator.assign_task(t2.id, "a1").await.unwrap_err();
        assert!(matches!(err, DomainError::UnmetDependencies { .. }));

        services.orchestrator.assign_task(t1.id, "a1").await.unwrap();
        services.orchestrator.update_status(t1.id, TaskStatus::InProgress, "a1").await.unwrap();
        services.orchestrator.update_status(t1.id, TaskStatus::Done, "a1").await.unwrap();
        services.orchestrator.assign_task(t2.id, "a2").await.unwrap();
    }

    #[tokio::test]
    async fn test_add_dependency_rejects_cycle_and_self() {
        let services = setup().await;
        let t1 = create(&services, "T1").await;
        let t2 = services
            .orchestrator
            .create_task(TaskSpec::new("T2", "planner").with_dependency(t1.id))
            .await
            .unwrap();

        let err = services.orchestrator.add_dependency(t1.id, t2.id, "planner").await.unwrap_err();
        assert!(matches!(err, DomainError::DependencyCycle(_)));
        let err = services.orchestrator.add_dependency(t1.id, t1.id, "planner").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let t3 = create(&services, "T3").await;
        let updated = services.orchestrator.add_dependency(t2.id, t3.id, "planner").await.unwrap();
        assert_eq!(updated.depends_on, vec![t1.id, t3.id]);
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_state() {
        let services = setup().await;
        let task = create(&services, "T").await;
        let err = services
            .orchestrator
            .update_status(task.id, TaskStatus::Done, "a1")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        let stored = services.orchestrator.require(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Backlog);
        assert_eq!(stored.version, task.version);

        let err = services
            .orchestrator
            .update_status(task.id, TaskStatus::Assigned, "a1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_status_change_notifies_assignee_and_owner() {
        let services = setup().await;
        let now = Utc::now();
        let sprint = services
            .sprints
            .create("planner", "Goal", now, now + chrono::Duration::days(7))
            .await
            .unwrap();
        let task = services
            .orchestrator
            .create_task(TaskSpec::new("T", "planner").with_sprint(sprint.id))
            .await
            .unwrap();
        services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        services
            .orchestrator
            .update_status(task.id, TaskStatus::InProgress, "a1")
            .await
            .unwrap();

        let filter = MessageFilter::default().with_intent(MessageIntent::StatusChanged);
        assert_eq!(services.messages.receive("a1", &filter).await.unwrap().len(), 1);
        assert_eq!(services.messages.receive("planner", &filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_clears_assignee_and_notifies() {
        let services = setup().await;
        let task = create(&services, "T").await;
        services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        let cancelled = services.orchestrator.cancel(task.id, "planner").await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(cancelled.assignee.is_none());

        let filter = MessageFilter::default().with_intent(MessageIntent::StatusChanged);
        let inbox = services.messages.receive("a1", &filter).await.unwrap();
        assert!(inbox[0].body.contains("cancelled"));

        let err = services.orchestrator.cancel(task.id, "planner").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_blocked_keeps_assignee_and_can_be_reassigned() {
        let services = setup().await;
        let task = create(&services, "T").await;
        services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        let blocked = services
            .orchestrator
            .update_status(task.id, TaskStatus::Blocked, "a1")
            .await
            .unwrap();
        assert_eq!(blocked.assignee.as_deref(), Some("a1"));

        let reassigned = services.orchestrator.assign_task(task.id, "a2").await.unwrap();
        assert_eq!(reassigned.assignee.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_reassign_requires_expected_holder() {
        let services = setup().await;
        let task = create(&services, "T").await;
        services.orchestrator.assign_task(task.id, "a1").await.unwrap();
        services
            .orchestrator
            .update_status(task.id, TaskStatus::InProgress, "a1")
            .await
            .unwrap();

        let err = services.orchestrator.reassign(task.id, "a2", "a2").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let moved = services.orchestrator.reassign(task.id, "a1", "a2").await.unwrap();
        assert_eq!(moved.status, TaskStatus::Assigned);
        assert_eq!(moved.assignee.as_deref(), Some("a2"));
        let notices = services
            .messages
            .receive("a1", &MessageFilter::default().with_intent(MessageIntent::StatusChanged))
            .await
            .unwrap();
        assert!(notices.iter().any(|m| m.body.contains("reassigned")));
    }

    #[tokio::test]
    async fn test_detect_stalled_alerts_once() {
        let services = setup().await;
        let task = create(&services, "T").await;
        services.orchestrator.assign_task(task.id, "a1").await.unwrap();

        let reports = services.orchestrator.detect_stalled(Duration::ZERO).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].newly_alerted);
        assert_eq!(reports[0].alert.receiver, SYSTEM_ACTOR_ID);
        assert!(reports[0].candidates.contains(&"a2".to_string()));
        assert!(!reports[0].candidates.contains(&"a1".to_string()));

        let again = services.orchestrator.detect_stalled(Duration::ZERO).await.unwrap();
        assert!(!again[0].newly_alerted);
        assert_eq!(again[0].alert.id, reports[0].alert.id);

        let none = services
            .orchestrator
            .detect_stalled(Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_plan_from_backlog_strips_done_dependencies() {
        let services = setup().await;
        let now = Utc::now();
        let sprint = services
            .sprints
            .create("planner", "Goal", now, now + chrono::Duration::days(7))
            .await
            .unwrap();
        let base = create(&services, "base").await;
        services.orchestrator.assign_task(base.id, "a1").await.unwrap();
        services.orchestrator.update_status(base.id, TaskStatus::InProgress, "a1").await.unwrap();
        services.orchestrator.update_status(base.id, TaskStatus::Done, "a1").await.unwrap();

        let follow = services
            .orchestrator
            .create_task(TaskSpec::new("follow", "planner").with_dependency(base.id).with_effort(3))
            .await
            .unwrap();
        let big = services
            .orchestrator
            .create_task(TaskSpec::new("big", "planner").with_effort(10).with_priority(9))
            .await
            .unwrap();

        let plan = services
            .orchestrator
            .plan_sprint_from_backlog(sprint.id, 5)
            .await
            .unwrap();
        assert_eq!(plan.selected, vec![follow.id]);
        assert!(plan.deferred.iter().any(|d| d.id == big.id));
    }
}
