//! Actor runtime: the poll loop an autonomous actor runs.
//!
//! Each cycle starts or resumes the tasks assigned to the actor, hands
//! them to the injected [`RoleHandler`], brackets the handler with status
//! updates, then drains unprocessed messages. Work is delivered
//! at-least-once; the status bookkeeping around it happens once.
//!
//! Runtimes share nothing in-process. All coordination goes through the
//! store, so any number of them can run side by side.

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use crate::application::Foreman;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityCategory, ActivityRecord, Actor, Message, MessageCursor, RuntimeConfig, Task, TaskStatus,
};
use crate::domain::ports::TaskFilter;
use crate::services::{
    ActivityRecorder, MemoryIndex, MessageNotice, MessageProtocol, TaskOrchestrator,
};

/// Where finished work goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkOutcome {
    /// Hand the task to a reviewer.
    Review,
    /// The task is complete.
    Done,
}

impl WorkOutcome {
    fn status(self) -> TaskStatus {
        match self {
            Self::Review => TaskStatus::Review,
            Self::Done => TaskStatus::Done,
        }
    }
}

/// What role code may use while handling work.
#[derive(Clone)]
pub struct RuntimeContext {
    pub actor: Actor,
    pub messages: MessageProtocol,
    pub memory: MemoryIndex,
}

/// Role-specific behavior injected into a runtime.
#[async_trait]
pub trait RoleHandler: Send + Sync {
    /// Do the work for `task`. An error blocks the task.
    async fn handle_task(&self, ctx: &RuntimeContext, task: &Task) -> anyhow::Result<WorkOutcome>;

    /// React to one message addressed to this actor.
    async fn handle_message(&self, ctx: &RuntimeContext, message: &Message) -> anyhow::Result<()>;
}

/// Counters for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub tasks_started: usize,
    pub tasks_resumed: usize,
    pub tasks_finished: usize,
    pub tasks_failed: usize,
    pub tasks_aborted: usize,
    pub messages_processed: usize,
    pub messages_failed: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct ActorRuntime {
    context: RuntimeContext,
    handler: Arc<dyn RoleHandler>,
    orchestrator: TaskOrchestrator,
    recorder: ActivityRecorder,
    config: RuntimeConfig,
}

impl ActorRuntime {
    /// Register `actor` (or refresh its capabilities) and bind `handler`.
    pub async fn attach(
        foreman: &Foreman,
        actor: Actor,
        handler: Arc<dyn RoleHandler>,
    ) -> DomainResult<Self> {
        let actor = match foreman.actors.get(&actor.id).await? {
            Some(existing) if !existing.active => {
                return Err(DomainError::ValidationFailed(format!(
                    "Actor {} is deactivated",
                    existing.id
                )));
            }
            Some(existing) if existing.capabilities != actor.capabilities => {
                foreman
                    .actors
                    .update_capabilities(&actor.id, actor.capabilities.clone())
                    .await?
            }
            Some(existing) => existing,
            None => foreman.actors.register(actor).await?,
        };

        Ok(Self {
            context: RuntimeContext {
                actor,
                messages: foreman.messages.clone(),
                memory: foreman.memory.clone(),
            },
            handler,
            orchestrator: foreman.orchestrator.clone(),
            recorder: foreman.recorder.clone(),
            config: foreman.config.runtime.clone(),
        })
    }

    pub fn actor_id(&self) -> &str {
        &self.context.actor.id
    }

    /// One poll cycle: tasks first, then messages.
    #[instrument(skip(self), fields(actor = %self.context.actor.id))]
    pub async fn run_once(&self) -> DomainResult<CycleReport> {
        let mut report = CycleReport::default();

        for task in self.pending_tasks().await? {
            self.work_on(task, &mut report).await?;
        }
        self.drain_messages(&mut report).await?;

        if !report.is_idle() {
            debug!(?report, "Cycle complete");
        }
        Ok(report)
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut notices = self.context.messages.subscribe();
        info!(actor = %self.actor_id(), "Actor runtime started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.run_once().await {
                warn!(actor = %self.actor_id(), error = %err, "Runtime cycle failed");
            }
            if !self.wait_for_work(&mut notices, &mut shutdown).await {
                break;
            }
        }

        info!(actor = %self.actor_id(), "Actor runtime stopped");
    }

    /// Sleep for the jittered interval, waking early on a notice for this
    /// actor. Returns false on shutdown.
    async fn wait_for_work(
        &self,
        notices: &mut broadcast::Receiver<MessageNotice>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let sleep = tokio::time::sleep(self.next_delay());
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return true,
                changed = shutdown.changed() => {
                    return changed.is_ok() && !*shutdown.borrow();
                }
                notice = notices.recv() => match notice {
                    Ok(notice) if notice.receiver == self.context.actor.id => return true,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Notice feed lagged");
                        return true;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        (&mut sleep).await;
                        return true;
                    }
                },
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        };
        Duration::from_millis(self.config.poll_interval_ms + jitter)
    }

    // In-progress work first so a restarted actor resumes before it
    // starts anything new.
    async fn pending_tasks(&self) -> DomainResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .orchestrator
            .list_tasks(TaskFilter {
                assignee: Some(self.context.actor.id.clone()),
                quarantined: Some(false),
                ..Default::default()
            })
            .await?
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::InProgress | TaskStatus::Assigned))
            .collect();
        tasks.sort_by(|a, b| {
            (b.status == TaskStatus::InProgress)
                .cmp(&(a.status == TaskStatus::InProgress))
                .then(b.priority.cmp(&a.priority))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(tasks)
    }

    async fn work_on(&self, task: Task, report: &mut CycleReport) -> DomainResult<()> {
        let actor_id = self.context.actor.id.as_str();

        let task = if task.status == TaskStatus::Assigned {
            match self
                .orchestrator
                .update_status(task.id, TaskStatus::InProgress, actor_id)
                .await
            {
                Ok(started) => {
                    report.tasks_started += 1;
                    self.recorder
                        .record(
                            ActivityRecord::new(
                                actor_id,
                                ActivityCategory::WorkStarted,
                                format!("Started task {}", task.id),
                            )
                            .with_task(task.id),
                        )
                        .await?;
                    started
                }
                Err(err) if err.is_conflict() || err.is_transient() => {
                    debug!(task_id = %task.id, error = %err, "Could not start task");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        } else {
            report.tasks_resumed += 1;
            debug!(task_id = %task.id, "Resuming in-progress task");
            task
        };

        let started = Instant::now();
        let outcome = self.handler.handle_task(&self.context, &task).await;
        let elapsed = started.elapsed();

        // Cancellation or reassignment while the handler ran wins.
        let current = self.orchestrator.require(task.id).await?;
        if current.status != TaskStatus::InProgress
            || current.assignee.as_deref() != Some(actor_id)
            || current.quarantined
        {
            info!(
                task_id = %task.id,
                status = current.status.as_str(),
                assignee = ?current.assignee,
                "Task changed under the handler, discarding result"
            );
            report.tasks_aborted += 1;
            return Ok(());
        }

        match outcome {
            Ok(outcome) => {
                self.recorder
                    .record(
                        ActivityRecord::new(
                            actor_id,
                            ActivityCategory::WorkFinished,
                            format!("Finished task {}", task.id),
                        )
                        .with_task(task.id)
                        .with_duration(elapsed)
                        .with_output(serde_json::json!({ "outcome": outcome })),
                    )
                    .await?;
                self.finish(&task, outcome.status(), report, |r| r.tasks_finished += 1)
                    .await
            }
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "Role handler failed");
                self.recorder
                    .record(
                        ActivityRecord::new(
                            actor_id,
                            ActivityCategory::WorkFailed,
                            format!("Task {} failed: {err:#}", task.id),
                        )
                        .with_task(task.id)
                        .with_duration(elapsed)
                        .failed(),
                    )
                    .await?;
                self.finish(&task, TaskStatus::Blocked, report, |r| r.tasks_failed += 1)
                    .await
            }
        }
    }

    async fn finish(
        &self,
        task: &Task,
        status: TaskStatus,
        report: &mut CycleReport,
        count: impl FnOnce(&mut CycleReport),
    ) -> DomainResult<()> {
        match self
            .orchestrator
            .update_status(task.id, status, &self.context.actor.id)
            .await
        {
            Ok(_) => {
                count(report);
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                info!(task_id = %task.id, error = %err, "Task moved before it could be finalized");
                report.tasks_aborted += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn drain_messages(&self, report: &mut CycleReport) -> DomainResult<()> {
        let actor_id = self.context.actor.id.as_str();
        let batch = self
            .context
            .messages
            .receive_unprocessed(actor_id, self.config.message_batch)
            .await?;

        // The batch is delivered in timestamp order but the marker moves in
        // seq order, so it only advances once every message has been handled.
        for message in &batch {
            match self.handler.handle_message(&self.context, message).await {
                Ok(()) => report.messages_processed += 1,
                Err(err) => {
                    warn!(message_id = %message.id, error = %err, "Message handler failed");
                    report.messages_failed += 1;
                    let mut record = ActivityRecord::new(
                        actor_id,
                        ActivityCategory::WorkFailed,
                        format!("Handling message {} failed: {err:#}", message.id),
                    )
                    .with_input(serde_json::json!({ "message_id": message.id }))
                    .failed();
                    if let Some(task_id) = message.related_task {
                        record = record.with_task(task_id);
                    }
                    self.recorder.record(record).await?;
                }
            }
        }
        if let Some(marker) = MessageCursor::covering(&batch) {
            self.context.messages.acknowledge(actor_id, marker).await?;
        }
        Ok(())
    }
}
