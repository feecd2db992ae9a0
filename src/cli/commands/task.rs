//! Task CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use super::open_foreman;
use crate::cli::id_resolver::{resolve_sprint_id, resolve_task_id};
use crate::cli::output::{output, short_id, ActionOutput, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::domain::models::{ActivityFilter, ActivityRecord, Pagination, Task, TaskSpec, TaskStatus};
use crate::domain::ports::TaskFilter;
use crate::services::StallReport;

#[derive(Args, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommands,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task in the backlog
    Create {
        title: String,
        /// Creating actor
        #[arg(long = "by")]
        created_by: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// 0-10, higher is more urgent
        #[arg(short, long, default_value_t = 5)]
        priority: u8,
        /// Estimated effort in points
        #[arg(short, long, default_value_t = 1)]
        effort: u32,
        /// Task id (or prefix) this task depends on (repeatable)
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        #[arg(long)]
        sprint: Option<String>,
        /// Capability the assignee must have (repeatable)
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        /// Re-running with the same key returns the existing task
        #[arg(long)]
        key: Option<String>,
    },
    /// Assign a backlog or blocked task
    Assign { id: String, actor: String },
    /// Move a held task to another actor
    Reassign {
        id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },
    /// Change a task's status
    Status {
        id: String,
        /// backlog, in_progress, review, done, blocked, cancelled
        status: String,
        #[arg(long = "by")]
        actor: String,
    },
    /// Cancel a task
    Cancel {
        id: String,
        #[arg(long = "by")]
        actor: String,
    },
    /// Add a dependency to a task that has not started
    Depend {
        id: String,
        on: String,
        #[arg(long = "by")]
        actor: String,
    },
    /// Repair and release a quarantined task
    Release {
        id: String,
        #[arg(long = "by")]
        operator: String,
    },
    /// Show task details and recent activity
    Show { id: String },
    /// List tasks
    List {
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long)]
        assignee: Option<String>,
        #[arg(long)]
        sprint: Option<String>,
        #[arg(long)]
        quarantined: bool,
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
    },
    /// Report held tasks with no status change for a while
    Stalled {
        /// Overrides orchestrator.stall_threshold_secs
        #[arg(long)]
        threshold_secs: Option<u64>,
    },
}

#[derive(Debug, Serialize)]
pub struct TaskListOutput {
    pub tasks: Vec<Task>,
    pub total: usize,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return "No tasks found.".to_string();
        }
        format!(
            "{}\nShowing {} task(s)",
            TableFormatter::new().format_tasks(&self.tasks),
            self.total
        )
    }
}

#[derive(Debug, Serialize)]
pub struct TaskDetailOutput {
    pub task: Task,
    pub activity: Vec<ActivityRecord>,
}

impl CommandOutput for TaskDetailOutput {
    fn to_human(&self) -> String {
        let task = &self.task;
        let mut lines = vec![
            format!("Task: {}", task.title),
            format!("ID: {}", task.id),
            format!("Status: {}{}", task.status, if task.quarantined { " (quarantined)" } else { "" }),
            format!("Priority: {}", task.priority),
            format!("Effort: {}", task.estimated_effort),
            format!("Created by: {}", task.created_by),
            format!("Assignee: {}", task.assignee.as_deref().unwrap_or("-")),
            format!("Version: {}", task.version),
        ];
        if !task.description.is_empty() {
            lines.push(format!("Description: {}", task.description));
        }
        if let Some(sprint) = task.sprint_id {
            lines.push(format!("Sprint: {sprint}"));
        }
        if !task.required_capabilities.is_empty() {
            let caps: Vec<&str> = task.required_capabilities.iter().map(String::as_str).collect();
            lines.push(format!("Requires: {}", caps.join(", ")));
        }
        if !task.depends_on.is_empty() {
            lines.push("Depends on:".to_string());
            lines.extend(task.depends_on.iter().map(|d| format!("  - {d}")));
        }
        if !self.activity.is_empty() {
            lines.push(String::new());
            lines.push(TableFormatter::new().format_activity(&self.activity));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StalledOutput {
    pub threshold_secs: u64,
    pub stalled: Vec<StallReport>,
}

impl CommandOutput for StalledOutput {
    fn to_human(&self) -> String {
        if self.stalled.is_empty() {
            return format!("No tasks stalled longer than {}s.", self.threshold_secs);
        }
        let mut lines = vec![format!("{} stalled task(s):", self.stalled.len())];
        for report in &self.stalled {
            lines.push(format!(
                "  {} {} held by {} -> alerted {}{}; candidates: {}",
                short_id(&report.task.id),
                report.task.status,
                report.task.assignee.as_deref().unwrap_or("-"),
                report.alert.receiver,
                if report.newly_alerted { "" } else { " (earlier)" },
                if report.candidates.is_empty() {
                    "none".to_string()
                } else {
                    report.candidates.join(", ")
                }
            ));
        }
        lines.join("\n")
    }
}

fn parse_status(status: &str) -> Result<TaskStatus> {
    TaskStatus::from_str(status).ok_or_else(|| anyhow!("Invalid task status: {status}"))
}

pub async fn execute(args: TaskArgs, json_mode: bool) -> Result<()> {
    let foreman = open_foreman().await?;
    let pool = &foreman.pool;
    let orchestrator = &foreman.orchestrator;

    match args.command {
        TaskCommands::Create {
            title,
            created_by,
            description,
            priority,
            effort,
            depends_on,
            sprint,
            capabilities,
            key,
        } => {
            let mut spec = TaskSpec::new(title, created_by)
                .with_description(description)
                .with_priority(priority)
                .with_effort(effort);
            for dep in &depends_on {
                spec = spec.with_dependency(resolve_task_id(pool, dep).await?);
            }
            if let Some(sprint) = sprint {
                spec = spec.with_sprint(resolve_sprint_id(pool, &sprint).await?);
            }
            for capability in capabilities {
                spec = spec.with_required_capability(capability);
            }
            if let Some(key) = key {
                spec = spec.with_idempotency_key(key);
            }
            let task = orchestrator.create_task(spec).await?;
            output(&ActionOutput::ok(format!("Task created: {}", task.id), task), json_mode);
        }
        TaskCommands::Assign { id, actor } => {
            let task_id = resolve_task_id(pool, &id).await?;
            let task = orchestrator.assign_task(task_id, &actor).await?;
            output(&ActionOutput::ok(format!("Task {task_id} assigned to {actor}"), task), json_mode);
        }
        TaskCommands::Reassign { id, from, to } => {
            let task_id = resolve_task_id(pool, &id).await?;
            let task = orchestrator.reassign(task_id, &from, &to).await?;
            output(&ActionOutput::ok(format!("Task {task_id} moved from {from} to {to}"), task), json_mode);
        }
        TaskCommands::Status { id, status, actor } => {
            let task_id = resolve_task_id(pool, &id).await?;
            let task = orchestrator
                .update_status(task_id, parse_status(&status)?, &actor)
                .await?;
            output(&ActionOutput::ok(format!("Task {task_id} is now {}", task.status), task), json_mode);
        }
        TaskCommands::Cancel { id, actor } => {
            let task_id = resolve_task_id(pool, &id).await?;
            let task = orchestrator.cancel(task_id, &actor).await?;
            output(&ActionOutput::ok(format!("Task {task_id} cancelled"), task), json_mode);
        }
        TaskCommands::Depend { id, on, actor } => {
            let task_id = resolve_task_id(pool, &id).await?;
            let dep_id = resolve_task_id(pool, &on).await?;
            let task = orchestrator.add_dependency(task_id, dep_id, &actor).await?;
            output(&ActionOutput::ok(format!("Task {task_id} now depends on {dep_id}"), task), json_mode);
        }
        TaskCommands::Release { id, operator } => {
            let task_id = resolve_task_id(pool, &id).await?;
            let task = orchestrator.release_quarantine(task_id, &operator).await?;
            output(&ActionOutput::ok(format!("Task {task_id} released as {}", task.status), task), json_mode);
        }
        TaskCommands::Show { id } => {
            let task_id = resolve_task_id(pool, &id).await?;
            let task = orchestrator.require(task_id).await?;
            let activity = foreman
                .recorder
                .query(&ActivityFilter::for_task(task_id), Pagination::new(20, 0))
                .await?
                .records;
            output(&TaskDetailOutput { task, activity }, json_mode);
        }
        TaskCommands::List {
            status,
            assignee,
            sprint,
            quarantined,
            limit,
        } => {
            let sprint_id: Option<Uuid> = match sprint {
                Some(prefix) => Some(resolve_sprint_id(pool, &prefix).await?),
                None => None,
            };
            let tasks = orchestrator
                .list_tasks(TaskFilter {
                    status: status.as_deref().map(parse_status).transpose()?,
                    sprint_id,
                    assignee,
                    quarantined: quarantined.then_some(true),
                    limit: Some(limit),
                })
                .await?;
            output(
                &TaskListOutput {
                    total: tasks.len(),
                    tasks,
                },
                json_mode,
            );
        }
        TaskCommands::Stalled { threshold_secs } => {
            let threshold = threshold_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| orchestrator.stall_threshold());
            let stalled = orchestrator.detect_stalled(threshold).await?;
            output(
                &StalledOutput {
                    threshold_secs: threshold.as_secs(),
                    stalled,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
