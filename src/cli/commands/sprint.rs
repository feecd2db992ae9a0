//! Sprint CLI commands.

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;

use super::open_foreman;
use crate::cli::id_resolver::resolve_sprint_id;
use crate::cli::output::{output, short_id, ActionOutput, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::domain::models::{Sprint, SprintStatus};
use crate::services::SprintPlan;

#[derive(Args, Debug)]
pub struct SprintArgs {
    #[command(subcommand)]
    pub command: SprintCommands,
}

#[derive(Subcommand, Debug)]
pub enum SprintCommands {
    /// Create a sprint starting now
    Create {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        goal: String,
        /// Sprint length in days
        #[arg(long, default_value_t = 14)]
        days: i64,
    },
    /// Start a planned sprint
    Activate {
        id: String,
        #[arg(long = "by")]
        actor: String,
    },
    /// Close an active sprint
    Close {
        id: String,
        #[arg(long = "by")]
        actor: String,
    },
    /// Select backlog tasks for a sprint within an effort capacity
    Plan {
        id: String,
        #[arg(long)]
        capacity: u32,
    },
    /// List sprints
    List {
        /// planning, active, closed
        #[arg(short, long)]
        status: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct SprintListOutput {
    pub sprints: Vec<Sprint>,
}

impl CommandOutput for SprintListOutput {
    fn to_human(&self) -> String {
        if self.sprints.is_empty() {
            return "No sprints found.".to_string();
        }
        TableFormatter::new().format_sprints(&self.sprints)
    }
}

#[derive(Debug, Serialize)]
pub struct SprintPlanOutput {
    pub sprint_id: uuid::Uuid,
    pub plan: SprintPlan,
}

impl CommandOutput for SprintPlanOutput {
    fn to_human(&self) -> String {
        let plan = &self.plan;
        let mut lines = vec![format!(
            "Sprint {}: {} task(s) selected, effort {}/{}",
            short_id(&self.sprint_id),
            plan.selected.len(),
            plan.total_effort,
            plan.capacity
        )];
        for (position, id) in plan.selected.iter().enumerate() {
            lines.push(format!("  {}. {}", position + 1, id));
        }
        if !plan.deferred.is_empty() {
            lines.push("Deferred:".to_string());
            for item in &plan.deferred {
                lines.push(format!("  - {} ({})", short_id(&item.id), item.reason));
            }
        }
        lines.join("\n")
    }
}

pub async fn execute(args: SprintArgs, json_mode: bool) -> Result<()> {
    let foreman = open_foreman().await?;
    let pool = &foreman.pool;

    match args.command {
        SprintCommands::Create { owner, goal, days } => {
            if days <= 0 {
                return Err(anyhow!("Sprint length must be at least one day"));
            }
            let starts_at = Utc::now();
            let sprint = foreman
                .sprints
                .create(&owner, &goal, starts_at, starts_at + Duration::days(days))
                .await?;
            output(&ActionOutput::ok(format!("Sprint created: {}", sprint.id), sprint), json_mode);
        }
        SprintCommands::Activate { id, actor } => {
            let sprint_id = resolve_sprint_id(pool, &id).await?;
            let sprint = foreman.sprints.activate(sprint_id, &actor).await?;
            output(&ActionOutput::ok(format!("Sprint {sprint_id} is active"), sprint), json_mode);
        }
        SprintCommands::Close { id, actor } => {
            let sprint_id = resolve_sprint_id(pool, &id).await?;
            let sprint = foreman.sprints.close(sprint_id, &actor).await?;
            output(&ActionOutput::ok(format!("Sprint {sprint_id} closed"), sprint), json_mode);
        }
        SprintCommands::Plan { id, capacity } => {
            let sprint_id = resolve_sprint_id(pool, &id).await?;
            let plan = foreman
                .orchestrator
                .plan_sprint_from_backlog(sprint_id, capacity)
                .await?;
            output(&SprintPlanOutput { sprint_id, plan }, json_mode);
        }
        SprintCommands::List { status } => {
            let status = status
                .map(|s| SprintStatus::from_str(&s).ok_or_else(|| anyhow!("Invalid sprint status: {s}")))
                .transpose()?;
            let sprints = foreman.sprints.list(status).await?;
            output(&SprintListOutput { sprints }, json_mode);
        }
    }
    Ok(())
}
