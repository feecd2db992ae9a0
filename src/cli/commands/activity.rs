//! Activity log CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use super::open_foreman;
use crate::cli::id_resolver::resolve_task_id;
use crate::cli::output::{output, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::domain::models::{ActivityCategory, ActivityFilter, ActivityRecord, Outcome, Pagination};

#[derive(Args, Debug)]
pub struct ActivityArgs {
    #[command(subcommand)]
    pub command: ActivityCommands,
}

#[derive(Subcommand, Debug)]
pub enum ActivityCommands {
    /// Query the activity log, newest first
    List {
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Only failures
        #[arg(long)]
        failures: bool,
        #[arg(short, long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

#[derive(Debug, Serialize)]
pub struct ActivityListOutput {
    pub records: Vec<ActivityRecord>,
    pub total: u64,
    pub offset: u32,
}

impl CommandOutput for ActivityListOutput {
    fn to_human(&self) -> String {
        if self.records.is_empty() {
            return "No activity recorded.".to_string();
        }
        format!(
            "{}\nShowing {}-{} of {}",
            TableFormatter::new().format_activity(&self.records),
            self.offset + 1,
            self.offset as usize + self.records.len(),
            self.total
        )
    }
}

pub async fn execute(args: ActivityArgs, json_mode: bool) -> Result<()> {
    let foreman = open_foreman().await?;

    match args.command {
        ActivityCommands::List {
            task,
            actor,
            category,
            failures,
            limit,
            offset,
        } => {
            let filter = ActivityFilter {
                actor_id: actor,
                category: category
                    .map(|c| {
                        ActivityCategory::from_str(&c).ok_or_else(|| anyhow!("Invalid activity category: {c}"))
                    })
                    .transpose()?,
                related_task: match task {
                    Some(prefix) => Some(resolve_task_id(&foreman.pool, &prefix).await?),
                    None => None,
                },
                outcome: failures.then_some(Outcome::Failure),
                ..Default::default()
            };
            let page = foreman
                .recorder
                .query(&filter, Pagination::new(limit, offset))
                .await?;
            output(
                &ActivityListOutput {
                    records: page.records,
                    total: page.total,
                    offset,
                },
                json_mode,
            );
        }
    }
    Ok(())
}
