//! Actor CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use super::open_foreman;
use crate::cli::output::{output, ActionOutput, CommandOutput};
use crate::cli::table::TableFormatter;
use crate::domain::models::{Actor, CapabilitySet};
use crate::domain::ports::ActorFilter;

#[derive(Args, Debug)]
pub struct ActorArgs {
    #[command(subcommand)]
    pub command: ActorCommands,
}

#[derive(Subcommand, Debug)]
pub enum ActorCommands {
    /// Register a new actor
    Register {
        /// Actor id, e.g. dev-1
        id: String,
        /// Role tag
        #[arg(short, long)]
        role: String,
        /// Capabilities (repeatable)
        #[arg(short, long = "capability")]
        capabilities: Vec<String>,
    },
    /// Replace an actor's capabilities
    Capabilities {
        id: String,
        #[arg(short, long = "capability")]
        capabilities: Vec<String>,
    },
    /// Deactivate an actor; its history is kept
    Deactivate { id: String },
    /// List actors
    List {
        /// Include deactivated actors
        #[arg(long)]
        all: bool,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        capability: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct ActorListOutput {
    pub actors: Vec<Actor>,
    pub total: usize,
}

impl CommandOutput for ActorListOutput {
    fn to_human(&self) -> String {
        if self.actors.is_empty() {
            return "No actors found.".to_string();
        }
        format!(
            "{}\n{} actor(s)",
            TableFormatter::new().format_actors(&self.actors),
            self.total
        )
    }
}

pub async fn execute(args: ActorArgs, json_mode: bool) -> Result<()> {
    let foreman = open_foreman().await?;
    let actors = &foreman.actors;

    match args.command {
        ActorCommands::Register { id, role, capabilities } => {
            let actor = actors
                .register(Actor::new(id, role).with_capabilities(capabilities.into_iter().collect()))
                .await?;
            output(&ActionOutput::ok(format!("Registered actor {}", actor.id), actor), json_mode);
        }
        ActorCommands::Capabilities { id, capabilities } => {
            let set: CapabilitySet = capabilities.into_iter().collect();
            let actor = actors.update_capabilities(&id, set).await?;
            output(&ActionOutput::ok(format!("Updated capabilities of {}", actor.id), actor), json_mode);
        }
        ActorCommands::Deactivate { id } => {
            let actor = actors.deactivate(&id).await?;
            output(&ActionOutput::ok(format!("Deactivated actor {}", actor.id), actor), json_mode);
        }
        ActorCommands::List { all, role, capability } => {
            let listed = actors
                .list(ActorFilter {
                    active_only: !all,
                    role,
                    capability,
                })
                .await?;
            let out = ActorListOutput {
                total: listed.len(),
                actors: listed,
            };
            output(&out, json_mode);
        }
    }
    Ok(())
}
