//! Command-line interface.

pub mod commands;
pub mod id_resolver;
pub mod output;
pub mod table;

use clap::{Parser, Subcommand};

use crate::domain::DomainError;
use commands::activity::ActivityArgs;
use commands::actor::ActorArgs;
use commands::init::InitArgs;
use commands::message::MessageArgs;
use commands::sprint::SprintArgs;
use commands::task::TaskArgs;

#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(about = "Foreman - task coordination for teams of actors", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize configuration and database
    Init(InitArgs),
    /// Register and manage actors
    Actor(ActorArgs),
    /// Create, assign and move tasks
    Task(TaskArgs),
    /// Plan and run sprints
    Sprint(SprintArgs),
    /// Exchange messages between actors
    Message(MessageArgs),
    /// Inspect the activity log
    Activity(ActivityArgs),
}

/// Print an error in the requested format and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let kind = err.downcast_ref::<DomainError>().map(|e| e.kind().as_str());
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
            "kind": kind,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_task_create() {
        let cli = Cli::try_parse_from([
            "foreman",
            "--json",
            "task",
            "create",
            "Write parser",
            "--by",
            "planner",
            "--capability",
            "rust",
            "--capability",
            "sql",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Task(TaskArgs {
                command: commands::task::TaskCommands::Create { title, capabilities, priority, .. },
            }) => {
                assert_eq!(title, "Write parser");
                assert_eq!(capabilities, vec!["rust", "sql"]);
                assert_eq!(priority, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_json_flag_is_global() {
        let cli = Cli::try_parse_from(["foreman", "sprint", "list", "--json"]).unwrap();
        assert!(cli.json);
    }
}
