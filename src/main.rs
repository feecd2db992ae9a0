//! Foreman CLI entry point.

use clap::Parser;

use foreman::cli::commands;
use foreman::cli::{handle_error, Cli, Commands};
use foreman::domain::models::Config;
use foreman::infrastructure::config::ConfigLoader;
use foreman::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Commands report a bad config themselves; logging falls back to defaults.
    let config = ConfigLoader::load().unwrap_or_else(|_| Config::default());
    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Actor(args) => commands::actor::execute(args, cli.json).await,
        Commands::Task(args) => commands::task::execute(args, cli.json).await,
        Commands::Sprint(args) => commands::sprint::execute(args, cli.json).await,
        Commands::Message(args) => commands::message::execute(args, cli.json).await,
        Commands::Activity(args) => commands::activity::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
