//! Implementation of the `foreman init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::application::Foreman;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::{ConfigLoader, CONFIG_DIR};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config.yaml
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub config_written: bool,
    pub database_path: PathBuf,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if self.config_written {
            lines.push(format!(
                "  Config:   {}",
                self.initialized_path.join(CONFIG_DIR).join("config.yaml").display()
            ));
        }
        lines.push(format!("  Database: {}", self.database_path.display()));
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };
    let foreman_dir = target_path.join(CONFIG_DIR);
    let config_path = foreman_dir.join("config.yaml");

    fs::create_dir_all(&foreman_dir)
        .await
        .with_context(|| format!("Failed to create {}", foreman_dir.display()))?;

    let config_written = args.force || !fs::try_exists(&config_path).await.unwrap_or(false);
    if config_written {
        fs::write(&config_path, ConfigLoader::default_yaml()?)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
    }

    let mut config = ConfigLoader::load_from_dir(&foreman_dir)?;
    let database_path = target_path.join(&config.database.path);
    config.database.path = database_path.to_string_lossy().into_owned();
    open_and_close(config).await?;

    let out = InitOutput {
        success: true,
        message: format!("Initialized Foreman project at {}", target_path.display()),
        initialized_path: target_path,
        config_written,
        database_path,
    };
    output(&out, json_mode);
    Ok(())
}

async fn open_and_close(config: Config) -> Result<()> {
    let foreman = Foreman::open(config).await?;
    foreman.pool.close().await;
    Ok(())
}
