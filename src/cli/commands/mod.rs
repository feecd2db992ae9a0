//! CLI command implementations.

pub mod activity;
pub mod actor;
pub mod init;
pub mod message;
pub mod sprint;
pub mod task;

use anyhow::{Context, Result};

use crate::application::Foreman;
use crate::infrastructure::config::ConfigLoader;

/// Load configuration and open the project database.
pub async fn open_foreman() -> Result<Foreman> {
    let config = ConfigLoader::load()?;
    Foreman::open(config)
        .await
        .context("Failed to open the Foreman database. Run 'foreman init' first.")
}
