//! Foreman - task coordination for teams of actors
//!
//! Foreman tracks tasks through a checked lifecycle, assigns them to
//! capable actors without double assignment, passes typed messages between
//! actors, keeps a similarity-searchable memory and records every decision
//! in an append-only activity log.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the storage/embedding ports
//! - **Adapters** (`adapters`): SQLite repositories and embedding providers
//! - **Service Layer** (`services`): orchestration rules over the ports
//! - **Application Layer** (`application`): composition root and actor runtime
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use foreman::application::Foreman;
//! use foreman::domain::models::TaskSpec;
//! use foreman::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let foreman = Foreman::open(ConfigLoader::load()?).await?;
//!     let task = foreman
//!         .orchestrator
//!         .create_task(TaskSpec::new("Write the parser", "planner"))
//!         .await?;
//!     foreman.orchestrator.assign_task(task.id, "dev-1").await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use application::{ActorRuntime, Foreman, RoleHandler, WorkOutcome};
pub use domain::models::{
    Actor, ActivityRecord, Config, Message, MessageIntent, Sprint, Task, TaskSpec, TaskStatus,
};
pub use domain::{DomainError, DomainResult, ErrorKind};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{ActivityRecorder, MemoryIndex, MessageProtocol, TaskOrchestrator};
