//! Application layer: the composition root and the actor runtime loop.

pub mod actor_runtime;
pub mod foreman;

pub use actor_runtime::{ActorRuntime, CycleReport, RoleHandler, RuntimeContext, WorkOutcome};
pub use foreman::Foreman;
