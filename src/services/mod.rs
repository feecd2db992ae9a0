//! Service layer for the Foreman orchestration core.
//!
//! Services own the business rules and talk to storage only through the
//! domain ports. Every storage call goes through a [`RetryPolicy`].

pub mod activity_recorder;
pub mod actor_registry;
pub mod dependency_resolver;
pub mod memory_index;
pub mod message_protocol;
pub mod retry;
pub mod sprint_planner;
pub mod sprint_service;
pub mod task_orchestrator;

#[cfg(test)]
pub(crate) mod test_support;

pub use activity_recorder::{ActivityPage, ActivityRecorder};
pub use actor_registry::ActorRegistry;
pub use dependency_resolver::DependencyResolver;
pub use memory_index::{LinkMode, MemoryContext, MemoryIndex};
pub use message_protocol::{MessageNotice, MessageProtocol, MESSAGE_ENTITY_TYPE};
pub use retry::RetryPolicy;
pub use sprint_planner::{plan_sprint, DeferReason, DeferredItem, PlanItem, SprintPlan};
pub use sprint_service::SprintService;
pub use task_orchestrator::{StallReport, TaskOrchestrator};
