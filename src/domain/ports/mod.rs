//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that adapters implement. The services depend
//! only on these, never on a concrete store or provider.

pub mod activity_repository;
pub mod actor_repository;
pub mod embedding;
pub mod memory_repository;
pub mod message_repository;
pub mod null_embedding;
pub mod sprint_repository;
pub mod task_repository;

pub use activity_repository::ActivityRepository;
pub use actor_repository::{ActorFilter, ActorRepository};
pub use embedding::EmbeddingProvider;
pub use memory_repository::MemoryRepository;
pub use message_repository::MessageRepository;
pub use null_embedding::NullEmbeddingProvider;
pub use sprint_repository::SprintRepository;
pub use task_repository::{TaskFilter, TaskOutbox, TaskRepository};
