pub mod activity;
pub mod actor;
pub mod config;
pub mod memory;
pub mod message;
pub mod metadata;
pub mod sprint;
pub mod task;

pub use activity::{ActivityCategory, ActivityFilter, ActivityRecord, Outcome, Pagination};
pub use actor::{Actor, CapabilitySet, SYSTEM_ACTOR_ID};
pub use config::{
    Config, DatabaseConfig, EmbeddingProviderKind, EmbeddingsConfig, LoggingConfig, MemoryConfig,
    OrchestratorConfig, RetryConfig, RuntimeConfig,
};
pub use memory::{
    cosine_similarity, Direction, EntityRef, MemoryEntity, MemoryFilter, RelatedEntity,
    RelationFilter, Relationship, ScoredEntity,
};
pub use message::{Message, MessageCursor, MessageFilter, MessageIntent};
pub use metadata::{Metadata, METADATA_SCHEMA_VERSION};
pub use sprint::{Sprint, SprintStatus};
pub use task::{ArtifactRef, ArtifactType, Task, TaskSpec, TaskStatus, MAX_PRIORITY};
