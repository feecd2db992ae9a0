//! Actor repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Actor;

/// Filter criteria for listing actors.
#[derive(Debug, Clone, Default)]
pub struct ActorFilter {
    pub active_only: bool,
    pub role: Option<String>,
    /// Actor must hold this capability.
    pub capability: Option<String>,
}

/// Repository interface for Actor persistence. Actors are never deleted.
#[async_trait]
pub trait ActorRepository: Send + Sync {
    /// Insert a new actor. Fails with `Duplicate` if the id is taken.
    async fn insert(&self, actor: &Actor) -> DomainResult<()>;

    async fn get(&self, id: &str) -> DomainResult<Option<Actor>>;

    /// Persist role, capabilities and liveness.
    async fn update(&self, actor: &Actor) -> DomainResult<()>;

    async fn list(&self, filter: ActorFilter) -> DomainResult<Vec<Actor>>;
}
