//! Sprint repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Sprint, SprintStatus};

#[async_trait]
pub trait SprintRepository: Send + Sync {
    async fn insert(&self, sprint: &Sprint) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Sprint>>;

    /// Move a sprint from `from` to `to`. Returns `false` if the stored
    /// status was not `from`.
    async fn transition(&self, id: Uuid, from: SprintStatus, to: SprintStatus) -> DomainResult<bool>;

    async fn list(&self, status: Option<SprintStatus>) -> DomainResult<Vec<Sprint>>;
}
