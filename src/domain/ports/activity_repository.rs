//! Activity log port. Append-only: no update or delete.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ActivityFilter, ActivityRecord, Pagination};

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Append a record. Appending the same id twice stores it once.
    async fn append(&self, record: &ActivityRecord) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<ActivityRecord>>;

    /// Records matching `filter`, newest first.
    async fn query(&self, filter: &ActivityFilter, page: Pagination) -> DomainResult<Vec<ActivityRecord>>;

    async fn count(&self, filter: &ActivityFilter) -> DomainResult<u64>;
}
