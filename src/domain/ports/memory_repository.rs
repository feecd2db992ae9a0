use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Direction, EntityRef, MemoryEntity, RelationFilter, Relationship};

/// Repository trait for the semantic memory index.
///
/// Entities are keyed by `(entity_type, entity_id)`; relationships are
/// unique per `(source, target, rel_type)`.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    /// Insert or replace an entity. Content, embedding, metadata and tags
    /// are replaced wholesale; `created_at` of an existing row is kept.
    ///
    /// Returns the stored entity.
    async fn upsert_entity(&self, entity: &MemoryEntity) -> DomainResult<MemoryEntity>;

    async fn get_entity(&self, key: &EntityRef) -> DomainResult<Option<MemoryEntity>>;

    async fn get_entities(&self, keys: &[EntityRef]) -> DomainResult<Vec<MemoryEntity>>;

    /// Entities that carry an embedding, optionally restricted to types.
    ///
    /// Tag and metadata filtering happens in the caller.
    async fn list_embedded(&self, entity_types: &[String]) -> DomainResult<Vec<MemoryEntity>>;

    /// Insert or update a relationship. Re-linking the same tuple replaces
    /// its metadata.
    async fn upsert_relationship(&self, relationship: &Relationship) -> DomainResult<Relationship>;

    /// Relationships touching `key`, tagged with their direction relative
    /// to it.
    async fn relationships(
        &self,
        key: &EntityRef,
        filter: &RelationFilter,
    ) -> DomainResult<Vec<(Relationship, Direction)>>;

    async fn count_relationships(&self) -> DomainResult<u64>;
}
