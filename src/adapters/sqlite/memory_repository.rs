//! SQLite implementation of the MemoryRepository.
//!
//! Embeddings are stored as JSON arrays next to their dimension; ranking
//! happens in the memory index service.

use async_trait::async_trait;
use std::collections::BTreeSet;
use sqlx::SqlitePool;

use super::{format_timestamp, parse_datetime, parse_json_or_default};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Direction, EntityRef, MemoryEntity, Metadata, RelationFilter, Relationship,
};
use crate::domain::ports::MemoryRepository;

#[derive(Clone)]
pub struct SqliteMemoryRepository {
    pool: SqlitePool,
}

impl SqliteMemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_relationship(
        &self,
        source: &EntityRef,
        target: &EntityRef,
        rel_type: &str,
    ) -> DomainResult<Option<Relationship>> {
        let row: Option<RelationshipRow> = sqlx::query_as(
            r"SELECT * FROM memory_relationships
              WHERE source_type = ? AND source_id = ? AND target_type = ? AND target_id = ? AND rel_type = ?",
        )
        .bind(&source.entity_type)
        .bind(&source.entity_id)
        .bind(&target.entity_type)
        .bind(&target.entity_id)
        .bind(rel_type)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Relationship::try_from).transpose()
    }

    async fn relationships_one_way(
        &self,
        key: &EntityRef,
        direction: Direction,
        filter: &RelationFilter,
    ) -> DomainResult<Vec<(Relationship, Direction)>> {
        let (anchor, other) = match direction {
            Direction::Outgoing => ("source", "target"),
            Direction::Incoming => ("target", "source"),
        };
        let mut query = format!(
            "SELECT * FROM memory_relationships WHERE {anchor}_type = ? AND {anchor}_id = ?"
        );
        let mut bindings: Vec<String> = vec![key.entity_type.clone(), key.entity_id.clone()];

        if !filter.rel_types.is_empty() {
            let placeholders = vec!["?"; filter.rel_types.len()].join(", ");
            query.push_str(&format!(" AND rel_type IN ({placeholders})"));
            bindings.extend(filter.rel_types.iter().cloned());
        }
        if !filter.entity_types.is_empty() {
            let placeholders = vec!["?"; filter.entity_types.len()].join(", ");
            query.push_str(&format!(" AND {other}_type IN ({placeholders})"));
            bindings.extend(filter.entity_types.iter().cloned());
        }
        query.push_str(" ORDER BY rel_type, updated_at");

        let mut q = sqlx::query_as::<_, RelationshipRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| Ok((Relationship::try_from(row)?, direction)))
            .collect()
    }
}

#[async_trait]
impl MemoryRepository for SqliteMemoryRepository {
    async fn upsert_entity(&self, entity: &MemoryEntity) -> DomainResult<MemoryEntity> {
        let embedding_json = entity
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let dimension = entity
            .embedding
            .as_ref()
            .map(|e| i64::try_from(e.len()).unwrap_or(i64::MAX));
        let metadata_json = serde_json::to_string(&entity.metadata)?;
        let tags_json = serde_json::to_string(&entity.tags)?;

        sqlx::query(
            r"INSERT INTO memory_entities (entity_type, entity_id, content, embedding, dimension,
              metadata, tags, created_at, updated_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(entity_type, entity_id) DO UPDATE SET
                content = excluded.content,
                embedding = excluded.embedding,
                dimension = excluded.dimension,
                metadata = excluded.metadata,
                tags = excluded.tags,
                updated_at = excluded.updated_at",
        )
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .bind(&entity.content)
        .bind(&embedding_json)
        .bind(dimension)
        .bind(&metadata_json)
        .bind(&tags_json)
        .bind(format_timestamp(entity.created_at))
        .bind(format_timestamp(entity.updated_at))
        .execute(&self.pool)
        .await?;

        let key = entity.key();
        self.get_entity(&key)
            .await?
            .ok_or(DomainError::MemoryEntityNotFound {
                entity_type: key.entity_type,
                entity_id: key.entity_id,
            })
    }

    async fn get_entity(&self, key: &EntityRef) -> DomainResult<Option<MemoryEntity>> {
        let row: Option<EntityRow> = sqlx::query_as(
            "SELECT * FROM memory_entities WHERE entity_type = ? AND entity_id = ?",
        )
        .bind(&key.entity_type)
        .bind(&key.entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MemoryEntity::try_from).transpose()
    }

    async fn get_entities(&self, keys: &[EntityRef]) -> DomainResult<Vec<MemoryEntity>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entity) = self.get_entity(key).await? {
                out.push(entity);
            }
        }
        Ok(out)
    }

    async fn list_embedded(&self, entity_types: &[String]) -> DomainResult<Vec<MemoryEntity>> {
        let mut query = String::from("SELECT * FROM memory_entities WHERE embedding IS NOT NULL");
        if !entity_types.is_empty() {
            let placeholders = vec!["?"; entity_types.len()].join(", ");
            query.push_str(&format!(" AND entity_type IN ({placeholders})"));
        }

        let mut q = sqlx::query_as::<_, EntityRow>(&query);
        for entity_type in entity_types {
            q = q.bind(entity_type);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(MemoryEntity::try_from).collect()
    }

    async fn upsert_relationship(&self, relationship: &Relationship) -> DomainResult<Relationship> {
        let metadata_json = serde_json::to_string(&relationship.metadata)?;

        sqlx::query(
            r"INSERT INTO memory_relationships (source_type, source_id, target_type, target_id,
              rel_type, metadata, created_at, updated_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              ON CONFLICT(source_type, source_id, target_type, target_id, rel_type) DO UPDATE SET
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
        )
        .bind(&relationship.source.entity_type)
        .bind(&relationship.source.entity_id)
        .bind(&relationship.target.entity_type)
        .bind(&relationship.target.entity_id)
        .bind(&relationship.rel_type)
        .bind(&metadata_json)
        .bind(format_timestamp(relationship.created_at))
        .bind(format_timestamp(relationship.updated_at))
        .execute(&self.pool)
        .await?;

        self.get_relationship(&relationship.source, &relationship.target, &relationship.rel_type)
            .await?
            .ok_or_else(|| {
                DomainError::transient("upsert_relationship", "relationship vanished after write")
            })
    }

    async fn relationships(
        &self,
        key: &EntityRef,
        filter: &RelationFilter,
    ) -> DomainResult<Vec<(Relationship, Direction)>> {
        let mut out = Vec::new();
        if filter.direction != Some(Direction::Incoming) {
            out.extend(self.relationships_one_way(key, Direction::Outgoing, filter).await?);
        }
        if filter.direction != Some(Direction::Outgoing) {
            out.extend(self.relationships_one_way(key, Direction::Incoming, filter).await?);
        }
        Ok(out)
    }

    async fn count_relationships(&self) -> DomainResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memory_relationships")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[derive(sqlx::FromRow)]
struct EntityRow {
    entity_type: String,
    entity_id: String,
    content: String,
    embedding: Option<String>,
    #[allow(dead_code)]
    dimension: Option<i64>,
    metadata: Option<String>,
    tags: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<EntityRow> for MemoryEntity {
    type Error = DomainError;

    fn try_from(row: EntityRow) -> Result<Self, Self::Error> {
        let embedding: Option<Vec<f32>> = row
            .embedding
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;
        let metadata: Metadata = parse_json_or_default(row.metadata)?;
        let tags: BTreeSet<String> = parse_json_or_default(row.tags)?;

        Ok(MemoryEntity {
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            content: row.content,
            embedding,
            metadata,
            tags,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RelationshipRow {
    source_type: String,
    source_id: String,
    target_type: String,
    target_id: String,
    rel_type: String,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<RelationshipRow> for Relationship {
    type Error = DomainError;

    fn try_from(row: RelationshipRow) -> Result<Self, Self::Error> {
        Ok(Relationship {
            source: EntityRef::new(row.source_type, row.source_id),
            target: EntityRef::new(row.target_type, row.target_id),
            rel_type: row.rel_type,
            metadata: parse_json_or_default(row.metadata)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
