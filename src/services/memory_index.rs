//! Semantic memory index.
//!
//! Similarity search and relationship traversal stay separate;
//! `build_context` combines them (search, then one hop of expansion).

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::retry::RetryPolicy;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    cosine_similarity, Direction, EntityRef, MemoryConfig, MemoryEntity, MemoryFilter, Metadata, RelatedEntity,
    RelationFilter, Relationship, ScoredEntity,
};
use crate::domain::ports::{EmbeddingProvider, MemoryRepository};

/// How strictly `link` checks its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Both endpoints must exist.
    #[default]
    Strict,
    /// Endpoints may dangle; used while bulk-importing.
    BulkImport,
}

/// Similarity hits plus one hop of relationships from each hit.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryContext {
    pub hits: Vec<ScoredEntity>,
    pub related: HashMap<String, Vec<RelatedEntity>>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Clone)]
pub struct MemoryIndex {
    repository: Arc<dyn MemoryRepository>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: MemoryConfig,
    retry: RetryPolicy,
}

impl MemoryIndex {
    pub fn new(
        repository: Arc<dyn MemoryRepository>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: MemoryConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            repository,
            embedder,
            config,
            retry,
        }
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.embedder.is_enabled()
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Embed `text`, or `None` when no provider is configured or it fails.
    pub async fn embed_text(&self, text: &str) -> Option<Vec<f32>> {
        if !self.embedder.is_enabled() {
            return None;
        }
        match self.embedder.embed(text).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => None,
            Err(err) => {
                warn!(provider = self.embedder.name(), error = %err, "Embedding failed, continuing without");
                None
            }
        }
    }

    /// Store or replace the entity keyed by `(entity_type, entity_id)`.
    /// Content without an embedding is embedded when a provider is set.
    #[instrument(skip(self, entity), fields(key = %entity.key()))]
    pub async fn upsert(&self, mut entity: MemoryEntity) -> DomainResult<MemoryEntity> {
        entity.validate().map_err(DomainError::ValidationFailed)?;
        if entity.embedding.is_none() {
            entity.embedding = self.embed_text(&entity.content).await;
        }
        let stored = self
            .retry
            .execute("memory.upsert", || self.repository.upsert_entity(&entity))
            .await?;
        debug!(embedded = stored.embedding.is_some(), "Memory entity upserted");
        Ok(stored)
    }

    pub async fn get(&self, key: &EntityRef) -> DomainResult<Option<MemoryEntity>> {
        self.retry
            .execute("memory.get", || self.repository.get_entity(key))
            .await
    }

    /// Entities ranked by descending cosine similarity to `query`.
    ///
    /// Scores below `threshold` are dropped; entities whose embedding has a
    /// different dimension are skipped. An empty query returns nothing.
    #[instrument(skip(self, query, filter), fields(dimension = query.len()))]
    pub async fn similarity_search(
        &self,
        query: &[f32],
        filter: &MemoryFilter,
        limit: usize,
        threshold: f32,
    ) -> DomainResult<Vec<ScoredEntity>> {
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(DomainError::ValidationFailed(format!(
                "Similarity threshold {threshold} must be within [-1, 1]"
            )));
        }
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .retry
            .execute("memory.list_embedded", || {
                self.repository.list_embedded(&filter.entity_types)
            })
            .await?;

        let mut skipped = 0usize;
        let mut hits: Vec<ScoredEntity> = candidates
            .into_iter()
            .filter(|entity| filter.matches(entity))
            .filter_map(|entity| {
                let score = entity
                    .embedding
                    .as_deref()
                    .and_then(|embedding| cosine_similarity(query, embedding));
                if score.is_none() {
                    skipped += 1;
                }
                score.map(|score| ScoredEntity { entity, score })
            })
            .filter(|hit| hit.score >= threshold)
            .collect();

        if skipped > 0 {
            debug!(skipped, "Skipped entities with incompatible embeddings");
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entity.key().cmp(&b.entity.key()))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Embed `text` and search with it. Without a provider the result is
    /// empty.
    pub async fn search_text(
        &self,
        text: &str,
        filter: &MemoryFilter,
        limit: usize,
        threshold: f32,
    ) -> DomainResult<Vec<ScoredEntity>> {
        match self.embed_text(text).await {
            Some(query) => self.similarity_search(&query, filter, limit, threshold).await,
            None => Ok(Vec::new()),
        }
    }

    /// Upsert the edge `source -[rel_type]-> target`.
    #[instrument(skip(self, source, target, metadata), fields(source = %source, target = %target))]
    pub async fn link(
        &self,
        source: EntityRef,
        target: EntityRef,
        rel_type: &str,
        metadata: Metadata,
        mode: LinkMode,
    ) -> DomainResult<Relationship> {
        let mut relationship = Relationship::new(source, target, rel_type);
        relationship.metadata = metadata;
        relationship.validate().map_err(DomainError::ValidationFailed)?;

        if mode == LinkMode::Strict {
            for endpoint in [&relationship.source, &relationship.target] {
                if self.get(endpoint).await?.is_none() {
                    return Err(DomainError::MemoryEntityNotFound {
                        entity_type: endpoint.entity_type.clone(),
                        entity_id: endpoint.entity_id.clone(),
                    });
                }
            }
        }

        self.retry
            .execute("memory.link", || self.repository.upsert_relationship(&relationship))
            .await
    }

    /// Outgoing and incoming edges of `key` matching `filter`, each paired
    /// with the stored entity at the other end.
    pub async fn related(
        &self,
        key: &EntityRef,
        filter: &RelationFilter,
    ) -> DomainResult<Vec<RelatedEntity>> {
        let edges = self
            .retry
            .execute("memory.relationships", || self.repository.relationships(key, filter))
            .await?;

        let others: Vec<EntityRef> = edges
            .iter()
            .map(|(rel, direction)| match direction {
                Direction::Outgoing => rel.target.clone(),
                Direction::Incoming => rel.source.clone(),
            })
            .collect();
        let entities: HashMap<EntityRef, MemoryEntity> = self
            .retry
            .execute("memory.get_entities", || self.repository.get_entities(&others))
            .await?
            .into_iter()
            .map(|entity| (entity.key(), entity))
            .collect();

        Ok(edges
            .into_iter()
            .zip(others)
            .map(|((relationship, direction), other)| RelatedEntity {
                relationship,
                direction,
                entity: entities.get(&other).cloned(),
            })
            .collect())
    }

    /// Similarity search followed by one hop of relationship expansion.
    pub async fn build_context(
        &self,
        query: &[f32],
        filter: &MemoryFilter,
        limit: usize,
        threshold: f32,
    ) -> DomainResult<MemoryContext> {
        let hits = self.similarity_search(query, filter, limit, threshold).await?;
        let mut related = HashMap::with_capacity(hits.len());
        for hit in &hits {
            let key = hit.entity.key();
            let neighbours = self.related(&key, &RelationFilter::default()).await?;
            if !neighbours.is_empty() {
                related.insert(key.to_string(), neighbours);
            }
        }
        Ok(MemoryContext { hits, related })
    }
}
