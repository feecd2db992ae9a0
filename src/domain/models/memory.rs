//! Semantic memory domain model.
//!
//! Content items are indexed by `(entity_type, entity_id)` with an optional
//! embedding vector. Typed, directed relationships link items; similarity
//! finds candidates by meaning, relationships by declared structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::metadata::Metadata;

/// Key of a memory entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.entity_type.trim().is_empty() {
            return Err("Entity type cannot be empty".to_string());
        }
        if self.entity_id.trim().is_empty() {
            return Err("Entity id cannot be empty".to_string());
        }
        if self.entity_type.contains('/') {
            return Err(format!("Entity type '{}' cannot contain '/'", self.entity_type));
        }
        Ok(())
    }

    /// Parse the `type/id` form produced by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        let (entity_type, entity_id) = s.split_once('/')?;
        let parsed = Self::new(entity_type, entity_id);
        parsed.validate().ok().map(|()| parsed)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// An indexed content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntity {
    pub entity_type: String,
    /// Foreign key into whatever domain object this represents.
    pub entity_id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Metadata,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntity {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            content: content.into(),
            embedding: None,
            metadata: Metadata::default(),
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn key(&self) -> EntityRef {
        EntityRef::new(self.entity_type.clone(), self.entity_id.clone())
    }

    pub fn validate(&self) -> Result<(), String> {
        self.key().validate()?;
        if let Some(embedding) = &self.embedding {
            if embedding.is_empty() {
                return Err("Embedding cannot be an empty vector".to_string());
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                return Err("Embedding contains non-finite values".to_string());
            }
        }
        Ok(())
    }
}

/// A labeled, directed edge between two memory entities. Unique per
/// `(source, target, rel_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: EntityRef,
    pub target: EntityRef,
    /// e.g. "implements", "tests"
    pub rel_type: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(source: EntityRef, target: EntityRef, rel_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            source,
            target,
            rel_type: rel_type.into(),
            metadata: Metadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.source.validate()?;
        self.target.validate()?;
        if self.rel_type.trim().is_empty() {
            return Err("Relationship type cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Restricts similarity search results.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Any of these entity types. Empty means all.
    pub entity_types: Vec<String>,
    /// All of these tags must be present.
    pub tags: Vec<String>,
    /// Exact-match metadata fields.
    pub metadata: Map<String, Value>,
}

impl MemoryFilter {
    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_types.push(entity_type.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, entity: &MemoryEntity) -> bool {
        (self.entity_types.is_empty() || self.entity_types.contains(&entity.entity_type))
            && self.tags.iter().all(|tag| entity.tags.contains(tag))
            && entity.metadata.matches(&self.metadata)
    }
}

/// Edge direction relative to the entity being queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Restricts relationship traversal.
#[derive(Debug, Clone, Default)]
pub struct RelationFilter {
    /// Any of these relationship types. Empty means all.
    pub rel_types: Vec<String>,
    /// Only this direction. `None` returns both.
    pub direction: Option<Direction>,
    /// Related entity must be one of these types. Empty means all.
    pub entity_types: Vec<String>,
}

impl RelationFilter {
    pub fn with_rel_type(mut self, rel_type: impl Into<String>) -> Self {
        self.rel_types.push(rel_type.into());
        self
    }

    pub fn outgoing(mut self) -> Self {
        self.direction = Some(Direction::Outgoing);
        self
    }

    pub fn incoming(mut self) -> Self {
        self.direction = Some(Direction::Incoming);
        self
    }
}

/// A similarity hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntity {
    pub entity: MemoryEntity,
    pub score: f32,
}

/// One relationship paired with the entity at its other end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub relationship: Relationship,
    pub direction: Direction,
    /// `None` when the other endpoint dangles (bulk import).
    pub entity: Option<MemoryEntity>,
}

impl RelatedEntity {
    /// The key at the far end of the edge.
    pub fn other(&self) -> &EntityRef {
        match self.direction {
            Direction::Outgoing => &self.relationship.target,
            Direction::Incoming => &self.relationship.source,
        }
    }
}

/// Cosine similarity in `[-1, 1]`. `None` when dimensions differ or either
/// vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return None;
    }
    Some((dot / (mag_a.sqrt() * mag_b.sqrt())).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_none());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_entity_ref_display_parse() {
        let key = EntityRef::new("doc", "design/auth.md");
        assert_eq!(key.to_string(), "doc/design/auth.md");
        assert_eq!(EntityRef::parse("doc/design/auth.md"), Some(key));
        assert!(EntityRef::parse("nodelimiter").is_none());
    }

    #[test]
    fn test_filter_matches() {
        let entity = MemoryEntity::new("code", "src/lib.rs", "fn main() {}")
            .with_tag("rust")
            .with_metadata(Metadata::new().with_field("crate", "core"));
        assert!(MemoryFilter::default().matches(&entity));
        assert!(MemoryFilter::default().with_type("code").with_tag("rust").matches(&entity));
        assert!(!MemoryFilter::default().with_type("doc").matches(&entity));
        assert!(!MemoryFilter::default().with_tag("python").matches(&entity));
        assert!(MemoryFilter::default().with_metadata("crate", "core").matches(&entity));
        assert!(!MemoryFilter::default().with_metadata("crate", "cli").matches(&entity));
    }

    #[test]
    fn test_validate_embedding() {
        let ok = MemoryEntity::new("doc", "1", "x").with_embedding(vec![0.1, 0.2]);
        assert!(ok.validate().is_ok());
        let empty = MemoryEntity::new("doc", "1", "x").with_embedding(vec![]);
        assert!(empty.validate().is_err());
        let nan = MemoryEntity::new("doc", "1", "x").with_embedding(vec![f32::NAN]);
        assert!(nan.validate().is_err());
    }
}
