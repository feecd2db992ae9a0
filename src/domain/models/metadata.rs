//! Versioned metadata envelope.
//!
//! Every entity carries metadata as a typed, versioned document. Fields
//! this build does not know about are kept in `extra` and written back
//! verbatim so the audit trail never loses data written by a newer peer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current metadata schema version written by this build.
pub const METADATA_SCHEMA_VERSION: u32 = 1;

const fn default_schema_version() -> u32 {
    METADATA_SCHEMA_VERSION
}

/// Metadata document attached to tasks, messages, memory entities and
/// relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Schema version of the document.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    /// Origin of the entity (e.g. "cli", "importer").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Unknown fields, preserved opaquely.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            schema_version: METADATA_SCHEMA_VERSION,
            labels: Vec::new(),
            source: None,
            extra: Map::new(),
        }
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up a field by name. Known fields are addressable too.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "schema_version" => Some(Value::from(self.schema_version)),
            "source" => self.source.clone().map(Value::from),
            "labels" => Some(Value::from(self.labels.clone())),
            other => self.extra.get(other).cloned(),
        }
    }

    /// True when every `(key, value)` pair in `filter` matches exactly.
    pub fn matches(&self, filter: &Map<String, Value>) -> bool {
        filter
            .iter()
            .all(|(key, expected)| self.get(key).as_ref() == Some(expected))
    }
}
