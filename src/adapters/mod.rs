//! Port implementations: SQLite storage and HTTP embedding providers.

pub mod embeddings;
pub mod sqlite;
