//! Memory index behavior through the assembled services: message
//! embedding, text search and relationship upserts.

mod common;

use std::sync::Arc;

use common::KeywordEmbedder;
use foreman::domain::models::{
    Config, EntityRef, MemoryEntity, MemoryFilter, Message, MessageIntent, Metadata, RelationFilter,
};
use foreman::domain::DomainError;
use foreman::services::{LinkMode, MessageProtocol, MESSAGE_ENTITY_TYPE};

fn embedding_config() -> Config {
    let mut config = Config::default();
    config.memory.embed_messages = true;
    config
}

#[tokio::test]
async fn test_sent_messages_are_searchable() {
    let embedder = Arc::new(KeywordEmbedder::new(&["database", "deploy", "parser"]));
    let foreman = common::foreman_with(embedding_config(), embedder).await;
    common::register(&foreman, "a1", "implementer", &[]).await;
    common::register(&foreman, "a2", "operator", &[]).await;

    let about_db = foreman
        .messages
        .send(Message::new("a1", "a2", MessageIntent::Inform, "database migration is ready"))
        .await
        .unwrap();
    let about_parser = foreman
        .messages
        .send(Message::new("a2", "a1", MessageIntent::Request, "parser needs review"))
        .await
        .unwrap();

    let key = MessageProtocol::embedding_key(about_db.id);
    assert_eq!(about_db.embedding_ref.as_deref(), Some(key.to_string().as_str()));
    let entity = foreman.memory.get(&key).await.unwrap().expect("indexed entity");
    assert_eq!(entity.content, "database migration is ready");
    assert!(entity.tags.contains("inform"));

    let hits = foreman
        .memory
        .search_text(
            "database",
            &MemoryFilter::default().with_type(MESSAGE_ENTITY_TYPE),
            5,
            0.5,
        )
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.entity.entity_id.as_str()).collect();
    assert_eq!(ids, vec![about_db.id.to_string().as_str()]);
    assert!(!ids.contains(&about_parser.id.to_string().as_str()));
}

#[tokio::test]
async fn test_messages_not_embedded_without_provider() {
    let foreman = common::foreman().await;
    common::register(&foreman, "a1", "implementer", &[]).await;
    common::register(&foreman, "a2", "operator", &[]).await;

    let sent = foreman
        .messages
        .send(Message::new("a1", "a2", MessageIntent::Inform, "database migration is ready"))
        .await
        .unwrap();
    assert!(sent.embedding_ref.is_none());
    assert!(foreman
        .memory
        .get(&MessageProtocol::embedding_key(sent.id))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_link_twice_keeps_one_edge_with_latest_metadata() {
    let foreman = common::foreman().await;
    let memory = &foreman.memory;
    let code = memory
        .upsert(MemoryEntity::new("file", "src/parser.rs", "parser"))
        .await
        .unwrap();
    let test = memory
        .upsert(MemoryEntity::new("file", "tests/parser.rs", "parser tests"))
        .await
        .unwrap();

    for confidence in [0.5, 0.9] {
        memory
            .link(
                test.key(),
                code.key(),
                "tests",
                Metadata::new().with_field("confidence", confidence),
                LinkMode::Strict,
            )
            .await
            .unwrap();
    }

    let related = memory
        .related(&code.key(), &RelationFilter::default())
        .await
        .unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(
        related[0].relationship.metadata.get("confidence"),
        Some(serde_json::json!(0.9))
    );
    assert_eq!(related[0].entity.as_ref().map(|e| e.key()), Some(test.key()));
}

#[tokio::test]
async fn test_strict_link_requires_both_endpoints() {
    let foreman = common::foreman().await;
    let code = foreman
        .memory
        .upsert(MemoryEntity::new("file", "src/lib.rs", "lib"))
        .await
        .unwrap();
    let missing = EntityRef::new("file", "src/missing.rs");

    let err = foreman
        .memory
        .link(code.key(), missing.clone(), "imports", Metadata::new(), LinkMode::Strict)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::MemoryEntityNotFound { .. }));

    foreman
        .memory
        .link(code.key(), missing, "imports", Metadata::new(), LinkMode::BulkImport)
        .await
        .unwrap();
    let related = foreman
        .memory
        .related(&code.key(), &RelationFilter::default())
        .await
        .unwrap();
    assert_eq!(related.len(), 1);
    assert!(related[0].entity.is_none());
}
