//! Structured messages between registered actors.
//!
//! A message counts as delivered once persisted. Processing is tracked
//! separately through per-actor cursors. Each persisted message is also
//! announced on an in-process broadcast channel so local runtimes can wake
//! early; nothing depends on that announcement arriving.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::activity_recorder::ActivityRecorder;
use super::actor_registry::ActorRegistry;
use super::memory_index::MemoryIndex;
use super::retry::RetryPolicy;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivityCategory, ActivityRecord, EntityRef, MemoryEntity, Message, MessageCursor, MessageFilter,
};
use crate::domain::ports::MessageRepository;

const NOTICE_CAPACITY: usize = 256;

/// Entity type under which message bodies are indexed.
pub const MESSAGE_ENTITY_TYPE: &str = "message";

/// Announcement that a message was persisted for `receiver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageNotice {
    pub receiver: String,
    pub message_id: Uuid,
    pub seq: i64,
}

#[derive(Clone)]
pub struct MessageProtocol {
    repository: Arc<dyn MessageRepository>,
    actors: ActorRegistry,
    recorder: ActivityRecorder,
    /// Present when message bodies should be embedded.
    memory: Option<MemoryIndex>,
    notifier: broadcast::Sender<MessageNotice>,
    retry: RetryPolicy,
}

impl MessageProtocol {
    pub fn new(
        repository: Arc<dyn MessageRepository>,
        actors: ActorRegistry,
        recorder: ActivityRecorder,
        retry: RetryPolicy,
    ) -> Self {
        let (notifier, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            repository,
            actors,
            recorder,
            memory: None,
            notifier,
            retry,
        }
    }

    /// Embed message bodies into `memory` on send.
    pub fn with_embeddings(mut self, memory: MemoryIndex) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Receive announcements of newly persisted messages.
    pub fn subscribe(&self) -> broadcast::Receiver<MessageNotice> {
        self.notifier.subscribe()
    }

    /// Validate, persist and announce `message`.
    ///
    /// Re-sending with the same `(sender, idempotency_key)` returns the
    /// originally stored message. The stored timestamp may be later than the
    /// one supplied so that a sender/receiver pair never goes backwards.
    #[instrument(skip(self, message), fields(
        message_id = %message.id,
        sender = %message.sender,
        receiver = %message.receiver,
        intent = %message.intent
    ))]
    pub async fn send(&self, mut message: Message) -> DomainResult<Message> {
        message.validate().map_err(DomainError::ValidationFailed)?;
        self.actors.require(&message.sender).await?;
        self.actors.require(&message.receiver).await?;

        if let Some(key) = message.idempotency_key.as_deref() {
            let existing = self
                .retry
                .execute("message.get_by_key", || {
                    self.repository.get_by_idempotency_key(&message.sender, key)
                })
                .await?;
            if let Some(existing) = existing {
                debug!(original = %existing.id, "Duplicate send, returning original");
                return Ok(existing);
            }
        }

        if let Some(parent_id) = message.parent_id {
            if self.get(parent_id).await?.is_none() {
                return Err(DomainError::MessageNotFound(parent_id));
            }
        }

        if let Some(memory) = &self.memory {
            message.embedding_ref = self.index_body(memory, &message).await;
        }

        let stored = self
            .retry
            .execute("message.insert", || self.repository.insert(&message))
            .await?;

        // Lost race on the idempotency key: someone else stored it first.
        if stored.id != message.id {
            return Ok(stored);
        }

        self.announce(std::slice::from_ref(&stored));
        self.recorder.record(Self::delivery_record(&stored)).await?;

        Ok(stored)
    }

    /// Wake local subscribers for messages that are already persisted.
    pub fn announce(&self, stored: &[Message]) {
        for message in stored {
            let _ = self.notifier.send(MessageNotice {
                receiver: message.receiver.clone(),
                message_id: message.id,
                seq: message.seq,
            });
        }
    }

    /// The audit entry written for every delivered message.
    pub fn delivery_record(message: &Message) -> ActivityRecord {
        let mut record = ActivityRecord::new(
            message.sender.clone(),
            ActivityCategory::MessageSent,
            format!("{} -> {}: {}", message.sender, message.receiver, message.intent),
        )
        .with_output(serde_json::json!({
            "message_id": message.id,
            "embedded": message.embedding_ref.is_some(),
        }));
        if let Some(task_id) = message.related_task {
            record = record.with_task(task_id);
        }
        record
    }

    // Embedding failures degrade: the message is delivered without one.
    async fn index_body(&self, memory: &MemoryIndex, message: &Message) -> Option<String> {
        let embedding = memory.embed_text(&message.body).await?;
        let entity = MemoryEntity::new(MESSAGE_ENTITY_TYPE, message.id.to_string(), message.body.clone())
            .with_embedding(embedding)
            .with_tag(message.intent.as_str());
        match memory.upsert(entity).await {
            Ok(stored) => Some(stored.key().to_string()),
            Err(err) => {
                warn!(error = %err, "Could not store message embedding");
                None
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Option<Message>> {
        self.retry
            .execute("message.get", || self.repository.get(id))
            .await
    }

    /// Messages addressed to `actor_id`, ascending by timestamp.
    pub async fn receive(&self, actor_id: &str, filter: &MessageFilter) -> DomainResult<Vec<Message>> {
        self.actors.require(actor_id).await?;
        self.retry
            .execute("message.receive", || {
                self.repository.list_for_receiver(actor_id, filter)
            })
            .await
    }

    /// Messages not yet acknowledged by `actor_id`.
    pub async fn receive_unprocessed(&self, actor_id: &str, limit: u32) -> DomainResult<Vec<Message>> {
        let cursor = self.cursor(actor_id).await?;
        let filter = MessageFilter {
            limit: Some(limit),
            ..MessageFilter::after(cursor)
        };
        self.receive(actor_id, &filter).await
    }

    pub async fn cursor(&self, actor_id: &str) -> DomainResult<Option<MessageCursor>> {
        self.retry
            .execute("message.get_cursor", || self.repository.get_cursor(actor_id))
            .await
    }

    /// Move the processed marker forward. Never moves it back.
    pub async fn acknowledge(&self, actor_id: &str, cursor: MessageCursor) -> DomainResult<()> {
        self.retry
            .execute("message.advance_cursor", || {
                self.repository.advance_cursor(actor_id, cursor)
            })
            .await
    }

    /// The chain from the thread root down to `message_id`.
    #[instrument(skip(self))]
    pub async fn thread(&self, message_id: Uuid) -> DomainResult<Vec<Message>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(message_id);

        while let Some(id) = next {
            if !seen.insert(id) {
                error!(message_id = %message_id, repeated = %id, "Message thread contains a cycle");
                return Err(DomainError::ThreadCycle(message_id));
            }
            let message = self.get(id).await?.ok_or(DomainError::MessageNotFound(id))?;
            next = message.parent_id;
            chain.push(message);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Messages sent or received by `actor_id` in a window, ascending.
    pub async fn history(
        &self,
        actor_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> DomainResult<Vec<Message>> {
        self.actors.require(actor_id).await?;
        self.retry
            .execute("message.history", || {
                self.repository.history(actor_id, since, until, limit)
            })
            .await
    }

    /// Key of the memory entity holding a message's embedding.
    pub fn embedding_key(message_id: Uuid) -> EntityRef {
        EntityRef::new(MESSAGE_ENTITY_TYPE, message_id.to_string())
    }
}
