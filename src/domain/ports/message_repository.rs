//! Message store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Message, MessageCursor, MessageFilter};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Persist a message and return the stored row.
    ///
    /// The stored timestamp is clamped so it is never earlier than the
    /// latest message between the same sender and receiver. When the
    /// sender already used the message's idempotency key, nothing is
    /// written and the original message is returned.
    async fn insert(&self, message: &Message) -> DomainResult<Message>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Message>>;

    async fn get_by_idempotency_key(&self, sender: &str, key: &str) -> DomainResult<Option<Message>>;

    /// Messages addressed to `receiver`, ascending by timestamp.
    async fn list_for_receiver(&self, receiver: &str, filter: &MessageFilter) -> DomainResult<Vec<Message>>;

    /// Messages sent or received by `actor_id` in the window, ascending.
    async fn history(
        &self,
        actor_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> DomainResult<Vec<Message>>;

    async fn get_cursor(&self, actor_id: &str) -> DomainResult<Option<MessageCursor>>;

    /// Advance the processed marker. A cursor behind the stored one is ignored.
    async fn advance_cursor(&self, actor_id: &str, cursor: MessageCursor) -> DomainResult<()>;
}
