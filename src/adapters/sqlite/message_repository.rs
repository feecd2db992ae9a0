//! SQLite implementation of the MessageRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_timestamp, parse_datetime, parse_json_or_default, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Message, MessageCursor, MessageFilter, MessageIntent, Metadata};
use crate::domain::ports::MessageRepository;

#[derive(Clone)]
pub struct SqliteMessageRepository {
    pool: SqlitePool,
}

impl SqliteMessageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for SqliteMessageRepository {
    async fn insert(&self, message: &Message) -> DomainResult<Message> {
        let mut conn = self.pool.acquire().await?;
        insert_message(&mut conn, message).await
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_id(&mut conn, id).await
    }

    async fn get_by_idempotency_key(&self, sender: &str, key: &str) -> DomainResult<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        fetch_by_key(&mut conn, sender, key).await
    }

    async fn list_for_receiver(&self, receiver: &str, filter: &MessageFilter) -> DomainResult<Vec<Message>> {
        let mut query = String::from("SELECT * FROM messages WHERE receiver = ?");
        let mut bindings: Vec<String> = vec![receiver.to_string()];

        if let Some(since) = filter.since {
            query.push_str(" AND created_at >= ?");
            bindings.push(format_timestamp(since));
        }
        if let Some(until) = filter.until {
            query.push_str(" AND created_at < ?");
            bindings.push(format_timestamp(until));
        }
        if let Some(sender) = &filter.sender {
            query.push_str(" AND sender = ?");
            bindings.push(sender.clone());
        }
        if let Some(intent) = &filter.intent {
            query.push_str(" AND intent = ?");
            bindings.push(intent.as_str().to_string());
        }
        if let Some(task_id) = filter.related_task {
            query.push_str(" AND related_task = ?");
            bindings.push(task_id.to_string());
        }
        if let Some(cursor) = filter.after {
            query.push_str(&format!(" AND seq > {}", cursor.seq));
            // Page in commit order so the marker never skips a late commit.
            query.push_str(" ORDER BY seq ASC");
        } else {
            query.push_str(" ORDER BY created_at ASC, seq ASC");
        }
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, MessageRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<DomainResult<Vec<_>>>()?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(messages)
    }

    async fn history(
        &self,
        actor_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: Option<u32>,
    ) -> DomainResult<Vec<Message>> {
        let mut query = String::from("SELECT * FROM messages WHERE (sender = ? OR receiver = ?)");
        let mut bindings: Vec<String> = vec![actor_id.to_string(), actor_id.to_string()];

        if let Some(since) = since {
            query.push_str(" AND created_at >= ?");
            bindings.push(format_timestamp(since));
        }
        if let Some(until) = until {
            query.push_str(" AND created_at < ?");
            bindings.push(format_timestamp(until));
        }
        query.push_str(" ORDER BY created_at ASC, seq ASC");
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, MessageRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Message::try_from).collect()
    }

    async fn get_cursor(&self, actor_id: &str) -> DomainResult<Option<MessageCursor>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT last_created_at, last_seq FROM actor_cursors WHERE actor_id = ?")
                .bind(actor_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(created_at, seq)| {
            Ok(MessageCursor {
                created_at: parse_datetime(&created_at)?,
                seq,
            })
        })
        .transpose()
    }

    async fn advance_cursor(&self, actor_id: &str, cursor: MessageCursor) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO actor_cursors (actor_id, last_created_at, last_seq, updated_at)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(actor_id) DO UPDATE SET
                last_created_at = excluded.last_created_at,
                last_seq = excluded.last_seq,
                updated_at = excluded.updated_at
              WHERE excluded.last_seq > actor_cursors.last_seq",
        )
        .bind(actor_id)
        .bind(format_timestamp(cursor.created_at))
        .bind(cursor.seq)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Insert on an open connection or transaction and return the stored row.
///
/// A duplicate `(sender, idempotency_key)` resolves to the stored original.
pub(super) async fn insert_message(conn: &mut SqliteConnection, message: &Message) -> DomainResult<Message> {
    let metadata_json = serde_json::to_string(&message.metadata)?;

    // The timestamp is clamped inside the statement so concurrent senders
    // on the same pair cannot interleave out of order.
    let result = sqlx::query(
        r"INSERT INTO messages (id, sender, receiver, intent, body, related_task, parent_id,
          embedding_ref, idempotency_key, metadata, created_at)
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
            MAX(?, COALESCE((SELECT MAX(created_at) FROM messages WHERE sender = ? AND receiver = ?), '')))
          ON CONFLICT DO NOTHING",
    )
    .bind(message.id.to_string())
    .bind(&message.sender)
    .bind(&message.receiver)
    .bind(message.intent.as_str())
    .bind(&message.body)
    .bind(message.related_task.map(|id| id.to_string()))
    .bind(message.parent_id.map(|id| id.to_string()))
    .bind(&message.embedding_ref)
    .bind(&message.idempotency_key)
    .bind(&metadata_json)
    .bind(format_timestamp(message.created_at))
    .bind(&message.sender)
    .bind(&message.receiver)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        if let Some(key) = &message.idempotency_key {
            if let Some(existing) = fetch_by_key(conn, &message.sender, key).await? {
                return Ok(existing);
            }
        }
        if let Some(existing) = fetch_by_id(conn, message.id).await? {
            return Ok(existing);
        }
        return Err(DomainError::Duplicate {
            entity: "message".to_string(),
            id: message.id.to_string(),
        });
    }

    fetch_by_id(conn, message.id)
        .await?
        .ok_or(DomainError::MessageNotFound(message.id))
}

async fn fetch_by_id(conn: &mut SqliteConnection, id: Uuid) -> DomainResult<Option<Message>> {
    let row: Option<MessageRow> = sqlx::query_as("SELECT * FROM messages WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(Message::try_from).transpose()
}

async fn fetch_by_key(conn: &mut SqliteConnection, sender: &str, key: &str) -> DomainResult<Option<Message>> {
    let row: Option<MessageRow> =
        sqlx::query_as("SELECT * FROM messages WHERE sender = ? AND idempotency_key = ?")
            .bind(sender)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;

    row.map(Message::try_from).transpose()
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    seq: i64,
    id: String,
    sender: String,
    receiver: String,
    intent: String,
    body: String,
    related_task: Option<String>,
    parent_id: Option<String>,
    embedding_ref: Option<String>,
    idempotency_key: Option<String>,
    metadata: Option<String>,
    created_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = DomainError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let intent = MessageIntent::parse(&row.intent).map_err(DomainError::SerializationError)?;
        let metadata: Metadata = parse_json_or_default(row.metadata)?;

        Ok(Message {
            id: parse_uuid(&row.id)?,
            sender: row.sender,
            receiver: row.receiver,
            intent,
            body: row.body,
            related_task: parse_optional_uuid(row.related_task)?,
            parent_id: parse_optional_uuid(row.parent_id)?,
            embedding_ref: row.embedding_ref,
            idempotency_key: row.idempotency_key,
            metadata,
            created_at: parse_datetime(&row.created_at)?,
            seq: row.seq,
        })
    }
}
