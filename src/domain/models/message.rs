//! Inter-actor message protocol models.
//!
//! Messages are immutable once persisted. Threads are formed by
//! `parent_id` links; the store assigns a monotonic `seq` used together
//! with the timestamp as a delivery cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::Metadata;

/// What a message asks of, or tells, its receiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MessageIntent {
    Request,
    Inform,
    Propose,
    Confirm,
    Alert,
    /// An assignment was made to the receiver.
    TaskAssigned,
    /// A task the receiver holds or owns changed status.
    StatusChanged,
    /// Domain-specific intent, lowercase `snake_case`.
    Extension(String),
}

impl MessageIntent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Request => "request",
            Self::Inform => "inform",
            Self::Propose => "propose",
            Self::Confirm => "confirm",
            Self::Alert => "alert",
            Self::TaskAssigned => "task_assigned",
            Self::StatusChanged => "status_changed",
            Self::Extension(name) => name,
        }
    }

    /// Parse an intent name. Unknown but well-formed names become
    /// extensions; malformed names are rejected.
    pub fn parse(s: &str) -> Result<Self, String> {
        let normalized = s.trim().to_lowercase();
        Ok(match normalized.as_str() {
            "request" => Self::Request,
            "inform" => Self::Inform,
            "propose" => Self::Propose,
            "confirm" => Self::Confirm,
            "alert" => Self::Alert,
            "task_assigned" | "task_assignment" => Self::TaskAssigned,
            "status_changed" => Self::StatusChanged,
            _ => {
                let well_formed = !normalized.is_empty()
                    && normalized.len() <= 64
                    && normalized
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
                    && normalized.starts_with(|c: char| c.is_ascii_lowercase());
                if !well_formed {
                    return Err(format!("Invalid message intent: '{s}'"));
                }
                Self::Extension(normalized)
            }
        })
    }

    pub fn is_extension(&self) -> bool {
        matches!(self, Self::Extension(_))
    }
}

impl std::fmt::Display for MessageIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MessageIntent> for String {
    fn from(intent: MessageIntent) -> Self {
        intent.as_str().to_string()
    }
}

impl TryFrom<String> for MessageIntent {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// A structured message between two registered actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender: String,
    pub receiver: String,
    pub intent: MessageIntent,
    pub body: String,
    /// Task this message is about, if any.
    pub related_task: Option<Uuid>,
    /// Message this replies to.
    pub parent_id: Option<Uuid>,
    /// Memory entity key (`message/<id>`) holding the body's embedding.
    pub embedding_ref: Option<String>,
    /// Re-sending with the same key returns the original message.
    pub idempotency_key: Option<String>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    /// Store-assigned sequence; 0 until persisted.
    pub seq: i64,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        intent: MessageIntent,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            receiver: receiver.into(),
            intent,
            body: body.into(),
            related_task: None,
            parent_id: None,
            embedding_ref: None,
            idempotency_key: None,
            metadata: Metadata::default(),
            created_at: Utc::now(),
            seq: 0,
        }
    }

    /// Build a reply addressed back to the sender of `parent`.
    pub fn reply_to(parent: &Self, intent: MessageIntent, body: impl Into<String>) -> Self {
        let mut reply = Self::new(parent.receiver.clone(), parent.sender.clone(), intent, body);
        reply.parent_id = Some(parent.id);
        reply.related_task = parent.related_task;
        reply
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.related_task = Some(task_id);
        self
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn cursor(&self) -> MessageCursor {
        MessageCursor {
            created_at: self.created_at,
            seq: self.seq,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sender.trim().is_empty() {
            return Err("Message sender cannot be empty".to_string());
        }
        if self.receiver.trim().is_empty() {
            return Err("Message receiver cannot be empty".to_string());
        }
        if self.parent_id == Some(self.id) {
            return Err("Message cannot reply to itself".to_string());
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err("Idempotency key cannot be blank".to_string());
            }
        }
        Ok(())
    }
}

/// High-water mark of processed messages for one actor.
///
/// `seq` is authoritative: it is assigned at commit, so a message committed
/// after the marker always has a larger `seq` even if its timestamp is older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCursor {
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

impl MessageCursor {
    /// Marker covering a whole batch: the message with the largest `seq`,
    /// whatever the batch's display order.
    pub fn covering(messages: &[Message]) -> Option<Self> {
        messages.iter().max_by_key(|m| m.seq).map(Message::cursor)
    }
}

/// Filters for `Receive`. Results are always in ascending timestamp order.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub sender: Option<String>,
    pub intent: Option<MessageIntent>,
    pub related_task: Option<Uuid>,
    /// Only messages committed after this cursor.
    pub after: Option<MessageCursor>,
    pub limit: Option<u32>,
}

impl MessageFilter {
    pub fn after(cursor: Option<MessageCursor>) -> Self {
        Self {
            after: cursor,
            ..Default::default()
        }
    }

    pub fn with_intent(mut self, intent: MessageIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.related_task = Some(task_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parse() {
        assert_eq!(MessageIntent::parse("ALERT").unwrap(), MessageIntent::Alert);
        assert_eq!(
            MessageIntent::parse("task_assignment").unwrap(),
            MessageIntent::TaskAssigned
        );
        assert_eq!(
            MessageIntent::parse("review_requested").unwrap(),
            MessageIntent::Extension("review_requested".to_string())
        );
        assert!(MessageIntent::parse("").is_err());
        assert!(MessageIntent::parse("has space").is_err());
        assert!(MessageIntent::parse("9lives").is_err());
    }

    #[test]
    fn test_intent_serde_as_string() {
        let json = serde_json::to_string(&MessageIntent::StatusChanged).unwrap();
        assert_eq!(json, "\"status_changed\"");
        let back: MessageIntent = serde_json::from_str("\"handoff\"").unwrap();
        assert_eq!(back, MessageIntent::Extension("handoff".to_string()));
        assert!(serde_json::from_str::<MessageIntent>("\"Bad Intent\"").is_err());
    }

    #[test]
    fn test_reply_swaps_parties() {
        let task = Uuid::new_v4();
        let m1 = Message::new("a1", "a2", MessageIntent::Request, "review?").with_task(task);
        let m2 = Message::reply_to(&m1, MessageIntent::Confirm, "on it");
        assert_eq!(m2.sender, "a2");
        assert_eq!(m2.receiver, "a1");
        assert_eq!(m2.parent_id, Some(m1.id));
        assert_eq!(m2.related_task, Some(task));
    }

    #[test]
    fn test_covering_cursor_uses_largest_seq() {
        let now = Utc::now();
        let mut late_commit = Message::new("a3", "a2", MessageIntent::Inform, "skewed clock");
        late_commit.seq = 2;
        late_commit.created_at = now - chrono::Duration::seconds(30);
        let mut early_commit = Message::new("a1", "a2", MessageIntent::Inform, "first");
        early_commit.seq = 1;
        early_commit.created_at = now;

        let cursor = MessageCursor::covering(&[late_commit.clone(), early_commit]).unwrap();
        assert_eq!(cursor, late_commit.cursor());
        assert!(MessageCursor::covering(&[]).is_none());
    }

    #[test]
    fn test_validate() {
        let mut msg = Message::new("a1", "a2", MessageIntent::Inform, "hi");
        assert!(msg.validate().is_ok());
        msg.parent_id = Some(msg.id);
        assert!(msg.validate().is_err());
        let blank = Message::new(" ", "a2", MessageIntent::Inform, "hi");
        assert!(blank.validate().is_err());
    }
}
