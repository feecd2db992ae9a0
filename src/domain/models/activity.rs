//! Activity (audit) record model.
//!
//! Records are append-only. A correction is a new record whose `corrects`
//! field points at the original.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of action a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    TaskCreated,
    TaskAssigned,
    StatusChanged,
    DependencyAdded,
    StallDetected,
    MessageSent,
    MemoryUpdated,
    ActorRegistered,
    ActorUpdated,
    SprintChanged,
    Decision,
    WorkStarted,
    WorkFinished,
    WorkFailed,
    InvariantViolation,
    Correction,
}

impl ActivityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskAssigned => "task_assigned",
            Self::StatusChanged => "status_changed",
            Self::DependencyAdded => "dependency_added",
            Self::StallDetected => "stall_detected",
            Self::MessageSent => "message_sent",
            Self::MemoryUpdated => "memory_updated",
            Self::ActorRegistered => "actor_registered",
            Self::ActorUpdated => "actor_updated",
            Self::SprintChanged => "sprint_changed",
            Self::Decision => "decision",
            Self::WorkStarted => "work_started",
            Self::WorkFinished => "work_finished",
            Self::WorkFailed => "work_failed",
            Self::InvariantViolation => "invariant_violation",
            Self::Correction => "correction",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "task_created" => Self::TaskCreated,
            "task_assigned" => Self::TaskAssigned,
            "status_changed" => Self::StatusChanged,
            "dependency_added" => Self::DependencyAdded,
            "stall_detected" => Self::StallDetected,
            "message_sent" => Self::MessageSent,
            "memory_updated" => Self::MemoryUpdated,
            "actor_registered" => Self::ActorRegistered,
            "actor_updated" => Self::ActorUpdated,
            "sprint_changed" => Self::SprintChanged,
            "decision" => Self::Decision,
            "work_started" => Self::WorkStarted,
            "work_finished" => Self::WorkFinished,
            "work_failed" => Self::WorkFailed,
            "invariant_violation" => Self::InvariantViolation,
            "correction" => Self::Correction,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// One immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    pub category: ActivityCategory,
    pub description: String,
    /// Reasoning trace behind a decision.
    pub reasoning: Option<String>,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub duration_ms: Option<u64>,
    pub outcome: Outcome,
    pub related_task: Option<Uuid>,
    /// The record this one corrects.
    pub corrects: Option<Uuid>,
}

impl ActivityRecord {
    pub fn new(
        actor_id: impl Into<String>,
        category: ActivityCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor_id.into(),
            timestamp: Utc::now(),
            category,
            description: description.into(),
            reasoning: None,
            input: serde_json::Value::Null,
            output: serde_json::Value::Null,
            duration_ms: None,
            outcome: Outcome::Success,
            related_task: None,
            corrects: None,
        }
    }

    pub fn with_task(mut self, task_id: Uuid) -> Self {
        self.related_task = Some(task_id);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: serde_json::Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn failed(mut self) -> Self {
        self.outcome = Outcome::Failure;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.actor_id.trim().is_empty() {
            return Err("Activity actor cannot be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("Activity description cannot be empty".to_string());
        }
        if self.corrects == Some(self.id) {
            return Err("Activity record cannot correct itself".to_string());
        }
        Ok(())
    }
}

/// Filters for activity queries. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    pub actor_id: Option<String>,
    pub category: Option<ActivityCategory>,
    pub related_task: Option<Uuid>,
    pub outcome: Option<Outcome>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ActivityFilter {
    pub fn for_task(task_id: Uuid) -> Self {
        Self {
            related_task: Some(task_id),
            ..Default::default()
        }
    }

    pub fn for_actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: ActivityCategory) -> Self {
        self.category = Some(category);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}
