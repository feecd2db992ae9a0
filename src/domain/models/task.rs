//! Task domain model.
//!
//! Tasks are discrete units of work that actors execute.
//! They form a DAG with dependencies and move through a fixed lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actor::CapabilitySet;
use super::metadata::Metadata;

/// Highest accepted priority value. Higher is more urgent.
pub const MAX_PRIORITY: u8 = 10;

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, not yet assigned
    Backlog,
    /// Held by exactly one actor, work not started
    Assigned,
    /// Actor is working on it
    InProgress,
    /// Work finished, awaiting review
    Review,
    /// Accepted
    Done,
    /// Stuck; keeps its assignee until reassigned or resumed
    Blocked,
    /// Abandoned
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Backlog
    }
}

impl TaskStatus {
    pub const ALL: [Self; 7] = [
        Self::Backlog,
        Self::Assigned,
        Self::InProgress,
        Self::Review,
        Self::Done,
        Self::Blocked,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "backlog" => Some(Self::Backlog),
            "assigned" => Some(Self::Assigned),
            "in_progress" | "inprogress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "done" => Some(Self::Done),
            "blocked" => Some(Self::Blocked),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// States `AssignTask` may start from.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Self::Backlog | Self::Blocked)
    }

    /// States in which an actor is expected to make progress; these are
    /// scanned for stalls.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }

    /// States that must carry an assignee.
    pub fn requires_assignee(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress | Self::Review)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Backlog => &[Self::Assigned, Self::Cancelled],
            Self::Assigned => &[Self::InProgress, Self::Blocked, Self::Cancelled],
            Self::InProgress => &[Self::Review, Self::Done, Self::Blocked, Self::Cancelled],
            Self::Review => &[Self::Done, Self::Cancelled],
            // Leaving BLOCKED goes back through assignment.
            Self::Blocked => &[Self::Assigned, Self::Cancelled],
            Self::Done | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type of artifact produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    File,
    Code,
    Document,
    Data,
    Other,
}

/// Reference to an artifact related to a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// URI (e.g., repo://path/to/file)
    pub uri: String,
    pub artifact_type: ArtifactType,
    pub checksum: Option<String>,
}

/// Input accepted by task creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Client-chosen id, needed when a batch references its own members.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub estimated_effort: u32,
    pub created_by: String,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    #[serde(default)]
    pub sprint_id: Option<Uuid>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub required_capabilities: CapabilitySet,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl TaskSpec {
    pub fn new(title: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            created_by: created_by.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_effort(mut self, estimated_effort: u32) -> Self {
        self.estimated_effort = estimated_effort;
        self
    }

    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.depends_on.contains(&task_id) {
            self.depends_on.push(task_id);
        }
        self
    }

    pub fn with_sprint(mut self, sprint_id: Uuid) -> Self {
        self.sprint_id = Some(sprint_id);
        self
    }

    pub fn with_required_capability(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A discrete unit of work tracked through the status lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// 0..=10, higher is more urgent
    pub priority: u8,
    pub status: TaskStatus,
    pub estimated_effort: u32,
    pub actual_effort: Option<u32>,
    /// Actor that created the task
    pub created_by: String,
    /// At most one actor holds the task
    pub assignee: Option<String>,
    /// Task IDs this depends on
    pub depends_on: Vec<Uuid>,
    pub sprint_id: Option<Uuid>,
    pub artifacts: Vec<ArtifactRef>,
    pub required_capabilities: CapabilitySet,
    pub metadata: Metadata,
    /// Set when an invariant violation was observed; blocks automatic mutation.
    pub quarantined: bool,
    /// Version for compare-and-swap updates
    pub version: u64,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time `status` changed; drives stall detection
    pub status_changed_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(title: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self::from_spec(TaskSpec::new(title, created_by))
    }

    pub fn from_spec(spec: TaskSpec) -> Self {
        let now = Utc::now();
        let id = spec.id.unwrap_or_else(Uuid::new_v4);
        let mut depends_on = Vec::with_capacity(spec.depends_on.len());
        for dep in spec.depends_on {
            if !depends_on.contains(&dep) {
                depends_on.push(dep);
            }
        }
        Self {
            id,
            title: spec.title,
            description: spec.description,
            priority: spec.priority,
            status: TaskStatus::Backlog,
            estimated_effort: spec.estimated_effort,
            actual_effort: None,
            created_by: spec.created_by,
            assignee: None,
            depends_on,
            sprint_id: spec.sprint_id,
            artifacts: spec.artifacts,
            required_capabilities: spec.required_capabilities,
            metadata: spec.metadata,
            quarantined: false,
            version: 1,
            idempotency_key: spec.idempotency_key,
            created_at: now,
            updated_at: now,
            status_changed_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.depends_on.contains(&task_id) && task_id != self.id {
            self.depends_on.push(task_id);
        }
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_effort(mut self, estimated_effort: u32) -> Self {
        self.estimated_effort = estimated_effort;
        self
    }

    pub fn with_sprint(mut self, sprint_id: Uuid) -> Self {
        self.sprint_id = Some(sprint_id);
        self
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Apply a status change to this in-memory copy.
    ///
    /// Stamps timestamps and bumps `version`; persistence is the caller's
    /// concern and must go through a compare-and-swap on the prior version.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            ));
        }

        let now = Utc::now();
        self.status = new_status;
        self.updated_at = now;
        self.status_changed_at = now;
        self.version += 1;

        match new_status {
            TaskStatus::InProgress if self.started_at.is_none() => self.started_at = Some(now),
            TaskStatus::Done => self.completed_at = Some(now),
            TaskStatus::Cancelled => {
                self.completed_at = Some(now);
                self.assignee = None;
            }
            _ => {}
        }

        Ok(())
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validate task.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Task title cannot be empty".to_string());
        }
        if self.created_by.trim().is_empty() {
            return Err("Task creator cannot be empty".to_string());
        }
        if self.priority > MAX_PRIORITY {
            return Err(format!(
                "Invalid priority: {} (must be 0-{MAX_PRIORITY})",
                self.priority
            ));
        }
        if self.depends_on.contains(&self.id) {
            return Err("Task cannot depend on itself".to_string());
        }
        Ok(())
    }

    /// Check the status/assignee pairing.
    ///
    /// A violation means the store holds a state no legal operation can
    /// produce.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.status.requires_assignee() && self.assignee.is_none() {
            return Err(format!(
                "status {} without an assignee",
                self.status.as_str()
            ));
        }
        if self.status == TaskStatus::Backlog && self.assignee.is_some() {
            return Err(format!(
                "status backlog with assignee {}",
                self.assignee.as_deref().unwrap_or_default()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("Implement login", "planner");
        assert_eq!(task.title, "Implement login");
        assert_eq!(task.status, TaskStatus::Backlog);
        assert!(task.assignee.is_none());
        assert_eq!(task.version, 1);
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in TaskStatus::ALL {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("IN-PROGRESS"), Some(TaskStatus::InProgress));
        assert_eq!(TaskStatus::from_str("canceled"), Some(TaskStatus::Cancelled));
        assert_eq!(TaskStatus::from_str("nope"), None);
    }

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(Backlog.can_transition_to(Assigned));
        assert!(!Backlog.can_transition_to(InProgress));
        assert!(Assigned.can_transition_to(Blocked));
        assert!(InProgress.can_transition_to(Done));
        assert!(Review.can_transition_to(Done));
        assert!(!Review.can_transition_to(InProgress));
        assert!(!Blocked.can_transition_to(InProgress));
        assert!(Blocked.can_transition_to(Assigned));
        assert!(!Done.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Backlog));
        for status in TaskStatus::ALL {
            if !status.is_terminal() {
                assert!(status.can_transition_to(Cancelled), "{status} -> cancelled");
            }
        }
    }

    #[test]
    fn test_task_state_transitions() {
        let mut task = Task::new("Test", "planner");
        task.assignee = Some("a1".to_string());
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.transition_to(TaskStatus::InProgress).unwrap();
        assert!(task.started_at.is_some());
        task.transition_to(TaskStatus::Done).unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.is_terminal());
        assert_eq!(task.version, 4);
        assert!(task.transition_to(TaskStatus::InProgress).is_err());
    }

    #[test]
    fn test_cancel_clears_assignee() {
        let mut task = Task::new("Test", "planner");
        task.assignee = Some("a1".to_string());
        task.transition_to(TaskStatus::Assigned).unwrap();
        task.transition_to(TaskStatus::Cancelled).unwrap();
        assert!(task.assignee.is_none());
    }

    #[test]
    fn test_task_validation() {
        assert!(Task::new("", "planner").validate().is_err());
        assert!(Task::new("Valid", "").validate().is_err());
        assert!(Task::new("Valid", "planner").with_priority(11).validate().is_err());
        let mut task = Task::new("Valid", "planner");
        task.depends_on.push(task.id);
        assert!(task.validate().is_err());
        assert!(Task::new("Valid", "planner").validate().is_ok());
    }

    #[test]
    fn test_spec_deduplicates_dependencies() {
        let dep = Uuid::new_v4();
        let mut spec = TaskSpec::new("T", "planner");
        spec.depends_on = vec![dep, dep];
        let task = Task::from_spec(spec);
        assert_eq!(task.depends_on, vec![dep]);
    }

    #[test]
    fn test_invariants() {
        let mut task = Task::new("T", "planner");
        assert!(task.check_invariants().is_ok());
        task.assignee = Some("a1".to_string());
        assert!(task.check_invariants().is_err());
        task.status = TaskStatus::Assigned;
        assert!(task.check_invariants().is_ok());
        task.assignee = None;
        assert!(task.check_invariants().is_err());
    }
}
