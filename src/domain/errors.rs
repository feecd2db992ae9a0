//! Domain errors for the Foreman orchestration core.

use thiserror::Error;
use uuid::Uuid;

use super::models::TaskStatus;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[Uuid]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_pending(pending: &[(Uuid, TaskStatus)]) -> String {
    pending
        .iter()
        .map(|(id, status)| format!("{id} ({})", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Coarse error classes callers branch on.
///
/// Every [`DomainError`] maps onto exactly one kind. Only `Transient`
/// errors are retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or logically invalid input. Never retried.
    Validation,
    /// Lost a race or the entity is not in a state that allows the operation.
    /// The caller re-reads state and retries or abandons.
    Conflict,
    /// A referenced id does not exist.
    NotFound,
    /// Storage failure or timeout. Retried with bounded backoff, then surfaced.
    Transient,
    /// Invariant violation detected at runtime. Halts automatic mutation
    /// of the affected entity.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

/// Domain-level errors that can occur in the orchestration core.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    #[error("Sprint not found: {0}")]
    SprintNotFound(Uuid),

    #[error("Message not found: {0}")]
    MessageNotFound(Uuid),

    #[error("Activity record not found: {0}")]
    ActivityNotFound(Uuid),

    #[error("Memory entity not found: {entity_type}/{entity_id}")]
    MemoryEntityNotFound { entity_type: String, entity_id: String },

    #[error("Invalid state transition for task {task_id} from {} to {}", .from.as_str(), .to.as_str())]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Invalid sprint transition for sprint {sprint_id} from {from} to {to}")]
    InvalidSprintTransition {
        sprint_id: Uuid,
        from: String,
        to: String,
    },

    #[error(
        "Assignment conflict on task {task_id}: current status {}, assignee {}",
        .status.as_str(),
        .assignee.as_deref().unwrap_or("none")
    )]
    AssignmentConflict {
        task_id: Uuid,
        status: TaskStatus,
        assignee: Option<String>,
    },

    #[error("Task {task_id} has unmet dependencies: {}", format_pending(.pending))]
    UnmetDependencies {
        task_id: Uuid,
        pending: Vec<(Uuid, TaskStatus)>,
    },

    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<Uuid>),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Duplicate {entity}: {id}")]
    Duplicate { entity: String, id: String },

    #[error("Transient storage failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("Invariant violation on {entity} {id}: {detail}")]
    InvariantViolation {
        entity: String,
        id: String,
        detail: String,
    },

    #[error("Task {0} is quarantined pending operator intervention")]
    Quarantined(Uuid),

    #[error("Message thread starting at {0} contains a cycle")]
    ThreadCycle(Uuid),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Embedding provider error: {0}")]
    EmbeddingFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Classify this error for propagation and retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailed(_) | Self::SerializationError(_) => ErrorKind::Validation,
            Self::TaskNotFound(_)
            | Self::ActorNotFound(_)
            | Self::SprintNotFound(_)
            | Self::MessageNotFound(_)
            | Self::ActivityNotFound(_)
            | Self::MemoryEntityNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. }
            | Self::InvalidSprintTransition { .. }
            | Self::AssignmentConflict { .. }
            | Self::UnmetDependencies { .. }
            | Self::DependencyCycle(_)
            | Self::ConcurrencyConflict { .. }
            | Self::Duplicate { .. } => ErrorKind::Conflict,
            Self::Transient { .. } | Self::EmbeddingFailed(_) => ErrorKind::Transient,
            Self::InvariantViolation { .. } | Self::Quarantined(_) | Self::ThreadCycle(_) => {
                ErrorKind::Fatal
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::Duplicate {
                    entity: db_err.table().unwrap_or("row").to_string(),
                    id: db_err.message().to_string(),
                };
            }
            if db_err.is_foreign_key_violation() || db_err.is_check_violation() {
                return Self::ValidationFailed(db_err.message().to_string());
            }
        }
        Self::transient("storage", err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
