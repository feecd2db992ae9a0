//! Sprint domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SprintStatus {
    Planning,
    Active,
    Closed,
}

impl Default for SprintStatus {
    fn default() -> Self {
        Self::Planning
    }
}

impl SprintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planning" => Some(Self::Planning),
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        matches!(
            (self, new_status),
            (Self::Planning, Self::Active) | (Self::Active, Self::Closed)
        )
    }
}

/// A bounded planning window grouping tasks toward a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: Uuid,
    pub goal: String,
    pub owner: String,
    pub status: SprintStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sprint {
    pub fn new(
        owner: impl Into<String>,
        goal: impl Into<String>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            owner: owner.into(),
            status: SprintStatus::Planning,
            starts_at,
            ends_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.goal.trim().is_empty() {
            return Err("Sprint goal cannot be empty".to_string());
        }
        if self.owner.trim().is_empty() {
            return Err("Sprint owner cannot be empty".to_string());
        }
        if self.ends_at <= self.starts_at {
            return Err("Sprint must end after it starts".to_string());
        }
        Ok(())
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.starts_at && at < self.ends_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_sprint_transitions() {
        assert!(SprintStatus::Planning.can_transition_to(SprintStatus::Active));
        assert!(SprintStatus::Active.can_transition_to(SprintStatus::Closed));
        assert!(!SprintStatus::Planning.can_transition_to(SprintStatus::Closed));
        assert!(!SprintStatus::Closed.can_transition_to(SprintStatus::Active));
    }

    #[test]
    fn test_sprint_window_validation() {
        let now = Utc::now();
        let sprint = Sprint::new("lead", "Ship auth", now, now + Duration::days(14));
        assert!(sprint.validate().is_ok());
        assert!(sprint.contains(now + Duration::days(1)));
        assert!(!sprint.contains(now + Duration::days(14)));

        let backwards = Sprint::new("lead", "Ship auth", now, now - Duration::days(1));
        assert!(backwards.validate().is_err());
    }
}
