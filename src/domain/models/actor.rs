//! Actor domain model.
//!
//! Actors are the autonomous units that receive assignments and messages.
//! They are never deleted, only deactivated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of the built-in orchestrator actor. It is the sender of every
/// message the orchestrator emits and the fallback receiver for alerts.
pub const SYSTEM_ACTOR_ID: &str = "orchestrator";

/// Tags describing what kinds of tasks an actor may be assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: impl Into<String>) -> bool {
        self.0.insert(normalize(&capability.into()))
    }

    pub fn contains(&self, capability: &str) -> bool {
        self.0.contains(&normalize(capability))
    }

    /// True when every capability in `required` is present.
    pub fn satisfies(&self, required: &Self) -> bool {
        required.0.is_subset(&self.0)
    }

    /// Capabilities in `required` that this set lacks.
    pub fn missing(&self, required: &Self) -> Vec<String> {
        required.0.difference(&self.0).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|s| normalize(&s.into())).collect())
    }
}

fn normalize(capability: &str) -> String {
    capability.trim().to_lowercase()
}

/// A registered actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    /// Stable identifier, e.g. `reviewer-1`.
    pub id: String,
    /// Role tag, e.g. `reviewer`. Informational; behaviour comes from the
    /// injected role handler, never from this string.
    pub role: String,
    /// What work this actor may accept.
    pub capabilities: CapabilitySet,
    /// Liveness flag. Inactive actors keep their history but receive no
    /// new assignments.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            role: role.into(),
            capabilities: CapabilitySet::new(),
            active: true,
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        }
    }

    /// The built-in orchestrator actor.
    pub fn system() -> Self {
        Self::new(SYSTEM_ACTOR_ID, "orchestrator")
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_ACTOR_ID
    }

    pub fn deactivate(&mut self) {
        let now = Utc::now();
        self.active = false;
        self.deactivated_at = Some(now);
        self.updated_at = now;
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Actor id cannot be empty".to_string());
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(format!("Actor id '{}' cannot contain whitespace", self.id));
        }
        if self.role.trim().is_empty() {
            return Err("Actor role cannot be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_are_normalized() {
        let caps: CapabilitySet = ["Rust", " review "].into_iter().collect();
        assert!(caps.contains("rust"));
        assert!(caps.contains("REVIEW"));
        assert_eq!(caps.len(), 2);
    }

    #[test]
    fn test_satisfies_and_missing() {
        let have: CapabilitySet = ["rust", "sql"].into_iter().collect();
        let need: CapabilitySet = ["rust", "frontend"].into_iter().collect();
        assert!(!have.satisfies(&need));
        assert_eq!(have.missing(&need), vec!["frontend".to_string()]);
        assert!(have.satisfies(&CapabilitySet::new()));
    }

    #[test]
    fn test_deactivate() {
        let mut actor = Actor::new("a1", "implementer");
        assert!(actor.active);
        actor.deactivate();
        assert!(!actor.active);
        assert!(actor.deactivated_at.is_some());
    }

    #[test]
    fn test_validate() {
        assert!(Actor::new("a1", "tester").validate().is_ok());
        assert!(Actor::new("", "tester").validate().is_err());
        assert!(Actor::new("a 1", "tester").validate().is_err());
        assert!(Actor::new("a1", " ").validate().is_err());
    }
}
