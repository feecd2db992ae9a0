//! Sprint planning: a pure selection over backlog items.
//!
//! Items are visited in a priority-aware topological order (Kahn's
//! algorithm with a max-heap). An item is selected when its effort fits the
//! remaining capacity and every dependency was selected before it.
//! Nothing here touches storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use uuid::Uuid;

use crate::domain::models::Task;

/// The fields of a backlog item the planner looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: Uuid,
    pub priority: u8,
    pub estimated_effort: u32,
    pub created_at: DateTime<Utc>,
    pub depends_on: Vec<Uuid>,
}

impl From<&Task> for PlanItem {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            priority: task.priority,
            estimated_effort: task.estimated_effort,
            created_at: task.created_at,
            depends_on: task.depends_on.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeferReason {
    /// Effort exceeds what is left of the capacity.
    OverCapacity { effort: u32, remaining: u32 },
    /// A dependency is in the item set but was not selected.
    DependencyNotSelected { dependency: Uuid },
    /// A dependency is not among the items at all.
    UnknownDependency { dependency: Uuid },
    /// The item sits on a dependency cycle.
    Cycle,
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverCapacity { effort, remaining } => {
                write!(f, "effort {effort} exceeds remaining capacity {remaining}")
            }
            Self::DependencyNotSelected { dependency } => {
                write!(f, "dependency {dependency} not selected")
            }
            Self::UnknownDependency { dependency } => {
                write!(f, "dependency {dependency} is not plannable")
            }
            Self::Cycle => f.write_str("dependency cycle"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredItem {
    pub id: Uuid,
    pub reason: DeferReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintPlan {
    /// Selected ids in execution order.
    pub selected: Vec<Uuid>,
    pub deferred: Vec<DeferredItem>,
    pub total_effort: u32,
    pub capacity: u32,
}

impl SprintPlan {
    pub fn is_selected(&self, id: Uuid) -> bool {
        self.selected.contains(&id)
    }
}

// Heap key: higher priority first, then older, then smaller id.
#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    priority: u8,
    created_at: Reverse<DateTime<Utc>>,
    id: Reverse<Uuid>,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<&PlanItem> for Candidate {
    fn from(item: &PlanItem) -> Self {
        Self {
            priority: item.priority,
            created_at: Reverse(item.created_at),
            id: Reverse(item.id),
        }
    }
}

/// Select and order `items` under `capacity`.
pub fn plan_sprint(items: &[PlanItem], capacity: u32) -> SprintPlan {
    let by_id: HashMap<Uuid, &PlanItem> = items.iter().map(|item| (item.id, item)).collect();
    let mut in_degree: HashMap<Uuid, usize> = HashMap::with_capacity(by_id.len());
    let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

    for item in by_id.values() {
        let mut seen = HashSet::new();
        let known_deps = item
            .depends_on
            .iter()
            .filter(|dep| by_id.contains_key(*dep) && seen.insert(**dep));
        let mut degree = 0;
        for dep in known_deps {
            dependents.entry(*dep).or_default().push(item.id);
            degree += 1;
        }
        in_degree.insert(item.id, degree);
    }

    let mut heap: BinaryHeap<Candidate> = by_id
        .values()
        .filter(|item| in_degree.get(&item.id) == Some(&0))
        .map(|item| Candidate::from(*item))
        .collect();

    let mut selected = Vec::new();
    let mut selected_set = HashSet::new();
    let mut deferred = Vec::new();
    let mut visited = HashSet::new();
    let mut remaining = capacity;

    while let Some(candidate) = heap.pop() {
        let id = candidate.id.0;
        let Some(item) = by_id.get(&id) else { continue };
        visited.insert(id);

        let unknown = item.depends_on.iter().find(|dep| !by_id.contains_key(*dep));
        let unselected = item.depends_on.iter().find(|dep| !selected_set.contains(*dep));

        if let Some(dep) = unknown {
            deferred.push(DeferredItem {
                id,
                reason: DeferReason::UnknownDependency { dependency: *dep },
            });
        } else if let Some(dep) = unselected {
            deferred.push(DeferredItem {
                id,
                reason: DeferReason::DependencyNotSelected { dependency: *dep },
            });
        } else if item.estimated_effort > remaining {
            deferred.push(DeferredItem {
                id,
                reason: DeferReason::OverCapacity {
                    effort: item.estimated_effort,
                    remaining,
                },
            });
        } else {
            remaining -= item.estimated_effort;
            selected.push(id);
            selected_set.insert(id);
        }

        for dependent in dependents.get(&id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    if let Some(next) = by_id.get(dependent) {
                        heap.push(Candidate::from(*next));
                    }
                }
            }
        }
    }

    // Whatever Kahn's algorithm never reached is on or behind a cycle.
    let mut stuck: Vec<Uuid> = by_id.keys().filter(|id| !visited.contains(*id)).copied().collect();
    stuck.sort_unstable();
    deferred.extend(stuck.into_iter().map(|id| DeferredItem {
        id,
        reason: DeferReason::Cycle,
    }));

    SprintPlan {
        selected,
        deferred,
        total_effort: capacity - remaining,
        capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(priority: u8, effort: u32, age_secs: i64) -> PlanItem {
        PlanItem {
            id: Uuid::new_v4(),
            priority,
            estimated_effort: effort,
            created_at: Utc::now() - Duration::seconds(age_secs),
            depends_on: Vec::new(),
        }
    }

    #[test]
    fn test_priority_then_age_order() {
        let low = item(1, 1, 100);
        let high = item(9, 1, 0);
        let old_mid = item(5, 1, 50);
        let new_mid = item(5, 1, 10);
        let plan = plan_sprint(&[low.clone(), new_mid.clone(), high.clone(), old_mid.clone()], 10);
        assert_eq!(plan.selected, vec![high.id, old_mid.id, new_mid.id, low.id]);
        assert_eq!(plan.total_effort, 4);
    }

    #[test]
    fn test_dependencies_come_first() {
        let base = item(1, 2, 0);
        let mut top = item(10, 2, 0);
        top.depends_on.push(base.id);
        let plan = plan_sprint(&[top.clone(), base.clone()], 10);
        assert_eq!(plan.selected, vec![base.id, top.id]);
    }

    #[test]
    fn test_capacity_ceiling_and_dependent_deferral() {
        let big = item(9, 8, 0);
        let mut child = item(8, 1, 0);
        child.depends_on.push(big.id);
        let small = item(1, 3, 0);
        let plan = plan_sprint(&[big.clone(), child.clone(), small.clone()], 5);

        assert_eq!(plan.selected, vec![small.id]);
        assert_eq!(plan.total_effort, 3);
        assert!(plan.deferred.contains(&DeferredItem {
            id: big.id,
            reason: DeferReason::OverCapacity { effort: 8, remaining: 5 },
        }));
        assert!(plan.deferred.contains(&DeferredItem {
            id: child.id,
            reason: DeferReason::DependencyNotSelected { dependency: big.id },
        }));
    }

    #[test]
    fn test_unknown_dependency_defers() {
        let ghost = Uuid::new_v4();
        let mut orphan = item(5, 1, 0);
        orphan.depends_on.push(ghost);
        let plan = plan_sprint(&[orphan.clone()], 10);
        assert!(plan.selected.is_empty());
        assert_eq!(
            plan.deferred[0].reason,
            DeferReason::UnknownDependency { dependency: ghost }
        );
    }

    #[test]
    fn test_cycle_members_deferred() {
        let mut a = item(5, 1, 0);
        let mut b = item(5, 1, 0);
        a.depends_on.push(b.id);
        b.depends_on.push(a.id);
        let free = item(1, 1, 0);
        let plan = plan_sprint(&[a.clone(), b.clone(), free.clone()], 10);
        assert_eq!(plan.selected, vec![free.id]);
        assert_eq!(plan.deferred.len(), 2);
        assert!(plan.deferred.iter().all(|d| d.reason == DeferReason::Cycle));
    }

    #[test]
    fn test_empty_input() {
        let plan = plan_sprint(&[], 10);
        assert!(plan.selected.is_empty());
        assert!(plan.deferred.is_empty());
        assert_eq!(plan.total_effort, 0);
    }
}
