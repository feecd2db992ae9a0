//! Dependency graph checks over task ids.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::models::Task;

/// Resolves task dependency graphs and detects cycles.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Depth-first search keeping the current path so the cycle can be reported.
fn detect_cycle_util(
    node: Uuid,
    graph: &HashMap<Uuid, Vec<Uuid>>,
    visited: &mut HashSet<Uuid>,
    rec_stack: &mut HashSet<Uuid>,
    path: &mut Vec<Uuid>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Find a cycle in the graph `task -> depends_on`. The returned path
    /// starts and ends at the same task.
    pub fn detect_cycle(&self, edges: &[(Uuid, Uuid)]) -> Option<Vec<Uuid>> {
        let mut graph: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for &(task, dep) in edges {
            graph.entry(task).or_default().push(dep);
        }

        // Sorted start order makes the reported path deterministic.
        let mut nodes: Vec<Uuid> = graph.keys().copied().collect();
        nodes.sort_unstable();

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in nodes {
            if !visited.contains(&node)
                && detect_cycle_util(node, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }
        None
    }

    /// Existing edges plus those declared by `tasks`, with the tasks'
    /// previous edges replaced.
    pub fn merge_edges(&self, existing: &[(Uuid, Uuid)], tasks: &[Task]) -> Vec<(Uuid, Uuid)> {
        let replaced: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
        existing
            .iter()
            .filter(|(task, _)| !replaced.contains(task))
            .copied()
            .chain(
                tasks
                    .iter()
                    .flat_map(|t| t.depends_on.iter().map(move |&dep| (t.id, dep))),
            )
            .collect()
    }

    /// Ids in `tasks`' dependency lists that are neither in `known` nor
    /// among `tasks` themselves.
    pub fn missing_dependencies(&self, tasks: &[Task], known: &HashSet<Uuid>) -> Vec<Uuid> {
        let batch: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
        let mut missing: Vec<Uuid> = tasks
            .iter()
            .flat_map(|t| t.depends_on.iter().copied())
            .filter(|dep| !known.contains(dep) && !batch.contains(dep))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }

    /// Number of dependency levels below `task_id` (0 for a leaf).
    pub fn depth(&self, task_id: Uuid, edges: &[(Uuid, Uuid)]) -> Option<u32> {
        let mut graph: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for &(task, dep) in edges {
            graph.entry(task).or_default().push(dep);
        }
        let mut visiting = HashSet::new();
        let mut memo = HashMap::new();
        depth_recursive(task_id, &graph, &mut visiting, &mut memo)
    }
}

fn depth_recursive(
    node: Uuid,
    graph: &HashMap<Uuid, Vec<Uuid>>,
    visiting: &mut HashSet<Uuid>,
    memo: &mut HashMap<Uuid, u32>,
) -> Option<u32> {
    if let Some(&depth) = memo.get(&node) {
        return Some(depth);
    }
    if !visiting.insert(node) {
        return None;
    }
    let mut depth = 0;
    for &dep in graph.get(&node).map(Vec::as_slice).unwrap_or_default() {
        depth = depth.max(depth_recursive(dep, graph, visiting, memo)? + 1);
    }
    visiting.remove(&node);
    memo.insert(node, depth);
    Some(depth)
}
