//! Dependency graph construction and deterministic topological scheduling.
//!
//! Nodes are identified by their position in the slice handed to
//! [`build_dependency_graph`]. A dependency key links to every node that
//! carries that key, so several helpers registered under one key all gate
//! their dependents.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::helper::HelperDescriptor;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    /// Position of the dependent node.
    pub entry: usize,
    pub dependency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// One or more dependency keys matched no node. Nothing is scheduled.
    Missing(Vec<MissingDependency>),
    /// Positions of nodes that never became ready, in ascending order.
    Unresolved(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// `dependents[i]` holds every node that waits on node `i`.
    pub dependents: Vec<BTreeSet<usize>>,
    /// Execution order as node positions.
    pub order: Vec<usize>,
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Tie-break among ready nodes: priority descending, key ascending, then
/// registration position ascending.
///
/// Keys compare by byte order (`str::cmp`), not locale collation, so `"B"`
/// sorts before `"a"`.
fn compare_ready(nodes: &[&HelperDescriptor], a: usize, b: usize) -> Ordering {
    let (left, right) = (nodes[a], nodes[b]);
    right
        .priority
        .cmp(&left.priority)
        .then_with(|| left.key.cmp(&right.key))
        .then(a.cmp(&b))
}

fn insert_ready(ready: &mut VecDeque<usize>, nodes: &[&HelperDescriptor], candidate: usize) {
    let at = ready.partition_point(|&queued| compare_ready(nodes, queued, candidate) == Ordering::Less);
    ready.insert(at, candidate);
}

// ---------------------------------------------------------------------------
// Graph build
// ---------------------------------------------------------------------------

pub fn build_dependency_graph(nodes: &[&HelperDescriptor]) -> Result<DependencyGraph, GraphError> {
    let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (position, node) in nodes.iter().enumerate() {
        providers.entry(node.key.as_str()).or_default().push(position);
    }

    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
    let mut indegree = vec![0usize; nodes.len()];
    let mut missing = Vec::new();

    for (position, node) in nodes.iter().enumerate() {
        for dependency in &node.depends_on {
            let Some(matches) = providers.get(dependency.as_str()) else {
                missing.push(MissingDependency {
                    entry: position,
                    dependency: dependency.clone(),
                });
                continue;
            };
            for &provider in matches {
                // Repeating a key in `depends_on` does not add a second edge.
                if dependents[provider].insert(position) {
                    indegree[position] += 1;
                }
            }
        }
    }

    if !missing.is_empty() {
        return Err(GraphError::Missing(missing));
    }

    let mut ready = VecDeque::new();
    for position in 0..nodes.len() {
        if indegree[position] == 0 {
            insert_ready(&mut ready, nodes, position);
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(current) = ready.pop_front() {
        order.push(current);
        for &dependent in &dependents[current] {
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                insert_ready(&mut ready, nodes, dependent);
            }
        }
    }

    if order.len() < nodes.len() {
        let mut scheduled = vec![false; nodes.len()];
        for &position in &order {
            scheduled[position] = true;
        }
        let unresolved = (0..nodes.len()).filter(|&p| !scheduled[p]).collect();
        return Err(GraphError::Unresolved(unresolved));
    }

    Ok(DependencyGraph { dependents, order })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::HelperKind;

    fn node(key: &str, priority: i32, deps: &[&str]) -> HelperDescriptor {
        let mut d = HelperDescriptor::new(key, HelperKind::Fragment);
        d.priority = priority;
        d.depends_on = deps.iter().map(|s| s.to_string()).collect();
        d
    }

    fn keys_in_order(nodes: &[HelperDescriptor]) -> Vec<String> {
        let refs: Vec<&HelperDescriptor> = nodes.iter().collect();
        let graph = build_dependency_graph(&refs).unwrap();
        graph.order.iter().map(|&p| nodes[p].key.clone()).collect()
    }

    #[test]
    fn linear_chain_respects_dependencies() {
        let nodes = vec![
            node("dependencies", 0, &["detect"]),
            node("detect", 0, &["meta"]),
            node("meta", 0, &[]),
        ];
        assert_eq!(keys_in_order(&nodes), vec!["meta", "detect", "dependencies"]);
    }

    #[test]
    fn ties_break_by_priority_then_key_then_position() {
        let nodes = vec![
            node("zeta", 0, &[]),
            node("alpha", 0, &[]),
            node("omega", 5, &[]),
            node("alpha", 0, &[]),
        ];
        let refs: Vec<&HelperDescriptor> = nodes.iter().collect();
        let graph = build_dependency_graph(&refs).unwrap();
        assert_eq!(graph.order, vec![2, 1, 3, 0]);
    }

    #[test]
    fn newly_ready_nodes_slot_into_sorted_position() {
        // After "a" runs, "b" becomes ready and must precede the waiting "c".
        let nodes = vec![node("a", 0, &[]), node("c", 0, &[]), node("b", 0, &["a"])];
        assert_eq!(keys_in_order(&nodes), vec!["a", "b", "c"]);
    }

    #[test]
    fn keys_compare_by_byte_order() {
        let nodes = vec![node("a", 0, &[]), node("B", 0, &[]), node("_x", 0, &[])];
        assert_eq!(keys_in_order(&nodes), vec!["B", "_x", "a"]);
    }

    #[test]
    fn negative_priority_runs_last() {
        let nodes = vec![node("late", -1, &[]), node("zz", 0, &[])];
        assert_eq!(keys_in_order(&nodes), vec!["zz", "late"]);
    }

    #[test]
    fn dependency_fans_out_to_every_matching_key() {
        let nodes = vec![
            node("consumer", 10, &["shared"]),
            node("shared", 0, &[]),
            node("shared", 0, &[]),
        ];
        let refs: Vec<&HelperDescriptor> = nodes.iter().collect();
        let graph = build_dependency_graph(&refs).unwrap();

        assert_eq!(graph.order, vec![1, 2, 0]);
        assert!(graph.dependents[1].contains(&0));
        assert!(graph.dependents[2].contains(&0));
    }

    #[test]
    fn repeated_dependency_key_is_one_edge() {
        let nodes = vec![node("a", 0, &[]), node("b", 0, &["a", "a"])];
        assert_eq!(keys_in_order(&nodes), vec!["a", "b"]);
    }

    #[test]
    fn missing_dependency_is_reported_per_entry() {
        let nodes = vec![node("a", 0, &["ghost"]), node("b", 0, &["a", "phantom"])];
        let refs: Vec<&HelperDescriptor> = nodes.iter().collect();
        let err = build_dependency_graph(&refs).unwrap_err();

        assert_eq!(
            err,
            GraphError::Missing(vec![
                MissingDependency {
                    entry: 0,
                    dependency: "ghost".into()
                },
                MissingDependency {
                    entry: 1,
                    dependency: "phantom".into()
                },
            ])
        );
    }

    #[test]
    fn cycle_is_unresolved_with_downstream() {
        let nodes = vec![
            node("a", 0, &["b"]),
            node("b", 0, &["a"]),
            node("c", 0, &["b"]),
            node("free", 0, &[]),
        ];
        let refs: Vec<&HelperDescriptor> = nodes.iter().collect();
        let err = build_dependency_graph(&refs).unwrap_err();
        assert_eq!(err, GraphError::Unresolved(vec![0, 1, 2]));
    }

    #[test]
    fn self_dependency_never_resolves() {
        let nodes = vec![node("loop", 0, &["loop"])];
        let refs: Vec<&HelperDescriptor> = nodes.iter().collect();
        assert_eq!(
            build_dependency_graph(&refs).unwrap_err(),
            GraphError::Unresolved(vec![0])
        );
    }

    #[test]
    fn empty_graph_is_trivially_ordered() {
        let graph = build_dependency_graph(&[]).unwrap();
        assert!(graph.order.is_empty());
    }
}
