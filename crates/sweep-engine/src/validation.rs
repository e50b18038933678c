//! Graph validation
//!
//! Topological ordering with cycle detection, plus a check for required
//! inputs that nothing will ever bind.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::graph::ConnectionGraph;
use crate::types::NodeId;

/// Order nodes so every edge points forward, using Kahn's algorithm.
///
/// Ties are broken by the order nodes were given, so the result is
/// deterministic. On a cycle, returns one node that lies on or behind it.
pub fn topological_sort<'a>(
    nodes: &[&'a str],
    edges: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> std::result::Result<Vec<&'a str>, &'a str> {
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|id| (*id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for (source, target) in edges {
        adjacency.entry(source).or_default().push(target);
        *in_degree.entry(target).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = nodes
        .iter()
        .copied()
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node_id) = queue.pop_front() {
        order.push(node_id);
        for target in adjacency.get(node_id).map(|v| v.as_slice()).unwrap_or(&[]) {
            if let Some(deg) = in_degree.get_mut(target) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*target);
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let visited: HashSet<&str> = order.iter().copied().collect();
        let stuck = nodes
            .iter()
            .copied()
            .find(|id| !visited.contains(id))
            .unwrap_or_default();
        return Err(stuck);
    }

    Ok(order)
}

/// Required inputs with no edge, preset value, iterable, or default.
///
/// These nodes will fail with a missing-input error when run; callers can
/// surface the problem before submitting the graph.
pub fn unbound_required_inputs(graph: &ConnectionGraph) -> Vec<(NodeId, String)> {
    let connected: HashSet<(&str, &str)> = graph
        .edges()
        .iter()
        .map(|e| (e.dest_node.as_str(), e.dest_field.as_str()))
        .collect();

    let mut unbound = Vec::new();
    for node in graph.nodes() {
        for field in node.input_fields() {
            let bound = connected.contains(&(node.id.as_str(), field.name.as_str()))
                || node.inputs.contains_key(&field.name)
                || node.iterables.iter().any(|it| it.field == field.name)
                || field.default.is_some();
            if field.required && !bound {
                unbound.push((node.id.clone(), field.name.clone()));
            }
        }
    }
    unbound
}
