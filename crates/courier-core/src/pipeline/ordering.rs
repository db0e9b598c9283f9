//! Step ordering with cycle detection.
//!
//! Uses `petgraph` to model `insert_before` / `insert_after` constraints as a
//! directed graph. Topological sort detects cycles; a stable Kahn pass then
//! produces the final order, breaking ties by registration order so that
//! unconstrained steps keep the order they were registered in.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use courier_types::error::ConfigurationError;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::registration::StepRegistration;

/// Resolve the execution order of `steps`, returned as indices into `steps`.
///
/// An edge `a -> b` means `a` runs before `b`:
///
/// - `a.insert_before(b)` adds `a -> b`
/// - `a.insert_after(b)` adds `b -> a`
pub(crate) fn resolve_order(steps: &[StepRegistration]) -> Result<Vec<usize>, ConfigurationError> {
    if steps.is_empty() {
        return Ok(vec![]);
    }

    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id(), i))
        .collect();

    let mut graph = DiGraph::<&str, ()>::new();
    let node_indices: Vec<NodeIndex> = steps.iter().map(|s| graph.add_node(s.id())).collect();

    let lookup = |step: &StepRegistration, reference: &str| {
        id_to_idx
            .get(reference)
            .copied()
            .ok_or_else(|| ConfigurationError::UnknownStep {
                step: step.id().to_string(),
                reference: reference.to_string(),
            })
    };

    for (idx, step) in steps.iter().enumerate() {
        for before in step.before() {
            let target = lookup(step, before)?;
            graph.update_edge(node_indices[idx], node_indices[target], ());
        }
        for after in step.after() {
            let target = lookup(step, after)?;
            graph.update_edge(node_indices[target], node_indices[idx], ());
        }
    }

    // Topological sort -- detects cycles
    toposort(&graph, None).map_err(|cycle| {
        let node_id = graph[cycle.node_id()];
        ConfigurationError::CycleDetected(format!(
            "ordering constraints form a cycle involving step '{node_id}'"
        ))
    })?;

    // Stable Kahn pass: always emit the earliest-registered ready step.
    let mut in_degree: Vec<usize> = node_indices
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(steps.len());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for successor in graph.neighbors_directed(node_indices[idx], Direction::Outgoing) {
            let succ = successor.index();
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.push(Reverse(succ));
            }
        }
    }

    Ok(order)
}
