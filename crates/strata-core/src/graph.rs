//! Explicit dependency graph for provisioned resources.
//!
//! Nodes are resources; an edge `a -> b` means `a` must exist before `b`.
//! The graph is resolved once into a deterministic creation order.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::{Error, Result};

/// A directed acyclic dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Insertion order for deterministic tie-breaking in toposort.
    insertion_order: Vec<NodeIndex>,
}

impl<T> Default for DependencyGraph<T>
where
    T: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DependencyGraph<T>
where
    T: Clone + Eq + Hash + Display,
{
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Adds a resource; adding an existing resource is a no-op.
    pub fn add(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_order.push(idx);
        idx
    }

    /// Declares that `dependent` requires `dependency` to exist first.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if either resource has not been added.
    pub fn depends_on(&mut self, dependent: &T, dependency: &T) -> Result<()> {
        let from = self.index_of(dependency)?;
        let to = self.index_of(dependent)?;
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    fn index_of(&self, value: &T) -> Result<NodeIndex> {
        self.index_map
            .get(value)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("resource not in graph: {value}")))
    }

    fn position(&self, idx: NodeIndex) -> usize {
        self.insertion_order
            .iter()
            .position(|&i| i == idx)
            .unwrap_or(usize::MAX)
    }

    /// Resolves a creation order.
    ///
    /// Uses Kahn's algorithm; ties are broken by insertion order so the
    /// result is reproducible.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` naming a resource on a cycle.
    pub fn resolve(&self) -> Result<Vec<T>> {
        let node_count = self.graph.node_count();
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, 0))
            .collect();
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();
        let mut order = Vec::with_capacity(node_count);

        while let Some(idx) = queue.pop_front() {
            if let Some(node) = self.graph.node_weight(idx) {
                order.push(node.clone());
            }
            let mut next: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .collect();
            next.sort_by_key(|n| self.position(*n));
            for neighbor in next {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if order.len() != node_count {
            let stuck = self
                .insertion_order
                .iter()
                .find(|idx| in_degree.get(idx).copied().unwrap_or(0) > 0)
                .and_then(|&idx| self.graph.node_weight(idx))
                .map_or_else(|| "unknown".to_string(), ToString::to_string);
            return Err(Error::InvalidInput(format!(
                "dependency cycle detected at {stuck}"
            )));
        }

        Ok(order)
    }

    /// Direct dependencies of a resource, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the resource has not been added.
    pub fn dependencies(&self, value: &T) -> Result<Vec<T>> {
        let idx = self.index_of(value)?;
        let mut upstream: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        upstream.sort_by_key(|n| self.position(*n));
        Ok(upstream
            .into_iter()
            .filter_map(|n| self.graph.node_weight(n).cloned())
            .collect())
    }
}
