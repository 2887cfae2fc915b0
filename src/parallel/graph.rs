//! Generic directed dependency graph.
//!
//! Nodes are keyed by string identifiers and carry an arbitrary payload.
//! An edge `from -> to` means `from` depends on `to`: `to` must complete
//! before `from` may start. Edges are kept twice, as a per-node dependency
//! list and as a per-node dependents list, so frontier queries only touch
//! the neighbours of a node.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

/// Returned when a linear order is requested from a graph that has a cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot order a graph containing a cycle: {}", .cycle.join(" -> "))]
pub struct CycleError {
    /// Closed cycle path; the first id is repeated as the last one.
    pub cycle: Vec<String>,
}

/// Directed graph over string identifiers with payloads of type `T`.
#[derive(Debug, Clone)]
pub struct Dag<T> {
    /// Node payloads keyed by id.
    nodes: HashMap<String, T>,
    /// Node ids in first-insertion order.
    order: Vec<String>,
    /// id -> ids it depends on.
    edges: HashMap<String, Vec<String>>,
    /// id -> ids that depend on it.
    reverse_edges: HashMap<String, Vec<String>>,
}

impl<T> Default for Dag<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dag<T> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
            reverse_edges: HashMap::new(),
        }
    }

    /// Insert a node, or replace the payload of an existing one.
    ///
    /// Re-adding an id keeps its original position and its edges.
    pub fn add_node(&mut self, id: impl Into<String>, payload: T) {
        let id = id.into();
        if !self.nodes.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.edges.entry(id.clone()).or_default();
        self.reverse_edges.entry(id.clone()).or_default();
        self.nodes.insert(id, payload);
    }

    /// Record that `from` depends on `to`.
    ///
    /// Neither end has to be a node yet; their adjacency lists are created
    /// on demand. Repeated calls for the same pair add repeated entries.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        self.edges.entry(from.clone()).or_default().push(to.clone());
        self.reverse_edges.entry(to).or_default().push(from);
    }

    /// Whether any dependency chain loops back on itself.
    pub fn has_cycle(&self) -> bool {
        self.detect_cycle().is_some()
    }

    /// The first cycle found by depth-first search, as a closed path
    /// (`[a, b, a]`), or an empty list for an acyclic graph.
    pub fn find_cycle(&self) -> Vec<String> {
        self.detect_cycle().unwrap_or_default()
    }

    /// Payloads ordered so that every node follows all of its dependencies.
    ///
    /// Uses in-degree counting seeded with dependency-free nodes in insertion
    /// order; ties are broken first-in first-out, so the result is stable for
    /// a given construction sequence.
    pub fn topological_sort(&self) -> Result<Vec<&T>, CycleError> {
        if let Some(cycle) = self.detect_cycle() {
            return Err(CycleError { cycle });
        }

        let mut in_degree: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.dependencies(id).len()))
            .collect();

        let mut queue: VecDeque<&str> = self
            .order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            if let Some(payload) = self.nodes.get(id) {
                result.push(payload);
            }

            for dependent in self.dependents(id) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }

        Ok(result)
    }

    /// Nodes that are not completed and whose dependencies all are.
    ///
    /// Results follow node insertion order.
    pub fn parallel_nodes(&self, completed: &HashSet<String>) -> Vec<&T> {
        self.order
            .iter()
            .filter(|id| !completed.contains(*id))
            .filter(|id| self.dependencies(id).iter().all(|dep| completed.contains(dep)))
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of directed edges, counting repeated pairs individually.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn node(&self, id: &str) -> Option<&T> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Ids that `id` depends on, in the order the edges were added.
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids that depend on `id`.
    pub fn dependents(&self, id: &str) -> &[String] {
        self.reverse_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// `(id, payload)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|payload| (id.as_str(), payload)))
    }

    fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for id in &self.order {
            if visited.contains(id.as_str()) {
                continue;
            }
            if let Some(cycle) = self.visit(id, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }

        None
    }

    fn visit<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        stack.push(id);

        for dep in self.dependencies(id) {
            // Back edge: `dep` is still on the current path.
            if let Some(start) = stack.iter().position(|on_path| *on_path == dep.as_str()) {
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.clone());
                return Some(cycle);
            }

            if !visited.contains(dep.as_str()) {
                if let Some(cycle) = self.visit(dep, visited, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        None
    }
}
