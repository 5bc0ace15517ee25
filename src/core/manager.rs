//! Blok Manager - catalog of available bloks
//!
//! This module provides a thread-safe catalog for registering, discovering and
//! ordering bloks. It supports:
//! - Blok registration, replacement and unregistration
//! - Blok discovery by name or search query
//! - Metadata validation
//! - Dependency resolution into a load order, with cycle detection

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::blok::{Blok, BlokError};

/// Blok catalog
///
/// Cloning is cheap and every clone sees the same catalog. Reads run
/// concurrently, writes are exclusive (parking_lot's RwLock).
#[derive(Clone)]
pub struct BlokManager {
    bloks: Arc<RwLock<HashMap<String, Arc<dyn Blok>>>>,
}

impl BlokManager {
    /// Create a new empty catalog
    ///
    /// # Example
    /// ```
    /// use blok_registry::core::manager::BlokManager;
    ///
    /// let manager = BlokManager::new();
    /// assert_eq!(manager.count(), 0);
    /// ```
    pub fn new() -> Self {
        Self {
            bloks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new blok
    ///
    /// # Returns
    /// * `Ok(())` if registration succeeds
    /// * `Err(BlokError)` if the name is taken or validation fails
    pub fn register(&self, blok: Arc<dyn Blok>) -> Result<(), BlokError> {
        self.validate_blok(&*blok)?;

        let name = blok.metadata().name.clone();
        let mut bloks = self.bloks.write();

        if bloks.contains_key(&name) {
            return Err(BlokError::Duplicate(name));
        }

        bloks.insert(name, blok);
        Ok(())
    }

    /// Replace a registered blok with a new version of itself
    pub fn replace(&self, blok: Arc<dyn Blok>) -> Result<(), BlokError> {
        self.validate_blok(&*blok)?;

        let name = blok.metadata().name.clone();
        let mut bloks = self.bloks.write();

        if !bloks.contains_key(&name) {
            return Err(BlokError::NotFound(name));
        }

        bloks.insert(name, blok);
        Ok(())
    }

    /// Unregister a blok
    pub fn unregister(&self, name: &str) -> Result<(), BlokError> {
        let mut bloks = self.bloks.write();

        bloks
            .remove(name)
            .ok_or_else(|| BlokError::NotFound(name.to_string()))?;

        Ok(())
    }

    /// Get a blok by name
    pub fn get_blok(&self, name: &str) -> Result<Arc<dyn Blok>, BlokError> {
        let bloks = self.bloks.read();

        bloks
            .get(name)
            .cloned()
            .ok_or_else(|| BlokError::NotFound(name.to_string()))
    }

    /// Get all registered bloks, sorted by name
    pub fn get_all_bloks(&self) -> Vec<Arc<dyn Blok>> {
        let bloks = self.bloks.read();
        let mut all: Vec<_> = bloks.values().cloned().collect();
        all.sort_by(|a, b| a.metadata().name.cmp(&b.metadata().name));
        all
    }

    /// Names of all registered bloks, sorted
    pub fn names(&self) -> Vec<String> {
        let bloks = self.bloks.read();
        let mut names: Vec<String> = bloks.keys().cloned().collect();
        names.sort();
        names
    }

    /// Search bloks by name or description (case-insensitive)
    pub fn search_bloks(&self, query: &str) -> Vec<Arc<dyn Blok>> {
        let bloks = self.bloks.read();
        let query = query.to_lowercase();

        bloks
            .values()
            .filter(|b| {
                let meta = b.metadata();
                meta.name.to_lowercase().contains(&query)
                    || meta.description.to_lowercase().contains(&query)
            })
            .cloned()
            .collect()
    }

    /// Get the number of registered bloks
    pub fn count(&self) -> usize {
        let bloks = self.bloks.read();
        bloks.len()
    }

    /// Check if a blok with the given name exists
    pub fn contains(&self, name: &str) -> bool {
        let bloks = self.bloks.read();
        bloks.contains_key(name)
    }

    /// Remove every registered blok
    pub fn clear(&self) {
        let mut bloks = self.bloks.write();
        bloks.clear();
    }

    /// Validate a blok before registration
    fn validate_blok(&self, blok: &dyn Blok) -> Result<(), BlokError> {
        let meta = blok.metadata();

        if meta.name.is_empty() {
            return Err(BlokError::Validation("Blok name cannot be empty".into()));
        }

        if meta.version.is_empty() {
            return Err(BlokError::Validation(format!(
                "Blok '{}' version cannot be empty",
                meta.name
            )));
        }

        if meta.dependencies.iter().any(|d| d == &meta.name) {
            return Err(BlokError::Validation(format!(
                "Blok '{}' cannot depend on itself",
                meta.name
            )));
        }

        Ok(())
    }

    /// Resolve the dependency graph of a set of bloks
    ///
    /// The graph contains the requested bloks and, transitively, everything
    /// they depend on.
    ///
    /// # Returns
    /// * `Ok(DependencyGraph)` with cycles already detected
    /// * `Err(BlokError)` if a blok or one of its dependencies is unknown
    pub fn resolve_dependencies(&self, names: &[String]) -> Result<DependencyGraph, BlokError> {
        let bloks = self.bloks.read();
        let mut graph = DependencyGraph::new();
        let mut pending: Vec<String> = names.to_vec();

        while let Some(name) = pending.pop() {
            if graph.nodes.contains(&name) {
                continue;
            }
            let blok = bloks
                .get(&name)
                .ok_or_else(|| BlokError::NotFound(name.clone()))?;
            graph.add_node(name.clone());

            for dependency in &blok.metadata().dependencies {
                if !bloks.contains_key(dependency) {
                    return Err(BlokError::MissingDependency {
                        blok: name.clone(),
                        dependency: dependency.clone(),
                    });
                }
                graph.add_edge(name.clone(), dependency.clone());
                pending.push(dependency.clone());
            }
        }

        graph.detect_cycles();
        Ok(graph)
    }

    /// Dependency-first load order of the given bloks and their dependencies
    pub fn load_order(&self, names: &[String]) -> Result<Vec<String>, BlokError> {
        let graph = self.resolve_dependencies(names)?;
        if let Some(cycle) = graph.cycles.first() {
            return Err(BlokError::DependencyCycle(cycle.clone()));
        }
        Ok(graph.topological_order())
    }
}

impl Default for BlokManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Dependency graph between bloks
///
/// An edge `(from, to)` means `from` depends on `to`.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// All nodes in the graph (blok names)
    pub nodes: Vec<String>,
    /// Edges representing dependencies (from, to)
    pub edges: Vec<(String, String)>,
    /// Detected circular dependencies
    pub cycles: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            cycles: Vec::new(),
        }
    }

    /// Add a node to the graph
    fn add_node(&mut self, node: String) {
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
    }

    /// Add an edge: `from` depends on `to`
    pub fn add_edge(&mut self, from: String, to: String) {
        if !self.edges.iter().any(|(f, t)| f == &from && t == &to) {
            self.edges.push((from, to));
        }
    }

    /// Detect cycles using DFS, populating `cycles`
    pub fn detect_cycles(&mut self) {
        let mut visited = HashMap::new();
        let mut rec_stack = HashMap::new();
        let mut cycles = Vec::new();

        let mut nodes = self.nodes.clone();
        nodes.sort();
        for node in &nodes {
            if !visited.get(node).unwrap_or(&false) {
                self.dfs_cycle_detect(
                    node,
                    &mut visited,
                    &mut rec_stack,
                    &mut Vec::new(),
                    &mut cycles,
                );
            }
        }

        self.cycles = cycles;
    }

    /// DFS helper for cycle detection
    fn dfs_cycle_detect(
        &self,
        node: &str,
        visited: &mut HashMap<String, bool>,
        rec_stack: &mut HashMap<String, bool>,
        path: &mut Vec<String>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited.insert(node.to_string(), true);
        rec_stack.insert(node.to_string(), true);
        path.push(node.to_string());

        for (from, to) in &self.edges {
            if from == node {
                if !visited.get(to).unwrap_or(&false) {
                    self.dfs_cycle_detect(to, visited, rec_stack, path, cycles);
                } else if *rec_stack.get(to).unwrap_or(&false) {
                    if let Some(pos) = path.iter().position(|x| x == to) {
                        cycles.push(path[pos..].to_vec());
                    }
                }
            }
        }

        path.pop();
        rec_stack.insert(node.to_string(), false);
    }

    /// Check if the graph has cycles
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Dependencies before dependents; ties broken by name.
    /// Nodes caught in a cycle are left out.
    pub fn topological_order(&self) -> Vec<String> {
        let mut remaining: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.edges.iter().filter(|(f, _)| f == n).count()))
            .collect();

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(next) = ready.iter().next().copied() {
            ready.remove(next);
            remaining.remove(next);
            order.push(next.to_string());

            for (from, to) in &self.edges {
                if to == next {
                    if let Some(count) = remaining.get_mut(from.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(from.as_str());
                        }
                    }
                }
            }
        }

        order
    }
}
