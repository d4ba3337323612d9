//! Agent dependency graph with deterministic topological level scheduling.
//!
//! The runtime registers one node per agent together with the names of the
//! agents it depends on, then asks for
//! [`topological_levels`](DependencyGraph::topological_levels): level 0 holds
//! every node without dependencies, level `k` holds nodes whose dependencies
//! all live in levels `< k`.  Agents within a level are started concurrently.
//!
//! Validation happens in a fixed order: unknown dependencies are rejected
//! first, then a depth-first search detects cycles (reporting the offending
//! path), and only then are levels computed with Kahn's algorithm.  Nodes
//! within a level are sorted lexicographically so repeated runs over the same
//! graph return identical level assignments.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;

/// Errors produced while building or ordering the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// A node with the same name was registered twice.
    DuplicateNode { node: String },
    /// A dependency names a node that was never registered.
    UnknownDependency { node: String, dependency: String },
    /// The graph contains a cycle; `path` starts and ends on the repeated
    /// node, e.g. `["A", "B", "C", "A"]`.
    Cycle { path: Vec<String> },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::DuplicateNode { node } => write!(f, "duplicate node '{}'", node),
            GraphError::UnknownDependency { node, dependency } => write!(
                f,
                "node '{}' depends on unknown node '{}'",
                node, dependency
            ),
            GraphError::Cycle { path } => write!(f, "dependency cycle: {}", path.join(" -> ")),
        }
    }
}

impl Error for GraphError {}

#[derive(Clone, Copy, PartialEq)]
enum Colour {
    Unvisited,
    Visiting,
    Visited,
}

/// A directed dependency graph over agent names.
///
/// Nodes are kept in a `BTreeMap` so every traversal below iterates in a
/// stable order regardless of insertion order.
#[derive(Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Register `name` with its dependency list.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        deps: Vec<String>,
    ) -> Result<(), GraphError> {
        let name = name.into();
        if self.nodes.contains_key(&name) {
            return Err(GraphError::DuplicateNode { node: name });
        }
        self.nodes.insert(name, deps);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependencies_of(&self, name: &str) -> Option<&[String]> {
        self.nodes.get(name).map(|deps| deps.as_slice())
    }

    fn validate_dependencies(&self) -> Result<(), GraphError> {
        for (name, deps) in &self.nodes {
            for dep in deps {
                if !self.nodes.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        node: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    // Three-colour DFS.  A Visiting node reached again closes a cycle; the
    // reported path is the tail of the visit stack from the first occurrence
    // of that node, with the node repeated at the end.
    fn detect_cycle(&self) -> Result<(), GraphError> {
        let mut colours: HashMap<&str, Colour> = self
            .nodes
            .keys()
            .map(|name| (name.as_str(), Colour::Unvisited))
            .collect();
        let mut stack: Vec<&str> = Vec::new();

        for name in self.nodes.keys() {
            if colours[name.as_str()] == Colour::Unvisited {
                self.visit(name, &mut colours, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        colours: &mut HashMap<&'a str, Colour>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), GraphError> {
        colours.insert(name, Colour::Visiting);
        stack.push(name);

        if let Some(deps) = self.nodes.get(name) {
            for dep in deps {
                match colours[dep.as_str()] {
                    Colour::Visiting => {
                        let start = stack.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|n| n.to_string()).collect();
                        path.push(dep.clone());
                        return Err(GraphError::Cycle { path });
                    }
                    Colour::Unvisited => self.visit(dep, colours, stack)?,
                    Colour::Visited => {}
                }
            }
        }

        stack.pop();
        colours.insert(name, Colour::Visited);
        Ok(())
    }

    /// Compute startup cohorts with Kahn's algorithm.
    ///
    /// Returns levels in dependency order; each level is sorted
    /// lexicographically, so the result is deterministic for a given graph.
    pub fn topological_levels(&self) -> Result<Vec<Vec<String>>, GraphError> {
        self.validate_dependencies()?;
        self.detect_cycle()?;

        let mut in_degree: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();
        // Reverse adjacency: node -> nodes that depend on it.
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, deps) in &self.nodes {
            for dep in deps {
                dependents
                    .entry(dep.as_str())
                    .or_insert_with(Vec::new)
                    .push(name.as_str());
            }
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut remaining = self.nodes.len();

        while remaining > 0 {
            let mut level: Vec<&str> = in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(name, _)| *name)
                .collect();
            // Cycle detection already ran, so an empty level cannot happen;
            // the guard keeps the loop total regardless.
            if level.is_empty() {
                break;
            }
            level.sort_unstable();

            for name in &level {
                in_degree.remove(name);
                if let Some(children) = dependents.get(name) {
                    for child in children {
                        if let Some(degree) = in_degree.get_mut(child) {
                            *degree -= 1;
                        }
                    }
                }
            }

            remaining -= level.len();
            levels.push(level.iter().map(|name| name.to_string()).collect());
        }

        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (name, deps) in edges {
            g.add_node(*name, deps.iter().map(|d| d.to_string()).collect())
                .unwrap();
        }
        g
    }

    #[test]
    fn test_diamond_levels() {
        let g = graph(&[
            ("A", &[]),
            ("B", &["A"]),
            ("C", &["A"]),
            ("D", &["B", "C"]),
        ]);
        let levels = g.topological_levels().unwrap();
        assert_eq!(
            levels,
            vec![vec!["A".to_string()], vec!["B".to_string(), "C".to_string()], vec![
                "D".to_string()
            ]]
        );
    }

    #[test]
    fn test_levels_are_deterministic() {
        let g = graph(&[
            ("zeta", &[]),
            ("alpha", &[]),
            ("mid", &["zeta", "alpha"]),
        ]);
        let first = g.topological_levels().unwrap();
        let second = g.topological_levels().unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_every_dependency_lands_in_an_earlier_level() {
        let g = graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("d", &["a", "c"]),
            ("e", &[]),
        ]);
        let levels = g.topological_levels().unwrap();
        let level_of = |name: &str| {
            levels
                .iter()
                .position(|level| level.iter().any(|n| n == name))
                .unwrap()
        };
        let expectations = [("b", vec!["a"]), ("c", vec!["b"]), ("d", vec!["a", "c"])];
        for (name, deps) in expectations.iter() {
            for dep in deps.iter() {
                assert!(
                    level_of(*dep) < level_of(*name),
                    "{} should precede {}",
                    dep,
                    name
                );
            }
        }
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let g = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        match g.topological_levels() {
            Err(GraphError::Cycle { path }) => {
                assert_eq!(path.len(), 4);
                assert_eq!(path.first(), path.last());
                for node in &["A", "B", "C"] {
                    assert!(path.iter().any(|n| n == node), "path missing {}", node);
                }
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_cycle() {
        let g = graph(&[("A", &["A"])]);
        match g.topological_levels() {
            Err(GraphError::Cycle { path }) => assert_eq!(path, vec!["A", "A"]),
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_dependency_beats_cycle_detection() {
        let g = graph(&[("A", &["ghost"])]);
        match g.topological_levels() {
            Err(GraphError::UnknownDependency { node, dependency }) => {
                assert_eq!(node, "A");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected unknown dependency error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let mut g = DependencyGraph::new();
        g.add_node("A", vec![]).unwrap();
        assert_eq!(
            g.add_node("A", vec![]),
            Err(GraphError::DuplicateNode {
                node: "A".to_string()
            })
        );
    }

    #[test]
    fn test_empty_graph_yields_no_levels() {
        let g = DependencyGraph::new();
        assert!(g.topological_levels().unwrap().is_empty());
    }
}
