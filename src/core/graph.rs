//! Unit dependency graph.
//!
//! Nodes are [`UnitDescriptor`]s in insertion (declaration) order. An edge
//! `A -> B` means A must be active before B. Dependencies naming a unit that
//! is not in the graph are dropped as phantom edges and kept only for
//! diagnostics.

use crate::core::unit::UnitDescriptor;
use crate::shlog_warn;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether an edge comes from `dependencies` or `optional_dependencies`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Required,
    Optional,
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Required => write!(f, "required"),
            DependencyKind::Optional => write!(f, "optional"),
        }
    }
}

/// A declared dependency whose target is not a known unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhantomEdge {
    pub unit: String,
    pub missing: String,
}

/// Unit names compare ASCII case-insensitively.
fn unit_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// The unit dependency graph.
pub struct DependencyGraph {
    graph: DiGraph<UnitDescriptor, DependencyKind>,
    unit_index: HashMap<String, NodeIndex>,
    phantom_edges: Vec<PhantomEdge>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            unit_index: HashMap::new(),
            phantom_edges: Vec::new(),
        }
    }

    /// Build a graph from descriptors.
    ///
    /// Nodes are added first so that forward references resolve; edges are
    /// added afterwards. Duplicate names, compared without case, keep the first declaration. Optional
    /// dependencies become edges only when `include_optional` is set and the
    /// target exists; missing optional targets are not phantom edges.
    pub fn from_descriptors(units: Vec<UnitDescriptor>, include_optional: bool) -> Self {
        let mut dag = Self::new();
        for unit in units {
            if dag.contains(&unit.name) {
                shlog_warn!("Duplicate unit {} ignored; first declaration wins", unit.name);
                continue;
            }
            dag.add_unit(unit);
        }

        let indices: Vec<NodeIndex> = dag.graph.node_indices().collect();
        for index in indices {
            let unit = dag.graph[index].clone();
            for dep in &unit.dependencies {
                dag.link(dep, index, DependencyKind::Required);
            }
            if include_optional {
                for dep in &unit.optional_dependencies {
                    if dag.contains(dep) {
                        dag.link(dep, index, DependencyKind::Optional);
                    }
                }
            }
        }
        dag
    }

    fn link(&mut self, dependency: &str, dependent: NodeIndex, kind: DependencyKind) {
        let name = self.graph[dependent].name.clone();
        match self.unit_index.get(&unit_key(dependency)).copied() {
            Some(dep_index) if dep_index == dependent => {
                shlog_warn!("Unit {} lists itself as a dependency; ignored", name);
            }
            Some(dep_index) => {
                if self.graph.find_edge(dep_index, dependent).is_none() {
                    self.graph.add_edge(dep_index, dependent, kind);
                }
            }
            None => {
                shlog_warn!(
                    "Unit {} depends on unknown unit {}; dropping phantom edge",
                    name,
                    dependency
                );
                self.phantom_edges.push(PhantomEdge {
                    unit: name,
                    missing: dependency.to_string(),
                });
            }
        }
    }

    /// Add a unit node. Returns the existing index when the name is taken,
    /// ignoring case.
    pub fn add_unit(&mut self, unit: UnitDescriptor) -> NodeIndex {
        let key = unit_key(&unit.name);
        if let Some(&index) = self.unit_index.get(&key) {
            return index;
        }
        let index = self.graph.add_node(unit);
        self.unit_index.insert(key, index);
        index
    }

    pub fn get_unit(&self, name: &str) -> Option<&UnitDescriptor> {
        self.unit_index
            .get(&unit_key(name))
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn node_index(&self, name: &str) -> Option<NodeIndex> {
        self.unit_index.get(&unit_key(name)).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.unit_index.contains_key(&unit_key(name))
    }

    pub fn unit_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Units in insertion order.
    pub fn units(&self) -> impl Iterator<Item = &UnitDescriptor> {
        self.graph.node_indices().map(move |i| &self.graph[i])
    }

    pub fn names(&self) -> Vec<String> {
        self.units().map(|u| u.name.clone()).collect()
    }

    /// In-graph dependencies of a unit, in insertion order.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.neighbors_sorted(name, Direction::Incoming)
    }

    /// Units that depend on the given unit, in insertion order.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.neighbors_sorted(name, Direction::Outgoing)
    }

    fn neighbors_sorted(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.unit_index.get(&unit_key(name)) else {
            return Vec::new();
        };
        let mut neighbors: Vec<NodeIndex> =
            self.graph.neighbors_directed(index, direction).collect();
        neighbors.sort();
        neighbors
            .into_iter()
            .map(|n| self.graph[n].name.as_str())
            .collect()
    }

    /// Kind of the edge `dependency -> dependent`, if present.
    pub fn dependency_kind(&self, dependency: &str, dependent: &str) -> Option<DependencyKind> {
        let from = self.unit_index.get(&unit_key(dependency))?;
        let to = self.unit_index.get(&unit_key(dependent))?;
        let edge = self.graph.find_edge(*from, *to)?;
        self.graph.edge_weight(edge).copied()
    }

    pub fn phantom_edges(&self) -> &[PhantomEdge] {
        &self.phantom_edges
    }

    /// Get the underlying graph for algorithms that need direct access.
    pub fn graph(&self) -> &DiGraph<UnitDescriptor, DependencyKind> {
        &self.graph
    }

    /// Serializable view used by diagnostic output.
    pub fn to_view(&self) -> GraphView {
        let units = self
            .graph
            .node_indices()
            .map(|index| {
                let unit = &self.graph[index];
                let mut edges: Vec<(NodeIndex, DependencyKind)> = self
                    .graph
                    .edges_directed(index, Direction::Incoming)
                    .map(|e| (e.source(), *e.weight()))
                    .collect();
                edges.sort_by_key(|(source, _)| *source);
                let pick = |kind: DependencyKind| {
                    edges
                        .iter()
                        .filter(|(_, k)| *k == kind)
                        .map(|(s, _)| self.graph[*s].name.clone())
                        .collect::<Vec<_>>()
                };
                GraphNodeView {
                    name: unit.name.clone(),
                    required: unit.required,
                    dependencies: pick(DependencyKind::Required),
                    optional_dependencies: pick(DependencyKind::Optional),
                    phantom: self
                        .phantom_edges
                        .iter()
                        .filter(|p| p.unit == unit.name)
                        .map(|p| p.missing.clone())
                        .collect(),
                }
            })
            .collect();
        GraphView { units }
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("units", &self.unit_count())
            .field("dependencies", &self.dependency_count())
            .field("phantom_edges", &self.phantom_edges.len())
            .finish()
    }
}

/// Machine-readable form of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphView {
    pub units: Vec<GraphNodeView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNodeView {
    pub name: String,
    pub required: bool,
    pub dependencies: Vec<String>,
    pub optional_dependencies: Vec<String>,
    pub phantom: Vec<String>,
}
