//! Topological resolution of unit activation order.
//!
//! Kahn's algorithm over the dependency graph, tolerant of cycles:
//!
//! 1. Optionally restrict the graph to the transitive dependency closure of
//!    a subset of units (breadth-first over the full graph).
//! 2. Count in-scope dependencies per unit. The logging unit is seeded first
//!    and its own dependencies are ignored so it always leads the order.
//! 3. The ready queue is FIFO. Seeds and every batch of newly ready
//!    dependents enter in graph insertion order, which is registry
//!    declaration order. This is the frozen tie-break rule.
//! 4. Units that never reach zero in-degree sit on or behind a cycle. They
//!    are appended alphabetically and reported, never rejected.
//!
//! Depth is the longest dependency chain below a unit and defines the
//! parallel loading groups.

use crate::core::graph::DependencyGraph;
use crate::error::{Error, Result};
use crate::{shlog_debug, shlog_warn};
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// The outcome of resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOrder {
    /// Activation order, no duplicates.
    pub load_order: Vec<String>,
    /// Longest dependency-chain length per unit.
    pub depth: BTreeMap<String, usize>,
    /// Units on or downstream of a dependency cycle.
    pub circular: BTreeSet<String>,
}

impl ResolvedOrder {
    pub fn len(&self) -> usize {
        self.load_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.load_order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.depth.contains_key(name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.load_order.iter().position(|n| n == name)
    }

    pub fn depth_of(&self, name: &str) -> Option<usize> {
        self.depth.get(name).copied()
    }

    pub fn has_cycles(&self) -> bool {
        !self.circular.is_empty()
    }

    /// Fail when any unit sits on a cycle. Resolution itself never does this;
    /// it is for callers that want strict diagnostics.
    pub fn ensure_acyclic(&self) -> Result<()> {
        if self.circular.is_empty() {
            Ok(())
        } else {
            Err(Error::CircularDependency {
                members: self.circular.iter().cloned().collect(),
            })
        }
    }

    /// Depth groups in ascending depth; each group keeps load-order position.
    pub fn groups(&self) -> Vec<Vec<String>> {
        let mut by_depth: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for name in &self.load_order {
            let depth = self.depth.get(name).copied().unwrap_or(0);
            by_depth.entry(depth).or_default().push(name.clone());
        }
        by_depth.into_values().collect()
    }
}

/// Resolves activation order from a [`DependencyGraph`].
#[derive(Debug, Clone)]
pub struct Resolver {
    logging_unit: String,
}

impl Resolver {
    pub fn new(logging_unit: &str) -> Self {
        Self {
            logging_unit: logging_unit.to_string(),
        }
    }

    pub fn logging_unit(&self) -> &str {
        &self.logging_unit
    }

    /// Resolve the whole graph, or only `subset` plus its dependency closure.
    pub fn resolve(&self, graph: &DependencyGraph, subset: Option<&[String]>) -> ResolvedOrder {
        let scope: Vec<NodeIndex> = match subset {
            Some(names) => {
                let mut closure: Vec<NodeIndex> =
                    dependency_closure(graph, names).into_iter().collect();
                closure.sort();
                closure
            }
            None => graph.graph().node_indices().collect(),
        };
        let in_scope: HashSet<NodeIndex> = scope.iter().copied().collect();
        let g = graph.graph();

        let logging = scope
            .iter()
            .copied()
            .find(|&i| g[i].name.eq_ignore_ascii_case(&self.logging_unit));

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        for &index in &scope {
            let count = g
                .neighbors_directed(index, Direction::Incoming)
                .filter(|n| in_scope.contains(n))
                .count();
            if Some(index) == logging && count > 0 {
                shlog_warn!(
                    "Logging unit {} declares {} dependencies; ignored so it activates first",
                    g[index].name,
                    count
                );
                in_degree.insert(index, 0);
            } else {
                in_degree.insert(index, count);
            }
        }

        let mut queue: VecDeque<NodeIndex> = VecDeque::new();
        if let Some(index) = logging {
            queue.push_back(index);
        }
        queue.extend(
            scope
                .iter()
                .copied()
                .filter(|&i| Some(i) != logging && in_degree[&i] == 0),
        );

        let mut emitted: HashSet<NodeIndex> = HashSet::new();
        let mut order: Vec<NodeIndex> = Vec::with_capacity(scope.len());
        while let Some(index) = queue.pop_front() {
            if !emitted.insert(index) {
                continue;
            }
            order.push(index);

            let mut dependents: Vec<NodeIndex> = g
                .neighbors_directed(index, Direction::Outgoing)
                .filter(|n| in_scope.contains(n) && Some(*n) != logging)
                .collect();
            dependents.sort();
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        let mut circular: Vec<&str> = scope
            .iter()
            .filter(|i| !emitted.contains(i))
            .map(|&i| g[i].name.as_str())
            .collect();
        circular.sort();
        if !circular.is_empty() {
            shlog_warn!(
                "Circular dependencies detected; appending in alphabetical order: {}",
                circular.join(", ")
            );
        }

        let mut load_order: Vec<String> = order.iter().map(|&i| g[i].name.clone()).collect();
        load_order.extend(circular.iter().map(|n| n.to_string()));

        let depth = compute_depths(graph, &scope, &in_scope, logging);

        shlog_debug!(
            "Resolved {} units ({} circular): {}",
            load_order.len(),
            circular.len(),
            load_order.join(" -> ")
        );

        ResolvedOrder {
            load_order,
            depth,
            circular: circular.into_iter().map(str::to_string).collect(),
        }
    }
}

/// Transitive dependency closure of `names` over the full graph.
///
/// Unknown names are warned about and skipped.
pub fn dependency_closure(graph: &DependencyGraph, names: &[String]) -> HashSet<NodeIndex> {
    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();
    for name in names {
        match graph.node_index(name) {
            Some(index) => {
                if seen.insert(index) {
                    queue.push_back(index);
                }
            }
            None => shlog_warn!("Requested unit {} is not in the graph; ignored", name),
        }
    }
    while let Some(index) = queue.pop_front() {
        for dep in graph
            .graph()
            .neighbors_directed(index, Direction::Incoming)
        {
            if seen.insert(dep) {
                queue.push_back(dep);
            }
        }
    }
    seen
}

fn compute_depths(
    graph: &DependencyGraph,
    scope: &[NodeIndex],
    in_scope: &HashSet<NodeIndex>,
    logging: Option<NodeIndex>,
) -> BTreeMap<String, usize> {
    let mut memo: HashMap<NodeIndex, usize> = HashMap::new();
    let mut stack: HashSet<NodeIndex> = HashSet::new();
    for &index in scope {
        depth_of(graph, index, in_scope, logging, &mut memo, &mut stack);
    }
    scope
        .iter()
        .map(|&i| (graph.graph()[i].name.clone(), memo.get(&i).copied().unwrap_or(0)))
        .collect()
}

fn depth_of(
    graph: &DependencyGraph,
    index: NodeIndex,
    in_scope: &HashSet<NodeIndex>,
    logging: Option<NodeIndex>,
    memo: &mut HashMap<NodeIndex, usize>,
    stack: &mut HashSet<NodeIndex>,
) -> usize {
    if let Some(&depth) = memo.get(&index) {
        return depth;
    }
    if Some(index) == logging {
        memo.insert(index, 0);
        return 0;
    }

    stack.insert(index);
    let deps: Vec<NodeIndex> = graph
        .graph()
        .neighbors_directed(index, Direction::Incoming)
        .filter(|n| in_scope.contains(n))
        .collect();
    let mut depth = 0;
    for dep in deps {
        // An edge back into the current path closes a cycle and adds nothing.
        if stack.contains(&dep) {
            continue;
        }
        depth = depth.max(depth_of(graph, dep, in_scope, logging, memo, stack) + 1);
    }
    stack.remove(&index);
    memo.insert(index, depth);
    depth
}
