//! Target registry and dependency graph.
//!
//! Targets are registered into a [`TargetRegistry`] during the configuration
//! phase. [`TargetRegistry::finalize`] validates references, rejects cycles and
//! produces a [`BuildGraph`]: a directed acyclic graph with a deterministic
//! topological order.
//!
//! Edges point from a dependency to its dependent, so a target's incoming
//! neighbors are the targets it depends on.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::debug;

use crate::target::TargetDescriptor;

/// Configuration errors, detected before any compilation work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  /// A target with this name is already registered.
  #[error("duplicate target: {0}")]
  DuplicateTarget(String),

  /// A target depends on a name that was never registered.
  #[error("target {target} depends on unknown target {dependency}")]
  InvalidReference { target: String, dependency: String },

  /// The dependency graph contains a cycle. The path starts and ends with the same target.
  #[error("dependency cycle detected: {}", .0.join(" -> "))]
  CyclicDependency(Vec<String>),

  /// A declared package could not be resolved.
  #[error("target {target} requires unknown package {package}: {message}")]
  UnknownPackage {
    target: String,
    package: String,
    message: String,
  },
}

/// Append-only collection of target descriptors.
#[derive(Debug, Default)]
pub struct TargetRegistry {
  targets: Vec<TargetDescriptor>,
  index: HashMap<String, usize>,
}

impl TargetRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a target.
  ///
  /// Fails with `DuplicateTarget` if the name is taken; the registry is left unchanged.
  /// Dependencies are not checked here, so targets may be registered in any order.
  pub fn register(&mut self, descriptor: TargetDescriptor) -> Result<(), ConfigError> {
    if self.index.contains_key(&descriptor.name) {
      return Err(ConfigError::DuplicateTarget(descriptor.name));
    }

    debug!(target = %descriptor.name, kind = %descriptor.kind, "registered target");
    self.index.insert(descriptor.name.clone(), self.targets.len());
    self.targets.push(descriptor);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Option<&TargetDescriptor> {
    self.index.get(name).map(|&i| &self.targets[i])
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }

  /// Target names in registration order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.targets.iter().map(|t| t.name.as_str())
  }

  /// Validate the registered targets and compute the build order.
  ///
  /// # Errors
  ///
  /// - `InvalidReference` if a dependency names an unregistered target
  /// - `CyclicDependency` if the dependency graph has a cycle (including self-dependencies)
  pub fn finalize(self) -> Result<BuildGraph, ConfigError> {
    for target in &self.targets {
      if let Some(missing) = target.dependencies.iter().find(|d| !self.index.contains_key(*d)) {
        return Err(ConfigError::InvalidReference {
          target: target.name.clone(),
          dependency: missing.clone(),
        });
      }
    }

    let mut graph = DiGraph::with_capacity(self.targets.len(), 0);
    let mut nodes = HashMap::with_capacity(self.targets.len());

    // Node indices follow registration order
    for target in self.targets {
      let name = target.name.clone();
      let idx = graph.add_node(target);
      nodes.insert(name, idx);
    }

    let edges: Vec<(NodeIndex, NodeIndex)> = graph
      .node_indices()
      .flat_map(|idx| {
        let nodes = &nodes;
        graph[idx].dependencies.iter().map(move |dep| (nodes[dep], idx))
      })
      .collect();
    for (dep_idx, dependent_idx) in edges {
      graph.update_edge(dep_idx, dependent_idx, ());
    }

    let order = stable_toposort(&graph).map_err(|cycle| {
      ConfigError::CyclicDependency(cycle.into_iter().map(|idx| graph[idx].name.clone()).collect())
    })?;

    let position = order.iter().enumerate().map(|(pos, &idx)| (idx, pos)).collect();

    Ok(BuildGraph {
      graph,
      nodes,
      order,
      position,
    })
  }
}

/// A finalized, acyclic graph of targets.
#[derive(Debug)]
pub struct BuildGraph {
  graph: DiGraph<TargetDescriptor, ()>,
  nodes: HashMap<String, NodeIndex>,
  order: Vec<NodeIndex>,
  position: HashMap<NodeIndex, usize>,
}

impl BuildGraph {
  /// Targets in build order: every target appears after all targets it depends on.
  pub fn order(&self) -> impl Iterator<Item = &TargetDescriptor> {
    self.order.iter().map(|&idx| &self.graph[idx])
  }

  /// Target names in build order.
  pub fn order_names(&self) -> Vec<&str> {
    self.order().map(|t| t.name.as_str()).collect()
  }

  pub fn target(&self, name: &str) -> Option<&TargetDescriptor> {
    self.nodes.get(name).map(|&idx| &self.graph[idx])
  }

  /// Position of a target in the build order.
  pub fn position(&self, name: &str) -> Option<usize> {
    self.nodes.get(name).and_then(|idx| self.position.get(idx).copied())
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// Direct dependencies of a target, in build order.
  pub fn dependencies(&self, name: &str) -> Vec<&str> {
    self.neighbors(name, Direction::Incoming)
  }

  /// Targets that directly depend on `name`, in build order.
  pub fn dependents(&self, name: &str) -> Vec<&str> {
    self.neighbors(name, Direction::Outgoing)
  }

  /// All direct and indirect dependencies of a target.
  ///
  /// Ordered so that every target precedes the targets it depends on, which
  /// is the order a static linker expects libraries in.
  pub fn transitive_dependencies(&self, name: &str) -> Vec<&str> {
    let Some(&start) = self.nodes.get(name) else {
      return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut stack = vec![start];
    while let Some(idx) = stack.pop() {
      for dep in self.graph.neighbors_directed(idx, Direction::Incoming) {
        if seen.insert(dep) {
          stack.push(dep);
        }
      }
    }

    let mut deps: Vec<NodeIndex> = seen.into_iter().collect();
    deps.sort_by_key(|idx| Reverse(self.position[idx]));
    deps.into_iter().map(|idx| self.graph[idx].name.as_str()).collect()
  }

  fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
    let Some(&idx) = self.nodes.get(name) else {
      return Vec::new();
    };

    let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
    neighbors.sort_by_key(|idx| self.position[idx]);
    neighbors.into_iter().map(|idx| self.graph[idx].name.as_str()).collect()
  }
}

/// Kahn's algorithm, always releasing the earliest-registered ready node.
///
/// On failure returns one cycle as a path of nodes starting and ending with the same node.
fn stable_toposort(graph: &DiGraph<TargetDescriptor, ()>) -> Result<Vec<NodeIndex>, Vec<NodeIndex>> {
  let mut in_degree: Vec<usize> = graph
    .node_indices()
    .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
    .collect();

  let mut ready: BinaryHeap<Reverse<usize>> = in_degree
    .iter()
    .enumerate()
    .filter(|&(_, &deg)| deg == 0)
    .map(|(i, _)| Reverse(i))
    .collect();

  let mut order = Vec::with_capacity(graph.node_count());
  while let Some(Reverse(i)) = ready.pop() {
    let idx = NodeIndex::new(i);
    order.push(idx);

    for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
      let deg = &mut in_degree[dependent.index()];
      *deg -= 1;
      if *deg == 0 {
        ready.push(Reverse(dependent.index()));
      }
    }
  }

  if order.len() == graph.node_count() {
    return Ok(order);
  }

  // Every unreleased node still has an unreleased dependency, so walking
  // dependencies from any of them must revisit a node.
  let remaining: HashSet<usize> = (0..graph.node_count()).filter(|&i| in_degree[i] > 0).collect();
  let mut current = remaining.iter().copied().min().unwrap_or_default();
  let mut path: Vec<usize> = Vec::new();

  loop {
    if let Some(start) = path.iter().position(|&i| i == current) {
      let mut cycle: Vec<NodeIndex> = path[start..].iter().map(|&i| NodeIndex::new(i)).collect();
      cycle.push(NodeIndex::new(current));
      return Err(cycle);
    }
    path.push(current);

    current = graph
      .neighbors_directed(NodeIndex::new(current), Direction::Incoming)
      .map(|idx| idx.index())
      .filter(|i| remaining.contains(i))
      .min()
      .unwrap_or(current);
  }
}
