//! Dependency graph view.
//!
//! Built from a container's declared dependencies. Offers:
//! - completeness checks (every declared dependency resolvable locally or
//!   through the parent chain)
//! - cycle detection over declared edges
//! - topological layers, used for dependency-aware startup ordering
//! - a textual rendering through [`fmt::Display`]
//!
//! Declarations are not enforced at resolve time; a graph that validates
//! here can still fail when a factory resolves something it never declared.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tadbir_support::rendering::{GraphNode, render_graph, suggest_similar};
use tracing::{debug, instrument, warn};

use crate::coordinator::Coordinator;
use crate::error::{CircularDependencyError, NotRegisteredError, Result, TadbirError};
use crate::key::DependencyKey;
use crate::lifetime::Lifetime;
use crate::priority::compute_priority;

const MAX_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone)]
struct GraphEntry {
    key: DependencyKey,
    lifetime: Lifetime,
    dependencies: Vec<DependencyKey>,
}

/// Read-only view over the declared dependencies of one container.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    entries: HashMap<DependencyKey, GraphEntry>,
    /// Keys only registered somewhere up the parent chain.
    inherited: HashSet<DependencyKey>,
}

impl DependencyGraph {
    pub(crate) fn from_coordinator(coordinator: &Coordinator) -> Self {
        let entries = coordinator
            .registry()
            .entries()
            .map(|entry| {
                (
                    entry.key.clone(),
                    GraphEntry {
                        key: entry.key.clone(),
                        lifetime: entry.lifetime,
                        dependencies: entry.dependencies.clone(),
                    },
                )
            })
            .collect::<HashMap<_, _>>();

        let mut inherited = HashSet::new();
        let mut ancestor = coordinator.parent();
        while let Some(parent) = ancestor {
            inherited.extend(
                parent
                    .registry()
                    .entries()
                    .map(|entry| entry.key.clone())
                    .filter(|key| !entries.contains_key(key)),
            );
            ancestor = parent.parent();
        }

        Self { entries, inherited }
    }

    /// Number of local registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `key` resolves locally or through a parent.
    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.entries.contains_key(key) || self.inherited.contains(key)
    }

    /// Declared dependencies of a local registration.
    pub fn dependencies_of(&self, key: &DependencyKey) -> Option<&[DependencyKey]> {
        self.entries.get(key).map(|entry| entry.dependencies.as_slice())
    }

    /// Checks completeness and acyclicity.
    ///
    /// # Errors
    /// - [`TadbirError::NotRegistered`]: a declared dependency resolves nowhere
    /// - [`TadbirError::CircularDependency`]: declared edges form a cycle
    #[instrument(skip(self), name = "graph_validation")]
    pub fn validate(&self) -> Result<()> {
        debug!(dependency_count = self.entries.len(), "Starting dependency graph validation");
        GraphWalker::new(self, true).walk_all()?;
        debug!("Dependency graph validation passed ✓");
        Ok(())
    }

    /// Groups local keys by depth: layer 0 declares no local dependencies,
    /// layer `n` depends on something in layer `n - 1`. Keys inside a layer
    /// are sorted by name. Missing dependencies are ignored here.
    ///
    /// # Errors
    /// [`TadbirError::CircularDependency`] if declared edges form a cycle.
    pub fn topological_layers(&self) -> Result<Vec<Vec<DependencyKey>>> {
        let layers = self.layer_map()?;
        let depth = layers.values().copied().max().map_or(0, |max| max + 1);

        let mut grouped: Vec<Vec<DependencyKey>> = vec![Vec::new(); depth];
        for (key, layer) in layers {
            grouped[layer].push(key);
        }
        for layer in &mut grouped {
            layer.sort_by_key(DependencyKey::display_name);
        }
        Ok(grouped)
    }

    pub(crate) fn layer_map(&self) -> Result<HashMap<DependencyKey, usize>> {
        GraphWalker::new(self, false).walk_all()
    }

    fn suggestions_for(&self, key: &DependencyKey) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .keys()
            .chain(self.inherited.iter())
            .map(DependencyKey::display_name)
            .collect();
        names.sort();
        names.dedup();

        let candidates: Vec<&str> = names.iter().map(String::as_str).collect();
        suggest_similar(&key.display_name(), &candidates, MAX_SUGGESTIONS)
    }

    fn nodes(&self) -> Vec<GraphNode> {
        let mut entries: Vec<&GraphEntry> = self.entries.values().collect();
        entries.sort_by_cached_key(|entry| {
            (
                compute_priority(&entry.key, entry.lifetime, entry.dependencies.len()).value(),
                entry.key.display_name(),
            )
        });

        entries
            .into_iter()
            .map(|entry| GraphNode {
                name: entry.key.display_name(),
                lifetime: entry.lifetime.to_string(),
                priority: Some(
                    compute_priority(&entry.key, entry.lifetime, entry.dependencies.len()).value(),
                ),
                dependencies: entry
                    .dependencies
                    .iter()
                    .map(|dep| {
                        if self.entries.contains_key(dep) {
                            dep.display_name()
                        } else if self.inherited.contains(dep) {
                            format!("{} (parent)", dep.display_name())
                        } else {
                            format!("{} (missing)", dep.display_name())
                        }
                    })
                    .collect(),
            })
            .collect()
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_graph(&self.nodes()))
    }
}

// ═══════════════════════════════════════════
// DFS walker
// ═══════════════════════════════════════════

/// Depth-first traversal over local registrations.
///
/// Keeps a "visiting" set plus the current path to report cycles, and
/// memoizes each finished key together with its layer.
struct GraphWalker<'g> {
    graph: &'g DependencyGraph,
    require_complete: bool,
    visiting: HashSet<DependencyKey>,
    layers: HashMap<DependencyKey, usize>,
    path: Vec<DependencyKey>,
}

impl<'g> GraphWalker<'g> {
    fn new(graph: &'g DependencyGraph, require_complete: bool) -> Self {
        Self {
            graph,
            require_complete,
            visiting: HashSet::new(),
            layers: HashMap::new(),
            path: Vec::new(),
        }
    }

    fn walk_all(mut self) -> Result<HashMap<DependencyKey, usize>> {
        // Sorted so the reported cycle or missing key is deterministic.
        let mut keys: Vec<&DependencyKey> = self.graph.entries.keys().collect();
        keys.sort_by_key(|key| key.display_name());

        for key in keys {
            self.visit(key)?;
        }
        Ok(self.layers)
    }

    /// Returns the layer of `key`, or `None` for keys outside this graph.
    fn visit(&mut self, key: &DependencyKey) -> Result<Option<usize>> {
        if let Some(layer) = self.layers.get(key) {
            return Ok(Some(*layer));
        }

        if self.visiting.contains(key) {
            let start = self.path.iter().position(|k| k == key).unwrap_or(0);
            let mut path = self.path[start..].to_vec();
            path.push(key.clone());

            let cycle = CircularDependencyError { path };
            warn!(cycle = %cycle, "Circular dependency declared");
            return Err(TadbirError::CircularDependency(cycle));
        }

        let Some(entry) = self.graph.entries.get(key) else {
            if self.require_complete && !self.graph.inherited.contains(key) {
                return Err(TadbirError::NotRegistered(NotRegisteredError {
                    requested: key.clone(),
                    required_by: self.path.last().cloned(),
                    suggestions: self.graph.suggestions_for(key),
                }));
            }
            return Ok(None);
        };

        self.visiting.insert(key.clone());
        self.path.push(key.clone());

        let mut layer = 0;
        for dependency in &entry.dependencies {
            if let Some(below) = self.visit(dependency)? {
                layer = layer.max(below + 1);
            }
        }

        self.path.pop();
        self.visiting.remove(key);
        self.layers.insert(key.clone(), layer);

        Ok(Some(layer))
    }
}
