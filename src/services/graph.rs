//! Dependency graph over mods, built from `Requires` rules.
//!
//! The graph is a disposable view: it is rebuilt from a [`RuleSet`] whenever a
//! structural query is needed and never persisted. Edges point from the
//! dependent mod to the mod it requires.
//!
//! All traversals walk neighbours in ascending [`ModId`] order, so every query is
//! deterministic for a given rule set.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::models::{ModId, RuleId, RuleKind};
use crate::state::RuleSet;

/// A derived `Requires` relationship: `dependent` needs `required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub dependent: ModId,
    pub required: ModId,
    pub rule: RuleId,
}

/// Returned by [`DependencyGraph::topological_order`] when the graph is not acyclic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Dependency graph contains a cycle; {} mod(s) could not be ordered", remaining.len())]
pub struct CycleError {
    /// Mods left over after every orderable mod was emitted, in ascending id order
    pub remaining: Vec<ModId>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Caseless name of every node, used to break ordering ties
    keys: BTreeMap<ModId, String>,
    /// dependent -> required -> rule that declared the edge
    requires: BTreeMap<ModId, BTreeMap<ModId, RuleId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for every mod and `Requires` rule in `rule_set`.
    pub fn from_rule_set(rule_set: &RuleSet) -> Self {
        let mut graph = Self::new();
        for module in rule_set.mods() {
            graph.add_node(module.id, module.key());
        }
        for rule in rule_set.rules() {
            if rule.kind != RuleKind::Requires {
                continue;
            }
            if let Some(target) = rule.target {
                graph.add_edge(rule.subject, target, rule.id);
            }
        }
        tracing::trace!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Built dependency graph"
        );
        graph
    }

    pub fn add_node(&mut self, id: ModId, key: impl Into<String>) {
        self.keys.insert(id, key.into());
    }

    /// Add `dependent -> required`. A repeated edge keeps the rule that declared it first.
    pub fn add_edge(&mut self, dependent: ModId, required: ModId, rule: RuleId) {
        self.keys.entry(dependent).or_insert_with(|| dependent.to_string());
        self.keys.entry(required).or_insert_with(|| required.to_string());
        self.requires
            .entry(dependent)
            .or_default()
            .entry(required)
            .or_insert(rule);
    }

    pub fn node_count(&self) -> usize {
        self.keys.len()
    }

    pub fn edge_count(&self) -> usize {
        self.requires.values().map(BTreeMap::len).sum()
    }

    pub fn edges(&self) -> impl Iterator<Item = DependencyEdge> + '_ {
        self.requires.iter().flat_map(|(dependent, targets)| {
            targets.iter().map(move |(required, rule)| DependencyEdge {
                dependent: *dependent,
                required: *required,
                rule: *rule,
            })
        })
    }

    /// Rule behind the edge `dependent -> required`, if any.
    pub fn edge_rule(&self, dependent: ModId, required: ModId) -> Option<RuleId> {
        self.requires
            .get(&dependent)
            .and_then(|targets| targets.get(&required))
            .copied()
    }

    /// Whether a `Requires` edge joins `a` and `b` in either direction.
    pub fn connects(&self, a: ModId, b: ModId) -> Option<RuleId> {
        self.edge_rule(a, b).or_else(|| self.edge_rule(b, a))
    }

    /// True iff adding `from -> to` would close a cycle.
    pub fn would_create_cycle(&self, from: ModId, to: ModId) -> bool {
        from == to || self.path_between(to, from).is_some()
    }

    /// The cycle closed by adding `from -> to`, starting with `from`.
    ///
    /// For existing edges `A -> B -> C`, `find_cycle(C, A)` yields `[C, A, B]`.
    pub fn find_cycle(&self, from: ModId, to: ModId) -> Option<Vec<ModId>> {
        if from == to {
            return Some(vec![from]);
        }
        let path = self.path_between(to, from)?;
        let mut cycle = Vec::with_capacity(path.len());
        cycle.push(from);
        cycle.extend_from_slice(&path[..path.len() - 1]);
        Some(cycle)
    }

    /// Depth-first search for a path `start ..= goal` along existing edges.
    fn path_between(&self, start: ModId, goal: ModId) -> Option<Vec<ModId>> {
        let mut visited = BTreeSet::new();
        let mut parent: BTreeMap<ModId, ModId> = BTreeMap::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if node == goal {
                let mut path = vec![goal];
                let mut cursor = goal;
                while let Some(prev) = parent.get(&cursor) {
                    path.push(*prev);
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            if let Some(targets) = self.requires.get(&node) {
                // Reverse so the smallest id is explored first.
                for next in targets.keys().rev() {
                    if !visited.contains(next) {
                        parent.insert(*next, node);
                        stack.push(*next);
                    }
                }
            }
        }

        None
    }

    /// Load order: every required mod precedes the mods that depend on it.
    ///
    /// Kahn's algorithm; among mods that are ready at the same time the one with
    /// the smallest caseless name (then smallest id) goes first.
    pub fn topological_order(&self) -> Result<Vec<ModId>, CycleError> {
        let mut pending: BTreeMap<ModId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<ModId, Vec<ModId>> = BTreeMap::new();

        for id in self.keys.keys() {
            let count = self.requires.get(id).map_or(0, BTreeMap::len);
            pending.insert(*id, count);
        }
        for edge in self.edges() {
            dependents
                .entry(edge.required)
                .or_default()
                .push(edge.dependent);
        }

        let mut ready: BTreeSet<(&str, ModId)> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| (self.keys[id].as_str(), *id))
            .collect();

        let mut ordered = Vec::with_capacity(self.keys.len());
        while let Some(first) = ready.pop_first() {
            let (_, id) = first;
            ordered.push(id);
            let Some(waiting) = dependents.get(&id) else {
                continue;
            };
            for dependent in waiting {
                let Some(count) = pending.get_mut(dependent) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.insert((self.keys[dependent].as_str(), *dependent));
                }
            }
        }

        if ordered.len() == self.keys.len() {
            return Ok(ordered);
        }

        let emitted: BTreeSet<ModId> = ordered.into_iter().collect();
        let remaining: Vec<ModId> = self
            .keys
            .keys()
            .filter(|id| !emitted.contains(id))
            .copied()
            .collect();
        tracing::error!(remaining = remaining.len(), "Topological order failed: cycle in dependency graph");
        Err(CycleError { remaining })
    }
}
