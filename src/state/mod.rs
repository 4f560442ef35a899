// Entity store module
//
// RuleSet owns the mods and rules of one editing session, admits rules only
// through the validator, and broadcasts a change event for every mutation.

use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::diagnostics::{Diagnostic, DiagnosticKind, ErrorLevel, RuleError};
use crate::metrics::Metrics;
use crate::models::{
    Mod, ModId, ModRef, ModSource, Rule, RuleDraft, RuleId, RuleKind, checked_mod_name, name_key,
};
use crate::services::graph::{CycleError, DependencyGraph};
use crate::services::validator::{RuleValidator, ValidatedRule};

/// Buffered change events per subscriber before the oldest are dropped
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Which entity a [`StoreChange`] is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Mod(ModId),
    Rule(RuleId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

/// Change events emitted when the store is mutated
///
/// These let editors, graph views and exporters refresh without polling the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreChange {
    pub entity: EntityRef,
    pub change: ChangeKind,
}

/// Plain snapshot of a rule set, as exchanged with persistence collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSetRecords {
    pub mods: Vec<Mod>,
    pub rules: Vec<Rule>,
}

/// Failure to rebuild a [`RuleSet`] from [`RuleSetRecords`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    #[error("Duplicate {entity} id {id}")]
    DuplicateId { entity: &'static str, id: u32 },

    #[error("{entity} id {id} leaves no room for new ids")]
    IdOverflow { entity: &'static str, id: u32 },

    #[error("Mod {name} rejected: {source}")]
    ModRejected {
        name: String,
        #[source]
        source: RuleError,
    },

    #[error("Rule {rule} rejected: {source}")]
    RuleRejected {
        rule: RuleId,
        #[source]
        source: RuleError,
    },
}

/// The entity store for one editing session.
///
/// - Owns every [`Mod`] and [`Rule`]; other components hold ids only
/// - Admits rules only through [`add_rule`](Self::add_rule), which runs the
///   [`RuleValidator`] first and leaves the store untouched on rejection
/// - Emits a [`StoreChange`] for every mutation; use
///   [`subscribe()`](Self::subscribe) to listen
///
/// Mod names are matched caselessly. Rules keep their insertion order.
///
/// The store is meant to be driven from a single thread. Sessions that need
/// shared access should wrap it in a single-writer lock and validate under the
/// writer's turn.
#[derive(Debug)]
pub struct RuleSet {
    mods: IndexMap<ModId, Mod>,
    /// caseless name -> id
    names: HashMap<String, ModId>,
    rules: IndexMap<RuleId, Rule>,
    next_mod: u32,
    next_rule: u32,
    validator: RuleValidator,
    metrics: Arc<Metrics>,
    change_tx: broadcast::Sender<StoreChange>,
}

impl RuleSet {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            mods: IndexMap::new(),
            names: HashMap::new(),
            rules: IndexMap::new(),
            next_mod: 1,
            next_rule: 1,
            validator: RuleValidator::new(),
            metrics: Arc::new(Metrics::new()),
            change_tx,
        }
    }

    /// Subscribe to store change events
    ///
    /// Returns a receiver that will get all future changes. Multiple
    /// subscribers can listen simultaneously.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Shared handle to the metrics, for reporting after the store is dropped
    pub fn metrics_handle(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    fn emit(&self, entity: EntityRef, change: ChangeKind) {
        // Ignore send errors - it's OK if no one is listening
        let _ = self.change_tx.send(StoreChange { entity, change });
        self.metrics.record_change_event();
    }

    // Mods

    /// Create a mod, or update the one with the same (caseless) name.
    ///
    /// Calling this twice with identical arguments returns the same id and emits
    /// a single `Created` event. A `None` hash keeps whatever hash is stored.
    ///
    /// # Errors
    /// - `InvalidRuleSyntax` for a blank name or one with control characters
    /// - `HashCollision` when `hash` already belongs to a different mod
    /// - `IdsExhausted` when no mod id is left
    pub fn upsert_mod(
        &mut self,
        name: &str,
        hash: Option<&str>,
        source: ModSource,
    ) -> Result<ModId, RuleError> {
        let name = checked_mod_name(name)?;
        let hash = hash.map(str::trim).filter(|h| !h.is_empty());
        let existing = self.names.get(&name_key(name)).copied();

        if let Some(hash) = hash {
            if let Some(owner) = self
                .mods
                .values()
                .find(|m| m.hash.as_deref() == Some(hash) && Some(m.id) != existing)
            {
                let err = RuleError::HashCollision {
                    hash: hash.to_string(),
                    owner: owner.name.clone(),
                };
                err.log();
                return Err(err);
            }
        }

        if let Some(id) = existing {
            let Some(module) = self.mods.get_mut(&id) else {
                return Ok(id);
            };
            let new_hash = hash.map(str::to_string).or_else(|| module.hash.clone());
            if module.hash == new_hash && module.source == source {
                return Ok(id);
            }
            module.hash = new_hash;
            module.source = source;
            tracing::debug!("Updated mod {} ({})", module.name, id);
            self.metrics.record_mod_upserted();
            self.emit(EntityRef::Mod(id), ChangeKind::Updated);
            return Ok(id);
        }

        let next_mod = advance(self.next_mod, "mod").inspect_err(RuleError::log)?;
        let id = ModId(self.next_mod);
        self.next_mod = next_mod;
        self.insert_mod(Mod {
            id,
            name: name.to_string(),
            hash: hash.map(str::to_string),
            source,
        });
        tracing::debug!("Created mod {} ({}, source={})", name, id, source);
        self.metrics.record_mod_upserted();
        self.emit(EntityRef::Mod(id), ChangeKind::Created);
        Ok(id)
    }

    fn insert_mod(&mut self, module: Mod) {
        self.names.insert(module.key(), module.id);
        self.mods.insert(module.id, module);
    }

    /// Remove a mod that no rule references.
    ///
    /// Returns `Ok(None)` for an unknown id and `ModInUse` while any rule still
    /// names the mod.
    pub fn remove_mod(&mut self, id: ModId) -> Result<Option<Mod>, RuleError> {
        let referencing: Vec<RuleId> = self.rules_affecting(id).iter().map(|r| r.id).collect();
        if !referencing.is_empty() {
            let err = RuleError::ModInUse {
                name: self.mod_name(id).to_string(),
                rules: referencing,
            };
            err.log();
            return Err(err);
        }
        let Some(module) = self.mods.shift_remove(&id) else {
            return Ok(None);
        };
        self.names.remove(&module.key());
        tracing::debug!("Removed mod {} ({})", module.name, id);
        self.emit(EntityRef::Mod(id), ChangeKind::Removed);
        Ok(Some(module))
    }

    pub fn get_mod(&self, id: ModId) -> Option<&Mod> {
        self.mods.get(&id)
    }

    /// Look a mod up by name, caselessly.
    pub fn find_mod(&self, name: &str) -> Option<&Mod> {
        self.names
            .get(&name_key(name))
            .and_then(|id| self.mods.get(id))
    }

    pub fn resolve(&self, reference: &ModRef) -> Option<ModId> {
        match reference {
            ModRef::Id(id) => self.mods.contains_key(id).then_some(*id),
            ModRef::Name(name) => self.find_mod(name).map(|m| m.id),
        }
    }

    /// Display name of a mod, or `"<unknown>"` for an id not in this set.
    pub fn mod_name(&self, id: ModId) -> &str {
        self.mods.get(&id).map_or("<unknown>", |m| m.name.as_str())
    }

    /// Mods in creation order
    pub fn mods(&self) -> impl Iterator<Item = &Mod> {
        self.mods.values()
    }

    pub fn mod_count(&self) -> usize {
        self.mods.len()
    }

    // Rules

    /// Validate `draft` and commit it when every check passes.
    ///
    /// On rejection the store is unchanged and the returned error carries the
    /// details needed to render it.
    pub fn add_rule(&mut self, draft: RuleDraft) -> Result<RuleId, RuleError> {
        let validated = self.validate(&draft)?;
        let next_rule = advance(self.next_rule, "rule").inspect_err(RuleError::log)?;
        let id = RuleId(self.next_rule);
        self.next_rule = next_rule;
        self.commit(id, validated);
        Ok(id)
    }

    /// Run the validator without committing anything.
    pub fn validate(&self, draft: &RuleDraft) -> Result<ValidatedRule, RuleError> {
        self.validator.validate(self, draft).inspect_err(|err| {
            self.metrics.record_rule_rejected();
            err.log();
        })
    }

    fn commit(&mut self, id: RuleId, validated: ValidatedRule) {
        let rule = Rule {
            id,
            kind: validated.kind,
            subject: validated.subject,
            target: validated.target,
            severity: validated.severity,
            notes: validated.notes,
            reference: validated.reference,
            section: validated.section,
        };
        tracing::debug!(
            "Accepted {} rule {}: {} -> {}",
            rule.kind,
            id,
            self.mod_name(rule.subject),
            rule.target.map_or("-", |t| self.mod_name(t))
        );
        self.rules.insert(id, rule);
        self.metrics.record_rule_accepted();
        self.emit(EntityRef::Rule(id), ChangeKind::Created);
    }

    /// Remove a rule, returning it, or `None` for an unknown id.
    pub fn remove_rule(&mut self, id: RuleId) -> Option<Rule> {
        let rule = self.rules.shift_remove(&id)?;
        tracing::debug!("Removed {} rule {}", rule.kind, id);
        self.metrics.record_rule_removed();
        self.emit(EntityRef::Rule(id), ChangeKind::Removed);
        Some(rule)
    }

    pub fn get_rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(&id)
    }

    /// Rules in insertion order
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Every rule naming `id` as subject or target, in insertion order.
    pub fn rules_affecting(&self, id: ModId) -> Vec<&Rule> {
        self.rules.values().filter(|rule| rule.involves(id)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty() && self.rules.is_empty()
    }

    // Structure

    /// Fresh dependency graph over the current mods and `Requires` rules.
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_rule_set(self)
    }

    /// Load order of every mod; see [`DependencyGraph::topological_order`].
    pub fn topological_order(&self) -> Result<Vec<ModId>, CycleError> {
        self.dependency_graph().topological_order()
    }

    /// Consistency report over accepted content.
    ///
    /// Reports duplicate rules, `Order` rules that contradict dependencies or
    /// each other, and mods no rule mentions, as warnings. A failing
    /// topological order is reported as critical.
    pub fn audit(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let graph = self.dependency_graph();

        let mut seen: HashSet<(RuleKind, ModId, Option<ModId>)> = HashSet::new();
        for rule in self.rules.values() {
            let key = match (rule.kind, rule.target) {
                (RuleKind::Conflict, Some(target)) if target < rule.subject => {
                    (rule.kind, target, Some(rule.subject))
                }
                _ => (rule.kind, rule.subject, rule.target),
            };
            if !seen.insert(key) {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticKind::DuplicateRule,
                    format!("{} repeats an earlier {} rule", rule.id, rule.kind),
                    self.rule_entities(rule),
                ));
            }
        }

        let orders: Vec<&Rule> = self
            .rules
            .values()
            .filter(|rule| rule.kind == RuleKind::Order)
            .collect();
        for (index, rule) in orders.iter().enumerate() {
            let Some(target) = rule.target else {
                continue;
            };
            // Requires path subject -> target means target must load first.
            if graph.would_create_cycle(target, rule.subject) {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticKind::OrderContradiction,
                    format!(
                        "{} orders {} before {}, but {} depends on {}",
                        rule.id,
                        self.mod_name(rule.subject),
                        self.mod_name(target),
                        self.mod_name(rule.subject),
                        self.mod_name(target)
                    ),
                    self.rule_entities(rule),
                ));
            }
            let reversed = orders[..index]
                .iter()
                .find(|earlier| earlier.subject == target && earlier.target == Some(rule.subject));
            if let Some(earlier) = reversed {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticKind::OrderContradiction,
                    format!("{} reverses the order set by {}", rule.id, earlier.id),
                    self.rule_entities(rule),
                ));
            }
        }

        for module in self.mods.values() {
            if !self.rules.values().any(|rule| rule.involves(module.id)) {
                diagnostics.push(Diagnostic::warning(
                    DiagnosticKind::UnreferencedMod,
                    format!("{} is not mentioned by any rule", module.name),
                    vec![module.name.clone()],
                ));
            }
        }

        if let Err(err) = graph.topological_order() {
            diagnostics.push(Diagnostic {
                kind: DiagnosticKind::InconsistentGraph,
                level: ErrorLevel::Critical,
                message: err.to_string(),
                offending_entities: err
                    .remaining
                    .iter()
                    .map(|id| self.mod_name(*id).to_string())
                    .collect(),
            });
        }

        diagnostics
    }

    fn rule_entities(&self, rule: &Rule) -> Vec<String> {
        let mut entities = vec![rule.id.to_string(), self.mod_name(rule.subject).to_string()];
        if let Some(target) = rule.target {
            entities.push(self.mod_name(target).to_string());
        }
        entities
    }

    // Snapshots

    pub fn to_records(&self) -> RuleSetRecords {
        RuleSetRecords {
            mods: self.mods.values().cloned().collect(),
            rules: self.rules.values().cloned().collect(),
        }
    }

    /// Rebuild a rule set, keeping ids, and replaying every rule through the validator.
    pub fn from_records(records: RuleSetRecords) -> Result<Self, RestoreError> {
        let mut rule_set = Self::new();

        for mut module in records.mods {
            module.name = checked_mod_name(&module.name)
                .map_err(|source| RestoreError::ModRejected {
                    name: module.name.clone(),
                    source,
                })?
                .to_string();
            if rule_set.mods.contains_key(&module.id) {
                return Err(RestoreError::DuplicateId {
                    entity: "mod",
                    id: module.id.0,
                });
            }
            if rule_set.find_mod(&module.name).is_some() {
                return Err(RestoreError::ModRejected {
                    name: module.name.clone(),
                    source: RuleError::InvalidRuleSyntax {
                        reason: format!("duplicate mod name {}", module.name),
                    },
                });
            }
            if let Some(hash) = module.hash.as_deref() {
                if let Some(owner) = rule_set.mods.values().find(|m| m.hash.as_deref() == Some(hash)) {
                    return Err(RestoreError::ModRejected {
                        name: module.name.clone(),
                        source: RuleError::HashCollision {
                            hash: hash.to_string(),
                            owner: owner.name.clone(),
                        },
                    });
                }
            }
            let after = restored_next(module.id.0, "mod")?;
            rule_set.next_mod = rule_set.next_mod.max(after);
            rule_set.insert_mod(module);
        }

        for rule in records.rules {
            if rule_set.rules.contains_key(&rule.id) {
                return Err(RestoreError::DuplicateId {
                    entity: "rule",
                    id: rule.id.0,
                });
            }
            let draft = RuleDraft {
                kind: rule.kind,
                subject: ModRef::Id(rule.subject),
                target: rule.target.map(ModRef::Id),
                severity: rule.severity,
                notes: rule.notes,
                reference: rule.reference,
                section: rule.section,
            };
            let validated = rule_set
                .validate(&draft)
                .map_err(|source| RestoreError::RuleRejected {
                    rule: rule.id,
                    source,
                })?;
            let after = restored_next(rule.id.0, "rule")?;
            rule_set.next_rule = rule_set.next_rule.max(after);
            rule_set.commit(rule.id, validated);
        }

        tracing::info!(
            "Restored rule set: {} mods, {} rules",
            rule_set.mod_count(),
            rule_set.rule_count()
        );
        Ok(rule_set)
    }
}

/// Counter value after handing out `current`.
fn advance(current: u32, entity: &'static str) -> Result<u32, RuleError> {
    current.checked_add(1).ok_or(RuleError::IdsExhausted { entity })
}

fn restored_next(id: u32, entity: &'static str) -> Result<u32, RestoreError> {
    id.checked_add(1).ok_or(RestoreError::IdOverflow { entity, id })
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

/// The clone gets its own change channel and metrics
impl Clone for RuleSet {
    fn clone(&self) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            mods: self.mods.clone(),
            names: self.names.clone(),
            rules: self.rules.clone(),
            next_mod: self.next_mod,
            next_rule: self.next_rule,
            validator: self.validator,
            metrics: Arc::new(Metrics::new()),
            change_tx,
        }
    }
}

/// Same mods in any order, same rules in the same order
impl PartialEq for RuleSet {
    fn eq(&self, other: &Self) -> bool {
        self.mods == other.mods && self.rules.iter().eq(other.rules.iter())
    }
}

impl Eq for RuleSet {}
