//! Services module - rule validation, ordering and the file formats around them.
//!
//! Everything here operates on a [`RuleSet`](crate::state::RuleSet) passed in by
//! the caller. Nothing holds global state and nothing depends on the CLI.
//!
//! # Components
//!
//! - [`RuleValidator`]: checks a draft rule against the current rule set
//!   (syntax, unknown mods, dependency cycles, conflicting relations).
//! - [`DependencyGraph`]: the `Requires` graph, cycle queries and the
//!   deterministic load order.
//! - [`ConflictResolver`]: advisory [`Suggestion`]s for accepted conflicts and
//!   rejected cycles.
//! - [`MloxWriter`] / [`import_mlox`]: the mlox rule file format.
//! - [`to_interchange`] / [`from_interchange`]: lossless YAML interchange.
//! - [`RuleStore`] / [`YamlRuleStore`]: bulk persistence.
//! - [`MetadataLookup`] / [`DataDirCatalog`]: resolving mods by name.
//!
//! # Usage Example
//!
//! ```ignore
//! use mloxmaker::models::{ModSource, RuleDraft};
//! use mloxmaker::services::MloxWriter;
//! use mloxmaker::state::RuleSet;
//!
//! let mut rule_set = RuleSet::new();
//! rule_set.upsert_mod("Patch.esp", None, ModSource::Local)?;
//! rule_set.upsert_mod("Base.esm", None, ModSource::Local)?;
//! rule_set.add_rule(RuleDraft::requires("Patch.esp", "Base.esm"))?;
//!
//! let text = MloxWriter::new().write(&rule_set);
//! ```

pub mod catalog;
pub mod export;
pub mod graph;
pub mod hints;
pub mod import;
pub mod persistence;
pub mod validator;

pub use catalog::{CatalogError, DataDirCatalog, LookupOutcome, MetadataLookup, ModDescriptor, resolve_mod};
pub use export::{InterchangeError, InterchangeRecord, MloxWriter, from_interchange, to_interchange};
pub use graph::{CycleError, DependencyEdge, DependencyGraph};
pub use hints::{ConflictResolver, HintRequest, Hints, Suggestion};
pub use import::{ImportReport, LineError, ParseOutcome, ParsedRule, import_mlox, parse_mlox};
pub use persistence::{RuleStore, YamlRuleStore, load_rule_set, save_rule_set};
pub use validator::{RuleValidator, ValidatedRule};
