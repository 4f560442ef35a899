//! Data models for MLOXMaker.
//!
//! - [`Mod`] / [`ModId`]: a game content package, identified caselessly by name
//! - [`Rule`] / [`RuleId`]: an accepted Order, Conflict or Requires directive
//! - [`RuleDraft`]: a candidate rule before validation, naming mods by [`ModRef`]
//! - [`Settings`]: application settings loaded by [`ConfigManager`](crate::config::ConfigManager)
//!
//! Entities are plain values. Only [`RuleSet`](crate::state::RuleSet) hands out ids,
//! so a `Rule` always points at mods that exist in the set that produced it.

pub mod config;
pub mod entities;

pub use config::{LoggingSettings, Settings};
pub use entities::{
    ConflictSeverity, Mod, ModId, ModRef, ModSource, Rule, RuleDraft, RuleId, RuleKind, checked_mod_name,
    name_key,
};
