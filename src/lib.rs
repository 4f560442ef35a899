// MLOXMaker - author, validate and export mlox load-order rules
//
// This is the library crate containing the rule engine and its file formats.
// The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod diagnostics;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use diagnostics::{CycleReport, Diagnostic, DiagnosticKind, ErrorLevel, PreconditionViolation, RuleError};
pub use metrics::Metrics;
pub use models::{ConflictSeverity, Mod, ModId, ModRef, ModSource, Rule, RuleDraft, RuleId, RuleKind, Settings};
pub use state::{ChangeKind, EntityRef, RuleSet, RuleSetRecords, StoreChange};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
