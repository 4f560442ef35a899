//! Error taxonomy and structured diagnostics.
//!
//! Expected conditions (bad user input, contradictory rules) are returned as
//! [`RuleError`] values. Each carries an [`ErrorLevel`] tier and converts into a
//! [`Diagnostic`] that logging, CLI and UI collaborators can render without
//! re-deriving anything. Caller bugs are reported separately as
//! [`PreconditionViolation`].

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::models::{ModId, RuleId};

/// Severity tier of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    /// Operation proceeds
    Warning,
    /// Operation rejected, state unchanged, caller may retry
    Recoverable,
    /// Accepting the input would break a consistency invariant
    Critical,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLevel::Warning => f.write_str("warning"),
            ErrorLevel::Recoverable => f.write_str("recoverable"),
            ErrorLevel::Critical => f.write_str("critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    InvalidRuleSyntax,
    MissingMod,
    CircularDependency,
    ConflictingRule,
    HashCollision,
    ModInUse,
    IdsExhausted,
    PreconditionViolation,
    DuplicateRule,
    OrderContradiction,
    UnreferencedMod,
    InconsistentGraph,
}

/// A structured, render-ready report of a failure or suspicious condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub level: ErrorLevel,
    pub message: String,
    pub offending_entities: Vec<String>,
}

impl Diagnostic {
    pub fn warning(kind: DiagnosticKind, message: impl Into<String>, offending: Vec<String>) -> Self {
        Self {
            kind,
            level: ErrorLevel::Warning,
            message: message.into(),
            offending_entities: offending,
        }
    }
}

/// The closing path of a rejected `Requires` rule.
///
/// `path[0]` is the subject of the rejected rule and `path[1]` its target; the
/// remaining mods follow existing `Requires` edges back towards the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    path: Vec<ModId>,
    names: Vec<String>,
    closing_rule: RuleId,
}

impl CycleReport {
    pub(crate) fn new(path: Vec<ModId>, names: Vec<String>, closing_rule: RuleId) -> Self {
        debug_assert!(path.len() >= 2);
        debug_assert_eq!(path.len(), names.len());
        Self {
            path,
            names,
            closing_rule,
        }
    }

    pub fn path(&self) -> &[ModId] {
        &self.path
    }

    /// Mod names along [`path`](Self::path).
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The existing `Requires` rule whose edge points into the subject.
    pub fn closing_rule(&self) -> RuleId {
        self.closing_rule
    }

    /// Dependent side of the closing edge (the last mod on the path).
    pub fn closing_dependent(&self) -> ModId {
        self.path[self.path.len() - 1]
    }

    pub fn subject(&self) -> ModId {
        self.path[0]
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.names.join(" -> "), self.names[0])
    }
}

/// Why a candidate rule or mod was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("Invalid rule syntax: {reason}")]
    InvalidRuleSyntax { reason: String },

    #[error("Mod not found: {reference}")]
    MissingMod { reference: String },

    #[error("Circular dependency detected: {0}")]
    CircularDependency(CycleReport),

    #[error("Conflicting rules detected: {subject} <-> {target} (contradicts {existing})")]
    ConflictingRule {
        subject: String,
        target: String,
        existing: RuleId,
    },

    #[error("Hash {hash} already belongs to {owner}")]
    HashCollision { hash: String, owner: String },

    #[error("Mod {name} is still referenced by {} rule(s)", rules.len())]
    ModInUse { name: String, rules: Vec<RuleId> },

    #[error("No {entity} ids left to assign")]
    IdsExhausted { entity: &'static str },
}

impl RuleError {
    pub fn level(&self) -> ErrorLevel {
        match self {
            RuleError::CircularDependency(_) | RuleError::IdsExhausted { .. } => ErrorLevel::Critical,
            _ => ErrorLevel::Recoverable,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self {
            RuleError::InvalidRuleSyntax { .. } => DiagnosticKind::InvalidRuleSyntax,
            RuleError::MissingMod { .. } => DiagnosticKind::MissingMod,
            RuleError::CircularDependency(_) => DiagnosticKind::CircularDependency,
            RuleError::ConflictingRule { .. } => DiagnosticKind::ConflictingRule,
            RuleError::HashCollision { .. } => DiagnosticKind::HashCollision,
            RuleError::ModInUse { .. } => DiagnosticKind::ModInUse,
            RuleError::IdsExhausted { .. } => DiagnosticKind::IdsExhausted,
        }
    }

    pub fn offending_entities(&self) -> Vec<String> {
        match self {
            RuleError::InvalidRuleSyntax { .. } | RuleError::IdsExhausted { .. } => Vec::new(),
            RuleError::MissingMod { reference } => vec![reference.clone()],
            RuleError::CircularDependency(report) => report.names().to_vec(),
            RuleError::ConflictingRule {
                subject,
                target,
                existing,
            } => vec![subject.clone(), target.clone(), existing.to_string()],
            RuleError::HashCollision { owner, .. } => vec![owner.clone()],
            RuleError::ModInUse { name, rules } => std::iter::once(name.clone())
                .chain(rules.iter().map(ToString::to_string))
                .collect(),
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            kind: self.kind(),
            level: self.level(),
            message: self.to_string(),
            offending_entities: self.offending_entities(),
        }
    }

    /// Emit this rejection through `tracing` at the level matching its tier.
    pub(crate) fn log(&self) {
        match self.level() {
            ErrorLevel::Warning => tracing::warn!(kind = ?self.kind(), "{}", self),
            ErrorLevel::Recoverable => tracing::info!(kind = ?self.kind(), "Rejected: {}", self),
            ErrorLevel::Critical => tracing::error!(kind = ?self.kind(), "Rejected: {}", self),
        }
    }
}

impl From<&RuleError> for Diagnostic {
    fn from(err: &RuleError) -> Self {
        err.diagnostic()
    }
}

/// A caller invoked an operation outside its contract.
///
/// This signals a programming error, not bad user input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Precondition violated: {message}")]
pub struct PreconditionViolation {
    pub message: String,
}

impl PreconditionViolation {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        let violation = Self {
            message: message.into(),
        };
        tracing::error!("{}", violation);
        violation
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            kind: DiagnosticKind::PreconditionViolation,
            level: ErrorLevel::Critical,
            message: self.to_string(),
            offending_entities: Vec::new(),
        }
    }
}
