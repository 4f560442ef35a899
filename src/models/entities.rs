use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::diagnostics::RuleError;

/// Identity of a mod inside one [`RuleSet`](crate::state::RuleSet).
///
/// Ids are assigned by the store and never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModId(pub u32);

impl fmt::Display for ModId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mod#{}", self.0)
    }
}

/// Identity of a rule inside one [`RuleSet`](crate::state::RuleSet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// Where a mod's metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModSource {
    /// Found on disk or referenced by a hand-written rule
    #[default]
    Local,
    /// Resolved through a remote metadata service
    Remote,
}

impl fmt::Display for ModSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModSource::Local => f.write_str("Local"),
            ModSource::Remote => f.write_str("Remote"),
        }
    }
}

/// A moddable game asset (usually a plugin file such as `Foo.esp`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mod {
    pub id: ModId,
    pub name: String,
    pub hash: Option<String>,
    pub source: ModSource,
}

impl Mod {
    /// Caseless key used for name lookups and ordering ties.
    pub fn key(&self) -> String {
        name_key(&self.name)
    }
}

/// Canonical caseless form of a mod name.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Trimmed form of a mod name, or `InvalidRuleSyntax` if it is blank or holds
/// control characters. Names are written one per line in mlox files.
pub fn checked_mod_name(name: &str) -> Result<&str, RuleError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RuleError::InvalidRuleSyntax {
            reason: "mod name is empty".to_string(),
        });
    }
    if name.chars().any(char::is_control) {
        return Err(RuleError::InvalidRuleSyntax {
            reason: format!("mod name contains control characters: {:?}", name),
        });
    }
    Ok(name)
}

/// The three directive kinds understood by mlox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// `subject` must load before `target`
    Order,
    /// `subject` and `target` should not be used together
    Conflict,
    /// `subject` depends on `target`
    Requires,
}

impl RuleKind {
    pub const ALL: [RuleKind; 3] = [RuleKind::Order, RuleKind::Conflict, RuleKind::Requires];

    /// Whether a rule of this kind must name a second mod.
    pub fn requires_target(self) -> bool {
        matches!(self, RuleKind::Order | RuleKind::Requires)
    }

    /// Block header used in mlox rule files.
    pub fn block_name(self) -> &'static str {
        match self {
            RuleKind::Order => "Order",
            RuleKind::Conflict => "Conflict",
            RuleKind::Requires => "Requires",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.block_name())
    }
}

impl FromStr for RuleKind {
    type Err = RuleError;

    /// Parses a kind name, with or without mlox block brackets, caselessly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
        RuleKind::ALL
            .into_iter()
            .find(|kind| kind.block_name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| RuleError::InvalidRuleSyntax {
                reason: format!("unknown rule kind: {}", s.trim()),
            })
    }
}

/// How serious a conflict is. Only meaningful for [`RuleKind::Conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

impl ConflictSeverity {
    /// mlox priority marker written in front of conflict messages.
    pub fn marker(self) -> &'static str {
        match self {
            ConflictSeverity::Low => "!",
            ConflictSeverity::Medium => "!!",
            ConflictSeverity::High => "!!!",
        }
    }

    pub fn from_marker_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ConflictSeverity::Low),
            2 => Some(ConflictSeverity::Medium),
            n if n >= 3 => Some(ConflictSeverity::High),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSeverity::Low => f.write_str("Low"),
            ConflictSeverity::Medium => f.write_str("Medium"),
            ConflictSeverity::High => f.write_str("High"),
        }
    }
}

impl FromStr for ConflictSeverity {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ConflictSeverity::Low),
            "medium" => Ok(ConflictSeverity::Medium),
            "high" => Ok(ConflictSeverity::High),
            other => Err(RuleError::InvalidRuleSyntax {
                reason: format!("unknown conflict severity: {}", other),
            }),
        }
    }
}

/// An accepted directive. Only the store constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: RuleId,
    pub kind: RuleKind,
    pub subject: ModId,
    pub target: Option<ModId>,
    pub severity: Option<ConflictSeverity>,
    pub notes: Option<String>,
    pub reference: Option<String>,
    /// `@Section` grouping used when writing mlox files
    pub section: Option<String>,
}

impl Rule {
    /// Whether this rule names `id` as subject or target.
    pub fn involves(&self, id: ModId) -> bool {
        self.subject == id || self.target == Some(id)
    }

    /// Whether this rule relates exactly `a` and `b`, in either direction.
    pub fn joins(&self, a: ModId, b: ModId) -> bool {
        (self.subject == a && self.target == Some(b)) || (self.subject == b && self.target == Some(a))
    }
}

/// How a candidate rule names a mod: by store id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModRef {
    Id(ModId),
    Name(String),
}

impl ModRef {
    pub fn is_blank(&self) -> bool {
        matches!(self, ModRef::Name(name) if name.trim().is_empty())
    }
}

impl fmt::Display for ModRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModRef::Id(id) => write!(f, "{}", id),
            ModRef::Name(name) => f.write_str(name),
        }
    }
}

impl From<ModId> for ModRef {
    fn from(id: ModId) -> Self {
        ModRef::Id(id)
    }
}

impl From<&str> for ModRef {
    fn from(name: &str) -> Self {
        ModRef::Name(name.to_string())
    }
}

impl From<String> for ModRef {
    fn from(name: String) -> Self {
        ModRef::Name(name)
    }
}

/// A candidate rule submitted to [`RuleSet::add_rule`](crate::state::RuleSet::add_rule).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDraft {
    pub kind: RuleKind,
    pub subject: ModRef,
    pub target: Option<ModRef>,
    pub severity: Option<ConflictSeverity>,
    pub notes: Option<String>,
    pub reference: Option<String>,
    pub section: Option<String>,
}

impl RuleDraft {
    pub fn new(kind: RuleKind, subject: impl Into<ModRef>, target: Option<ModRef>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            target,
            severity: None,
            notes: None,
            reference: None,
            section: None,
        }
    }

    /// `subject` loads before `target`.
    pub fn order(subject: impl Into<ModRef>, target: impl Into<ModRef>) -> Self {
        Self::new(RuleKind::Order, subject, Some(target.into()))
    }

    /// `subject` depends on `target`.
    pub fn requires(subject: impl Into<ModRef>, target: impl Into<ModRef>) -> Self {
        Self::new(RuleKind::Requires, subject, Some(target.into()))
    }

    pub fn conflict(subject: impl Into<ModRef>, target: impl Into<ModRef>) -> Self {
        Self::new(RuleKind::Conflict, subject, Some(target.into()))
    }

    pub fn with_severity(mut self, severity: ConflictSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}
