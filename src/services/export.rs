//! Rule set serialization.
//!
//! Two formats are produced from a [`RuleSet`] without mutating it:
//! - the line-oriented mlox rule file (`[Order]`, `[Conflict]`, `[Requires]` blocks)
//! - a YAML interchange document of field-tagged records that reloads losslessly

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use thiserror::Error;

use crate::diagnostics::RuleError;
use crate::models::{ConflictSeverity, Mod, ModId, ModSource, Rule, RuleId, RuleKind, name_key};
use crate::state::{RestoreError, RuleSet, RuleSetRecords};

/// Writes rule sets in the format read by mlox.
///
/// Each rule becomes its own block, in insertion order, with mods referenced
/// by name. Conflict severity is written as the mlox priority marker on the
/// block's indented message line.
///
/// A `; @Section` line opens each run of rules that share a section, and a
/// bare `; @` closes it when the next rule has none. Section lines are written
/// even without comments, since mlox skips them like any other comment.
#[derive(Debug, Clone, Copy)]
pub struct MloxWriter {
    /// Emit notes and references as `;` comment lines
    comments: bool,
}

impl MloxWriter {
    pub fn new() -> Self {
        Self { comments: true }
    }

    pub fn with_comments(mut self, comments: bool) -> Self {
        self.comments = comments;
        self
    }

    pub fn write(&self, rule_set: &RuleSet) -> String {
        let mut out = String::new();
        if self.comments {
            out.push_str("; mlox rules generated by MLOXMaker\n");
        }

        let mut section: Option<&str> = None;
        for rule in rule_set.rules() {
            if !out.is_empty() {
                out.push('\n');
            }
            if rule.section.as_deref() != section {
                section = rule.section.as_deref();
                let _ = writeln!(out, "; @{}", section.unwrap_or_default());
            }
            self.write_rule(&mut out, rule_set, rule);
        }

        rule_set.metrics().record_export();
        out
    }

    fn write_rule(&self, out: &mut String, rule_set: &RuleSet, rule: &Rule) {
        let subject = rule_set.mod_name(rule.subject);
        let target = rule.target.map(|t| rule_set.mod_name(t));

        if self.comments {
            if rule.kind != RuleKind::Conflict {
                for line in note_lines(rule.notes.as_deref()) {
                    let _ = writeln!(out, "; {}", line);
                }
            }
            for line in note_lines(rule.reference.as_deref()) {
                let _ = writeln!(out, "; Ref: {}", line);
            }
        }

        let _ = writeln!(out, "[{}]", rule.kind.block_name());

        if rule.kind == RuleKind::Conflict {
            let marker = rule.severity.map(ConflictSeverity::marker);
            let lines = note_lines(rule.notes.as_deref());
            match (marker, lines.is_empty()) {
                (Some(marker), true) => {
                    let _ = writeln!(out, " {} {} conflicts with {}", marker, subject, target.unwrap_or("other mods"));
                }
                (marker, false) => {
                    for (index, line) in lines.iter().enumerate() {
                        match marker {
                            Some(marker) if index == 0 => {
                                let _ = writeln!(out, " {} {}", marker, line);
                            }
                            _ => {
                                let _ = writeln!(out, " {}", line);
                            }
                        }
                    }
                }
                (None, true) => {}
            }
        }

        let _ = writeln!(out, "{}", subject);
        if let Some(target) = target {
            let _ = writeln!(out, "{}", target);
        }
    }

    /// Write the mlox rendering of `rule_set` to `path`.
    pub fn write_to_file(&self, rule_set: &RuleSet, path: &Utf8Path) -> Result<()> {
        let text = self.write(rule_set);
        fs::write(path, text).with_context(|| format!("Failed to export rules: {}", path))?;
        tracing::info!("Exported {} rules to {}", rule_set.rule_count(), path);
        Ok(())
    }
}

impl Default for MloxWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn note_lines(notes: Option<&str>) -> Vec<&str> {
    notes
        .map(|n| n.lines().map(str::trim).filter(|l| !l.is_empty()).collect())
        .unwrap_or_default()
}

/// One entry of the interchange document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "lowercase")]
pub enum InterchangeRecord {
    Mod {
        id: ModId,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hash: Option<String>,
        #[serde(default)]
        source: ModSource,
    },
    Rule {
        id: RuleId,
        /// Kept as text so unknown kinds surface as syntax errors
        kind: String,
        subject: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        section: Option<String>,
    },
}

#[derive(Error, Debug)]
pub enum InterchangeError {
    #[error("Failed to parse interchange document: {0}")]
    Parse(#[source] serde_yaml_ng::Error),

    #[error("Failed to serialize interchange document: {0}")]
    Serialize(#[source] serde_yaml_ng::Error),

    #[error("Rule {rule} is invalid: {source}")]
    InvalidRule {
        rule: RuleId,
        #[source]
        source: RuleError,
    },

    #[error(transparent)]
    Restore(#[from] RestoreError),
}

/// Records for every mod (creation order) followed by every rule (insertion order).
pub fn to_records(rule_set: &RuleSet) -> Vec<InterchangeRecord> {
    encode_records(&rule_set.to_records())
}

/// Interchange form of a plain snapshot; rules name their mods.
pub fn encode_records(records: &RuleSetRecords) -> Vec<InterchangeRecord> {
    let names: HashMap<ModId, &str> = records.mods.iter().map(|m| (m.id, m.name.as_str())).collect();
    let name_of = |id: ModId| names.get(&id).copied().unwrap_or("<unknown>").to_string();

    let mods = records.mods.iter().map(|m| InterchangeRecord::Mod {
        id: m.id,
        name: m.name.clone(),
        hash: m.hash.clone(),
        source: m.source,
    });
    let rules = records.rules.iter().map(|r| InterchangeRecord::Rule {
        id: r.id,
        kind: r.kind.block_name().to_string(),
        subject: name_of(r.subject),
        target: r.target.map(name_of),
        severity: r.severity.map(|s| s.to_string()),
        notes: r.notes.clone(),
        reference: r.reference.clone(),
        section: r.section.clone(),
    });
    mods.chain(rules).collect()
}

pub fn to_interchange(rule_set: &RuleSet) -> Result<String, InterchangeError> {
    let text = serde_yaml_ng::to_string(&to_records(rule_set)).map_err(InterchangeError::Serialize)?;
    rule_set.metrics().record_export();
    Ok(text)
}

/// Resolve interchange records into a plain snapshot.
///
/// Rule kinds and severities are parsed and mod names resolved caselessly;
/// nothing is validated beyond that.
pub fn decode_records(records: Vec<InterchangeRecord>) -> Result<RuleSetRecords, InterchangeError> {
    let mut mods = Vec::new();
    let mut rule_records = Vec::new();
    for record in records {
        match record {
            InterchangeRecord::Mod {
                id,
                name,
                hash,
                source,
            } => mods.push(Mod {
                id,
                name: name.trim().to_string(),
                hash,
                source,
            }),
            rule @ InterchangeRecord::Rule { .. } => rule_records.push(rule),
        }
    }

    let by_name: HashMap<String, ModId> = mods.iter().map(|m| (m.key(), m.id)).collect();
    let lookup = |rule: RuleId, name: &str| {
        by_name
            .get(&name_key(name))
            .copied()
            .ok_or_else(|| InterchangeError::InvalidRule {
                rule,
                source: RuleError::MissingMod {
                    reference: name.to_string(),
                },
            })
    };

    let mut rules = Vec::with_capacity(rule_records.len());
    for record in rule_records {
        let InterchangeRecord::Rule {
            id,
            kind,
            subject,
            target,
            severity,
            notes,
            reference,
            section,
        } = record
        else {
            continue;
        };
        let invalid = |source| InterchangeError::InvalidRule { rule: id, source };
        let kind: RuleKind = kind.parse().map_err(invalid)?;
        let severity = severity
            .as_deref()
            .map(str::parse::<ConflictSeverity>)
            .transpose()
            .map_err(invalid)?;
        let subject = lookup(id, &subject)?;
        let target = target.as_deref().map(|t| lookup(id, t)).transpose()?;
        rules.push(Rule {
            id,
            kind,
            subject,
            target,
            severity,
            notes,
            reference,
            section,
        });
    }

    Ok(RuleSetRecords { mods, rules })
}

/// Rebuild a rule set from interchange records.
///
/// Mods are restored first, whatever their position in the document; rules
/// are then replayed through the validator in document order.
pub fn from_records(records: Vec<InterchangeRecord>) -> Result<RuleSet, InterchangeError> {
    Ok(RuleSet::from_records(decode_records(records)?)?)
}

pub fn from_interchange(text: &str) -> Result<RuleSet, InterchangeError> {
    if text.trim().is_empty() {
        return Ok(RuleSet::new());
    }
    let records: Vec<InterchangeRecord> = serde_yaml_ng::from_str(text).map_err(InterchangeError::Parse)?;
    from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleDraft;

    fn sample() -> RuleSet {
        let mut rule_set = RuleSet::new();
        for name in ["Base.esm", "Patch.esp", "Armor.esp", "Weapons.esp"] {
            rule_set.upsert_mod(name, None, ModSource::Local).unwrap();
        }
        rule_set
            .add_rule(RuleDraft::requires("Patch.esp", "Base.esm").with_notes("Needs the master"))
            .unwrap();
        rule_set
            .add_rule(
                RuleDraft::conflict("Armor.esp", "Weapons.esp")
                    .with_severity(ConflictSeverity::Medium)
                    .with_notes("Both edit the same leveled lists")
                    .with_reference("forum thread"),
            )
            .unwrap();
        rule_set.add_rule(RuleDraft::order("Armor.esp", "Patch.esp")).unwrap();
        rule_set
    }

    fn sectioned() -> RuleSet {
        let mut rule_set = sample();
        rule_set
            .add_rule(RuleDraft::order("Base.esm", "Weapons.esp").with_section("Weapons"))
            .unwrap();
        rule_set
    }

    #[test]
    fn test_mlox_blocks() {
        let text = MloxWriter::new().write(&sample());

        let expected = "\
; mlox rules generated by MLOXMaker

; Needs the master
[Requires]
Patch.esp
Base.esm

; Ref: forum thread
[Conflict]
 !! Both edit the same leveled lists
Armor.esp
Weapons.esp

[Order]
Armor.esp
Patch.esp
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_mlox_without_comments() {
        let text = MloxWriter::new().with_comments(false).write(&sample());

        assert!(!text.contains(';'));
        assert!(text.starts_with("[Requires]\n"));
        assert!(text.contains(" !! Both edit"));
    }

    #[test]
    fn test_severity_without_notes_gets_message() {
        let mut rule_set = RuleSet::new();
        rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
        rule_set.upsert_mod("B.esp", None, ModSource::Local).unwrap();
        rule_set
            .add_rule(RuleDraft::conflict("A.esp", "B.esp").with_severity(ConflictSeverity::High))
            .unwrap();

        let text = MloxWriter::new().with_comments(false).write(&rule_set);
        assert_eq!(text, "[Conflict]\n !!! A.esp conflicts with B.esp\nA.esp\nB.esp\n");
    }

    #[test]
    fn test_multiline_reference_split_into_ref_lines() {
        let mut rule_set = RuleSet::new();
        rule_set.upsert_mod("A.esp", None, ModSource::Local).unwrap();
        rule_set.upsert_mod("B.esp", None, ModSource::Local).unwrap();
        rule_set
            .add_rule(RuleDraft::order("A.esp", "B.esp").with_reference("see thread\nD.esp"))
            .unwrap();

        let text = MloxWriter::new().with_comments(true).write(&rule_set);
        assert!(text.contains("; Ref: see thread\n; Ref: D.esp\n[Order]\n"));
        assert!(!text.lines().any(|line| line == "D.esp"));
    }

    #[test]
    fn test_sections_open_and_close_runs() {
        let mut rule_set = RuleSet::new();
        for name in ["A.esp", "B.esp", "C.esp"] {
            rule_set.upsert_mod(name, None, ModSource::Local).unwrap();
        }
        rule_set
            .add_rule(RuleDraft::order("A.esp", "B.esp").with_section("Armor"))
            .unwrap();
        rule_set
            .add_rule(RuleDraft::order("A.esp", "C.esp").with_section("Armor"))
            .unwrap();
        rule_set.add_rule(RuleDraft::order("B.esp", "C.esp")).unwrap();

        let text = MloxWriter::new().with_comments(false).write(&rule_set);
        let expected = "\
; @Armor
[Order]
A.esp
B.esp

[Order]
A.esp
C.esp

; @
[Order]
B.esp
C.esp
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_interchange_reloads_equal() {
        let rule_set = sectioned();
        let text = to_interchange(&rule_set).unwrap();

        assert!(text.contains("section: Weapons"));
        assert!(text.contains("record: mod"));
        assert!(text.contains("record: rule"));
        assert_eq!(from_interchange(&text).unwrap(), rule_set);
    }

    #[test]
    fn test_unknown_kind_in_interchange() {
        let text = "\
- record: mod
  id: 1
  name: A.esp
- record: mod
  id: 2
  name: B.esp
- record: rule
  id: 1
  kind: NearStart
  subject: A.esp
  target: B.esp
";
        let err = from_interchange(text).unwrap_err();
        assert!(matches!(
            err,
            InterchangeError::InvalidRule {
                source: RuleError::InvalidRuleSyntax { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_rule_naming_unknown_mod() {
        let text = "\
- record: rule
  id: 1
  kind: order
  subject: A.esp
  target: B.esp
";
        let err = from_interchange(text).unwrap_err();
        assert!(matches!(
            err,
            InterchangeError::InvalidRule {
                source: RuleError::MissingMod { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_maximum_id_rejected_on_load() {
        let err = from_interchange("- record: mod\n  id: 4294967295\n  name: A.esp\n").unwrap_err();
        assert!(matches!(
            err,
            InterchangeError::Restore(RestoreError::IdOverflow { entity: "mod", id: u32::MAX })
        ));

        let text = "\
- record: mod
  id: 1
  name: A.esp
- record: mod
  id: 2
  name: B.esp
- record: rule
  id: 4294967295
  kind: order
  subject: A.esp
  target: B.esp
";
        assert!(matches!(
            from_interchange(text).unwrap_err(),
            InterchangeError::Restore(RestoreError::IdOverflow { entity: "rule", .. })
        ));
    }

    #[test]
    fn test_empty_document_is_empty_rule_set() {
        assert!(from_interchange("").unwrap().is_empty());
        assert!(from_interchange("[]").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_document() {
        let err = from_interchange("- record: planet\n").unwrap_err();
        assert!(matches!(err, InterchangeError::Parse(_)));
    }
}
