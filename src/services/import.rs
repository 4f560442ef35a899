//! Reader for mlox rule files.
//!
//! Supports the subset of the mlox rule language that maps onto the rule
//! model: `[Order]`, `[Requires]` and `[Conflict]` blocks with plain mod names,
//! indented message lines, `!` priority markers, `; @Section` markers and `;`
//! comments. Consecutive `; Ref:` lines form one multi-line reference. Boolean
//! expressions (`[ALL ...]`, `[ANY ...]`, `[NOT ...]`) and predicates such as
//! `[VER ...]` or `[DESC ...]` are rejected as syntax errors.

use regex::Regex;
use std::sync::LazyLock;

use crate::diagnostics::RuleError;
use crate::models::{ConflictSeverity, ModRef, ModSource, RuleDraft, RuleId, RuleKind};
use crate::state::RuleSet;

static HEADER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([A-Za-z]+)\]\s*(.*)$").expect("Invalid header regex"));

static EXPRESSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[\[<]").expect("Invalid expression regex"));

static PRIORITY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(!+)\s*(.*)$").expect("Invalid priority regex"));

static REFERENCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^;+\s*ref:\s*(.*)$").expect("Invalid reference regex"));

static SECTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^;+\s*@(.*)$").expect("Invalid section regex"));

/// A rule read from a file, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRule {
    /// 1-based line of the block header
    pub line: usize,
    pub draft: RuleDraft,
}

/// A block or rule that could not be used, with its 1-based line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub line: usize,
    pub error: RuleError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub rules: Vec<ParsedRule>,
    pub errors: Vec<LineError>,
}

#[derive(Debug, Default)]
struct Block {
    line: usize,
    kind: Option<RuleKind>,
    error: Option<RuleError>,
    comments: Vec<String>,
    reference: Option<String>,
    section: Option<String>,
    messages: Vec<String>,
    severity: Option<ConflictSeverity>,
    mods: Vec<String>,
}

/// Split mlox text into candidate rules, one block at a time.
///
/// A malformed block is reported in [`ParseOutcome::errors`] and does not stop
/// the rest of the file from being read.
pub fn parse_mlox(text: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    let mut block: Option<Block> = None;
    let mut comments: Vec<String> = Vec::new();
    let mut reference: Option<String> = None;
    // Applies to every following block until the next section marker
    let mut section: Option<String> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim_end_matches('\r');

        if line.trim().is_empty() {
            comments.clear();
            reference = None;
            continue;
        }

        let trimmed = line.trim();
        if trimmed.starts_with(';') {
            if let Some(caps) = SECTION_PATTERN.captures(trimmed) {
                let name = caps[1].trim();
                section = (!name.is_empty()).then(|| name.to_string());
            } else if let Some(caps) = REFERENCE_PATTERN.captures(trimmed) {
                let line = caps[1].trim();
                reference = Some(match reference.take() {
                    Some(earlier) => format!("{}\n{}", earlier, line),
                    None => line.to_string(),
                });
            } else {
                let comment = trimmed.trim_start_matches(';').trim();
                if !comment.is_empty() {
                    comments.push(comment.to_string());
                }
            }
            continue;
        }

        if let Some(caps) = HEADER_PATTERN.captures(line) {
            if let Some(done) = block.take() {
                finish_block(done, &mut outcome);
            }
            let mut next = Block {
                line: line_no,
                comments: std::mem::take(&mut comments),
                reference: reference.take(),
                section: section.clone(),
                ..Block::default()
            };
            match caps[1].parse::<RuleKind>() {
                Ok(kind) => next.kind = Some(kind),
                Err(err) => next.error = Some(err),
            }
            let rest = caps[2].trim();
            if !rest.is_empty() {
                push_message(&mut next, rest);
            }
            block = Some(next);
            continue;
        }

        let Some(current) = block.as_mut() else {
            outcome.errors.push(LineError {
                line: line_no,
                error: RuleError::InvalidRuleSyntax {
                    reason: format!("line outside of any rule block: {}", trimmed),
                },
            });
            continue;
        };
        if current.error.is_some() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            push_message(current, trimmed);
        } else if EXPRESSION_PATTERN.is_match(line) {
            current.error = Some(RuleError::InvalidRuleSyntax {
                reason: format!("unsupported mlox expression: {}", trimmed),
            });
        } else {
            current.mods.push(trimmed.to_string());
        }
    }

    if let Some(done) = block.take() {
        finish_block(done, &mut outcome);
    }

    tracing::debug!(
        "Parsed mlox text: {} rules, {} errors",
        outcome.rules.len(),
        outcome.errors.len()
    );
    outcome
}

fn push_message(block: &mut Block, text: &str) {
    match PRIORITY_PATTERN.captures(text) {
        Some(caps) => {
            let severity = ConflictSeverity::from_marker_count(caps[1].len());
            block.severity = block.severity.max(severity);
            let message = caps[2].trim();
            if !message.is_empty() {
                block.messages.push(message.to_string());
            }
        }
        None => block.messages.push(text.to_string()),
    }
}

fn finish_block(block: Block, outcome: &mut ParseOutcome) {
    let line = block.line;
    if let Some(error) = block.error {
        outcome.errors.push(LineError { line, error });
        return;
    }
    let Some(kind) = block.kind else {
        return;
    };

    let mods = &block.mods;
    let minimum = if kind == RuleKind::Conflict { 1 } else { 2 };
    if mods.len() < minimum {
        outcome.errors.push(LineError {
            line,
            error: RuleError::InvalidRuleSyntax {
                reason: format!("[{}] block lists {} mod(s), needs at least {}", kind, mods.len(), minimum),
            },
        });
        return;
    }

    let pairs: Vec<(&str, Option<&str>)> = match kind {
        RuleKind::Order => mods
            .windows(2)
            .map(|pair| (pair[0].as_str(), Some(pair[1].as_str())))
            .collect(),
        RuleKind::Requires => mods[1..]
            .iter()
            .map(|required| (mods[0].as_str(), Some(required.as_str())))
            .collect(),
        RuleKind::Conflict if mods.len() == 1 => vec![(mods[0].as_str(), None)],
        RuleKind::Conflict => {
            let mut pairs = Vec::new();
            for (i, first) in mods.iter().enumerate() {
                for second in &mods[i + 1..] {
                    pairs.push((first.as_str(), Some(second.as_str())));
                }
            }
            pairs
        }
    };

    let messages = if kind == RuleKind::Conflict && !block.messages.is_empty() {
        &block.messages
    } else if block.messages.is_empty() {
        &block.comments
    } else {
        &block.messages
    };

    for (subject, target) in pairs {
        let mut draft = RuleDraft::new(kind, subject, target.map(ModRef::from));
        let notes = messages.join("\n");
        let generated = format!("{} conflicts with {}", subject, target.unwrap_or("other mods"));
        if !notes.is_empty() && !(block.severity.is_some() && notes == generated) {
            draft.notes = Some(notes);
        }
        if kind == RuleKind::Conflict {
            draft.severity = block.severity;
        }
        draft.reference = block.reference.clone();
        draft.section = block.section.clone();
        outcome.rules.push(ParsedRule { line, draft });
    }
}

/// Result of importing mlox text into a rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub accepted: Vec<RuleId>,
    pub rejected: Vec<LineError>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Parse mlox text and submit every rule to `rule_set`.
///
/// Mods named by a rule are created as [`ModSource::Local`] when missing. If
/// the rule is then rejected, the mods created for it are removed again, so a
/// rejected rule leaves nothing behind.
pub fn import_mlox(rule_set: &mut RuleSet, text: &str) -> ImportReport {
    let outcome = parse_mlox(text);
    let mut report = ImportReport {
        accepted: Vec::new(),
        rejected: outcome.errors,
    };

    for parsed in outcome.rules {
        let mut created = Vec::new();
        let names = std::iter::once(&parsed.draft.subject).chain(parsed.draft.target.as_ref());
        let mut upsert_failed = None;
        for reference in names {
            let ModRef::Name(name) = reference else {
                continue;
            };
            if rule_set.find_mod(name).is_some() {
                continue;
            }
            match rule_set.upsert_mod(name, None, ModSource::Local) {
                Ok(id) => created.push(id),
                Err(err) => {
                    upsert_failed = Some(err);
                    break;
                }
            }
        }

        let result = match upsert_failed {
            Some(err) => Err(err),
            None => rule_set.add_rule(parsed.draft),
        };
        match result {
            Ok(id) => report.accepted.push(id),
            Err(error) => {
                for id in created {
                    let _ = rule_set.remove_mod(id);
                }
                report.rejected.push(LineError {
                    line: parsed.line,
                    error,
                });
            }
        }
    }

    tracing::info!(
        "Imported mlox rules: {} accepted, {} rejected",
        report.accepted.len(),
        report.rejected.len()
    );
    report
}
