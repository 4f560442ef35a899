use crate::diagnostics::{CycleReport, RuleError};
use crate::models::{ConflictSeverity, ModId, ModRef, RuleDraft, RuleKind};
use crate::services::graph::DependencyGraph;
use crate::state::RuleSet;

/// A candidate rule that passed every check, with its mods resolved to ids.
///
/// Only [`RuleValidator`] produces these, so the store can commit one without
/// re-checking anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRule {
    pub(crate) kind: RuleKind,
    pub(crate) subject: ModId,
    pub(crate) target: Option<ModId>,
    pub(crate) severity: Option<ConflictSeverity>,
    pub(crate) notes: Option<String>,
    pub(crate) reference: Option<String>,
    pub(crate) section: Option<String>,
}

impl ValidatedRule {
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn subject(&self) -> ModId {
        self.subject
    }

    pub fn target(&self) -> Option<ModId> {
        self.target
    }
}

/// Accepts or rejects candidate rules before they enter a [`RuleSet`].
///
/// Checks run in a fixed order and the first failure wins:
/// 1. shape of the draft (target present where required, severity only on
///    conflicts, single-line section name)
/// 2. every referenced mod resolves
/// 3. no self-reference
/// 4. a `Requires` rule does not close a dependency cycle
/// 5. a `Requires` and a `Conflict` never join the same pair of mods
///
/// Validation reads the rule set and nothing else; it never mutates it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl RuleValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, rule_set: &RuleSet, draft: &RuleDraft) -> Result<ValidatedRule, RuleError> {
        self.check_syntax(draft)?;

        let subject = resolve(rule_set, &draft.subject)?;
        let target = match &draft.target {
            Some(reference) => Some(resolve(rule_set, reference)?),
            None => None,
        };

        if let Some(target) = target {
            if target == subject {
                return Err(RuleError::InvalidRuleSyntax {
                    reason: format!(
                        "{} rule relates {} to itself",
                        draft.kind,
                        rule_set.mod_name(subject)
                    ),
                });
            }

            match draft.kind {
                RuleKind::Requires => {
                    let graph = DependencyGraph::from_rule_set(rule_set);
                    self.check_cycle(rule_set, &graph, subject, target)?;
                    self.check_requires_against_conflicts(rule_set, subject, target)?;
                }
                RuleKind::Conflict => {
                    let graph = DependencyGraph::from_rule_set(rule_set);
                    if let Some(existing) = graph.connects(subject, target) {
                        return Err(RuleError::ConflictingRule {
                            subject: rule_set.mod_name(subject).to_string(),
                            target: rule_set.mod_name(target).to_string(),
                            existing,
                        });
                    }
                }
                RuleKind::Order => {}
            }
        }

        Ok(ValidatedRule {
            kind: draft.kind,
            subject,
            target,
            severity: draft.severity,
            notes: non_empty(draft.notes.as_deref()),
            reference: non_empty(draft.reference.as_deref()),
            section: non_empty(draft.section.as_deref()),
        })
    }

    fn check_syntax(&self, draft: &RuleDraft) -> Result<(), RuleError> {
        if draft.subject.is_blank() {
            return Err(RuleError::InvalidRuleSyntax {
                reason: format!("{} rule has an empty subject", draft.kind),
            });
        }
        match &draft.target {
            None if draft.kind.requires_target() => {
                return Err(RuleError::InvalidRuleSyntax {
                    reason: format!("{} rule for {} needs a target mod", draft.kind, draft.subject),
                });
            }
            Some(target) if target.is_blank() => {
                return Err(RuleError::InvalidRuleSyntax {
                    reason: format!("{} rule for {} has an empty target", draft.kind, draft.subject),
                });
            }
            _ => {}
        }
        if draft.severity.is_some() && draft.kind != RuleKind::Conflict {
            return Err(RuleError::InvalidRuleSyntax {
                reason: format!("severity only applies to Conflict rules, not {}", draft.kind),
            });
        }
        if let Some(section) = draft.section.as_deref() {
            if section.chars().any(char::is_control) {
                return Err(RuleError::InvalidRuleSyntax {
                    reason: format!("section name must be a single line: {:?}", section),
                });
            }
        }
        Ok(())
    }

    fn check_cycle(
        &self,
        rule_set: &RuleSet,
        graph: &DependencyGraph,
        subject: ModId,
        target: ModId,
    ) -> Result<(), RuleError> {
        rule_set.metrics().record_cycle_check();
        if !graph.would_create_cycle(subject, target) {
            return Ok(());
        }
        let Some(path) = graph.find_cycle(subject, target) else {
            return Ok(());
        };

        // The last mod on the path requires the subject; that edge closes the loop.
        let dependent = path[path.len() - 1];
        let Some(closing_rule) = graph.edge_rule(dependent, subject) else {
            return Ok(());
        };
        let names = path
            .iter()
            .map(|id| rule_set.mod_name(*id).to_string())
            .collect();

        rule_set.metrics().record_cycle_detected();
        Err(RuleError::CircularDependency(CycleReport::new(
            path,
            names,
            closing_rule,
        )))
    }

    fn check_requires_against_conflicts(
        &self,
        rule_set: &RuleSet,
        subject: ModId,
        target: ModId,
    ) -> Result<(), RuleError> {
        let existing = rule_set
            .rules()
            .find(|rule| rule.kind == RuleKind::Conflict && rule.joins(subject, target));
        match existing {
            Some(rule) => Err(RuleError::ConflictingRule {
                subject: rule_set.mod_name(subject).to_string(),
                target: rule_set.mod_name(target).to_string(),
                existing: rule.id,
            }),
            None => Ok(()),
        }
    }
}

fn resolve(rule_set: &RuleSet, reference: &ModRef) -> Result<ModId, RuleError> {
    rule_set
        .resolve(reference)
        .ok_or_else(|| RuleError::MissingMod {
            reference: reference.to_string(),
        })
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModSource, RuleKind};

    fn rule_set_with(names: &[&str]) -> RuleSet {
        let mut rule_set = RuleSet::new();
        for name in names {
            rule_set.upsert_mod(name, None, ModSource::Local).unwrap();
        }
        rule_set
    }

    #[test]
    fn test_missing_target_is_syntax_error() {
        let rule_set = rule_set_with(&["A.esp"]);
        let draft = RuleDraft::new(RuleKind::Order, "A.esp", None);

        let err = RuleValidator::new().validate(&rule_set, &draft).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRuleSyntax { .. }));
    }

    #[test]
    fn test_conflict_without_target_is_allowed() {
        let rule_set = rule_set_with(&["A.esp"]);
        let draft = RuleDraft::new(RuleKind::Conflict, "A.esp", None);

        let validated = RuleValidator::new().validate(&rule_set, &draft).unwrap();
        assert_eq!(validated.target(), None);
    }

    #[test]
    fn test_severity_on_order_rejected() {
        let rule_set = rule_set_with(&["A.esp", "B.esp"]);
        let draft = RuleDraft::order("A.esp", "B.esp").with_severity(ConflictSeverity::High);

        let err = RuleValidator::new().validate(&rule_set, &draft).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRuleSyntax { .. }));
    }

    #[test]
    fn test_syntax_checked_before_mod_resolution() {
        let rule_set = RuleSet::new();
        let draft = RuleDraft::new(RuleKind::Requires, "Ghost.esp", None);

        let err = RuleValidator::new().validate(&rule_set, &draft).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRuleSyntax { .. }));
    }

    #[test]
    fn test_missing_subject_named() {
        let rule_set = rule_set_with(&["B.esp"]);
        let draft = RuleDraft::order("Ghost.esp", "B.esp");

        let err = RuleValidator::new().validate(&rule_set, &draft).unwrap_err();
        assert_eq!(
            err,
            RuleError::MissingMod {
                reference: "Ghost.esp".to_string()
            }
        );
    }

    #[test]
    fn test_missing_target_named() {
        let rule_set = rule_set_with(&["A.esp"]);
        let draft = RuleDraft::requires("A.esp", "Ghost.esp");

        let err = RuleValidator::new().validate(&rule_set, &draft).unwrap_err();
        assert!(matches!(err, RuleError::MissingMod { ref reference } if reference == "Ghost.esp"));
    }

    #[test]
    fn test_self_reference_rejected_caselessly() {
        let rule_set = rule_set_with(&["A.esp"]);
        let draft = RuleDraft::requires("A.esp", "a.ESP");

        let err = RuleValidator::new().validate(&rule_set, &draft).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRuleSyntax { .. }));
    }

    #[test]
    fn test_long_cycle_reports_full_path() {
        let mut rule_set = rule_set_with(&["A.esp", "B.esp", "C.esp"]);
        rule_set.add_rule(RuleDraft::requires("A.esp", "B.esp")).unwrap();
        let closing = rule_set.add_rule(RuleDraft::requires("B.esp", "C.esp")).unwrap();

        // C requires A would close A -> B -> C -> A
        let draft = RuleDraft::requires("C.esp", "A.esp");
        let err = RuleValidator::new().validate(&rule_set, &draft).unwrap_err();

        let RuleError::CircularDependency(report) = err else {
            panic!("expected a cycle, got {:?}", err);
        };
        assert_eq!(report.names(), ["C.esp", "A.esp", "B.esp"]);
        assert_eq!(report.closing_rule(), closing);
    }

    #[test]
    fn test_requires_after_conflict_is_contradiction() {
        let mut rule_set = rule_set_with(&["A.esp", "B.esp"]);
        let conflict = rule_set.add_rule(RuleDraft::conflict("B.esp", "A.esp")).unwrap();

        let err = RuleValidator::new()
            .validate(&rule_set, &RuleDraft::requires("A.esp", "B.esp"))
            .unwrap_err();
        assert!(matches!(err, RuleError::ConflictingRule { existing, .. } if existing == conflict));
    }

    #[test]
    fn test_blank_notes_dropped() {
        let rule_set = rule_set_with(&["A.esp", "B.esp"]);
        let draft = RuleDraft::order("A.esp", "B.esp").with_notes("   ");

        let validated = RuleValidator::new().validate(&rule_set, &draft).unwrap();
        assert_eq!(validated.notes, None);
    }

    #[test]
    fn test_multiline_section_rejected() {
        let rule_set = rule_set_with(&["A.esp", "B.esp"]);
        let draft = RuleDraft::order("A.esp", "B.esp").with_section("Armor\n[Order]");

        let err = RuleValidator::new().validate(&rule_set, &draft).unwrap_err();
        assert!(matches!(err, RuleError::InvalidRuleSyntax { .. }));

        let validated = RuleValidator::new()
            .validate(&rule_set, &RuleDraft::order("A.esp", "B.esp").with_section(" Armor "))
            .unwrap();
        assert_eq!(validated.section.as_deref(), Some("Armor"));
    }
}
