//! Advisory remediation for conflicts and rejected dependency cycles.
//!
//! The resolver only reads the rule set. Suggestions are unranked; callers
//! decide which one (if any) to apply.

use crate::diagnostics::{PreconditionViolation, RuleError};
use crate::models::{ModId, RuleDraft, RuleId, RuleKind};
use crate::state::RuleSet;

/// What to produce hints for. Both variants must come out of validation.
#[derive(Debug, Clone, Copy)]
pub enum HintRequest<'a> {
    /// A `Conflict` rule that was accepted into the rule set
    AcceptedConflict(RuleId),
    /// The error returned for a rejected `Requires` rule
    RejectedCycle(&'a RuleError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    /// Add an `Order` rule loading `first` before `then`
    AddOrder { first: ModId, then: ModId },
    /// Stop using this mod
    ExcludeMod { module: ModId },
    /// Delete an existing rule
    RemoveRule { rule: RuleId },
    /// Replace an existing rule with an `Order` rule loading `first` before `then`
    ReplaceWithOrder { rule: RuleId, first: ModId, then: ModId },
}

impl Suggestion {
    /// The rule this suggestion would add, if it adds one.
    pub fn as_draft(&self) -> Option<RuleDraft> {
        match self {
            Suggestion::AddOrder { first, then } | Suggestion::ReplaceWithOrder { first, then, .. } => {
                Some(RuleDraft::order(*first, *then))
            }
            Suggestion::ExcludeMod { .. } | Suggestion::RemoveRule { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Hints {
    /// Cycle being explained, subject first; empty for conflicts
    pub cycle_path: Vec<ModId>,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Suggest remediations for an accepted conflict or a rejected cycle.
    ///
    /// # Errors
    /// `PreconditionViolation` when the request did not come out of validation:
    /// an unknown rule id, a rule that is not a `Conflict`, an error other than
    /// `CircularDependency`, or a cycle whose closing rule is gone.
    pub fn suggest(&self, rule_set: &RuleSet, request: HintRequest<'_>) -> Result<Hints, PreconditionViolation> {
        match request {
            HintRequest::AcceptedConflict(id) => self.for_conflict(rule_set, id),
            HintRequest::RejectedCycle(err) => self.for_cycle(rule_set, err),
        }
    }

    fn for_conflict(&self, rule_set: &RuleSet, id: RuleId) -> Result<Hints, PreconditionViolation> {
        let rule = rule_set
            .get_rule(id)
            .ok_or_else(|| PreconditionViolation::new(format!("{} is not an accepted rule", id)))?;
        if rule.kind != RuleKind::Conflict {
            return Err(PreconditionViolation::new(format!(
                "{} is a {} rule, not a Conflict",
                id, rule.kind
            )));
        }

        let subject = rule.subject;
        let Some(target) = rule.target else {
            return Ok(Hints {
                cycle_path: Vec::new(),
                suggestions: vec![Suggestion::ExcludeMod { module: subject }],
            });
        };

        let ordered = rule_set
            .rules()
            .any(|other| other.kind == RuleKind::Order && other.joins(subject, target));
        let suggestions = if ordered {
            vec![
                Suggestion::ExcludeMod { module: subject },
                Suggestion::ExcludeMod { module: target },
            ]
        } else {
            vec![
                Suggestion::AddOrder {
                    first: subject,
                    then: target,
                },
                Suggestion::AddOrder {
                    first: target,
                    then: subject,
                },
            ]
        };

        tracing::debug!("{} suggestion(s) for conflict {}", suggestions.len(), id);
        Ok(Hints {
            cycle_path: Vec::new(),
            suggestions,
        })
    }

    fn for_cycle(&self, rule_set: &RuleSet, err: &RuleError) -> Result<Hints, PreconditionViolation> {
        let RuleError::CircularDependency(report) = err else {
            return Err(PreconditionViolation::new(format!(
                "cycle hints requested for a {:?} rejection",
                err.kind()
            )));
        };

        let closing = report.closing_rule();
        let subject = report.subject();
        let dependent = report.closing_dependent();
        let still_closing = rule_set.get_rule(closing).is_some_and(|rule| {
            rule.kind == RuleKind::Requires && rule.subject == dependent && rule.target == Some(subject)
        });
        if !still_closing {
            return Err(PreconditionViolation::new(format!(
                "cycle report is stale: {} no longer closes {}",
                closing, report
            )));
        }

        Ok(Hints {
            cycle_path: report.path().to_vec(),
            suggestions: vec![
                Suggestion::RemoveRule { rule: closing },
                Suggestion::ReplaceWithOrder {
                    rule: closing,
                    first: subject,
                    then: dependent,
                },
            ],
        })
    }
}
