//! Rule Evaluator.
//!
//! Rule sets are resolved by hash through a [`RuleSetResolver`] and
//! evaluated in declaration order. Evaluation is pure: the same record,
//! outcome and rule set always produce the same triggered-rule list.
//!
//! Rules run in two phases:
//!
//! 1. Admission, before execution: `prohibit` and `require` rules.
//! 2. Post-execution: `output` rules against a successful result, then
//!    `reputation` rules against any result.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use r7_interchange::{ActionRecord, ActionResult, ReputationImpact, Rule, RuleKind, RuleSet};

use crate::error::{AdmissionError, EngineError, ErrorKind};
use crate::predicate::{eval_pred, EvalContext};
use crate::provenance::ProvenanceCollector;

/// Resolves a rules hash to an immutable rule set.
pub trait RuleSetResolver: Send + Sync + 'static {
    fn resolve(&self, rules_hash: &str) -> Option<Arc<RuleSet>>;
}

/// In-memory rule-set store keyed by content hash.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    sets: RwLock<HashMap<String, Arc<RuleSet>>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a rule set and return its hash. Publishing the same set
    /// twice is a no-op.
    pub fn publish(&self, rule_set: RuleSet) -> Result<String, EngineError> {
        let hash = rule_set.hash()?;
        let mut sets = self.sets.write().unwrap_or_else(|p| p.into_inner());
        sets.entry(hash.clone()).or_insert_with(|| Arc::new(rule_set));
        Ok(hash)
    }
}

impl RuleSetResolver for RuleRegistry {
    fn resolve(&self, rules_hash: &str) -> Option<Arc<RuleSet>> {
        let sets = self.sets.read().unwrap_or_else(|p| p.into_inner());
        sets.get(rules_hash).cloned()
    }
}

/// A rule whose trigger matched, with the inputs the trigger read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredRule {
    pub rule_id: String,
    pub kind: RuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ReputationImpact>,
    pub inputs_used: Vec<String>,
}

impl TriggeredRule {
    fn new(rule: &Rule, collector: ProvenanceCollector) -> Self {
        TriggeredRule {
            rule_id: rule.id.clone(),
            kind: rule.kind,
            impact: rule.impact.clone(),
            inputs_used: collector.into_inputs(),
        }
    }
}

fn eval_rule(rule: &Rule, ctx: &EvalContext<'_>) -> (bool, ProvenanceCollector) {
    let mut collector = ProvenanceCollector::new();
    let holds = eval_pred(&rule.trigger, ctx, &mut collector);
    (holds, collector)
}

/// Evaluate the admission rules of `rules` against a record.
///
/// Returns the admission rules whose triggers matched. Fails with
/// `RuleViolation` naming every violated rule when a `prohibit` rule
/// matches or a `require` rule does not.
pub fn evaluate_admission(
    rules: &RuleSet,
    record: &ActionRecord,
) -> Result<Vec<TriggeredRule>, AdmissionError> {
    let ctx = EvalContext::admission(record);
    let mut triggered = Vec::new();
    let mut violations = Vec::new();

    for rule in rules.rules.iter().filter(|r| r.kind.is_admission()) {
        let (holds, collector) = eval_rule(rule, &ctx);
        match rule.kind {
            RuleKind::Prohibit if holds => violations.push(rule.id.as_str()),
            RuleKind::Require if !holds => violations.push(rule.id.as_str()),
            _ => {}
        }
        if holds {
            triggered.push(TriggeredRule::new(rule, collector));
        }
    }

    if violations.is_empty() {
        Ok(triggered)
    } else {
        Err(AdmissionError::new(
            ErrorKind::RuleViolation,
            format!("violated rule(s): {}", violations.join(", ")),
        ))
    }
}

/// Ids of the `output` rules a successful result fails. Non-success
/// results are not checked.
pub fn evaluate_output(rules: &RuleSet, record: &ActionRecord, result: &ActionResult) -> Vec<String> {
    if !result.status.is_success() {
        return Vec::new();
    }
    let ctx = EvalContext::post_execution(record, result);
    rules
        .rules
        .iter()
        .filter(|r| r.kind == RuleKind::Output)
        .filter(|r| !eval_rule(r, &ctx).0)
        .map(|r| r.id.clone())
        .collect()
}

/// The `reputation` rules whose triggers hold for this outcome, in
/// declaration order.
pub fn evaluate_reputation(
    rules: &RuleSet,
    record: &ActionRecord,
    result: &ActionResult,
) -> Vec<TriggeredRule> {
    let ctx = EvalContext::post_execution(record, result);
    rules
        .rules
        .iter()
        .filter(|r| r.kind == RuleKind::Reputation)
        .filter_map(|rule| {
            let (holds, collector) = eval_rule(rule, &ctx);
            holds.then(|| TriggeredRule::new(rule, collector))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{failure_result, record, success_result};
    use r7_interchange::{Predicate, ResultStatus};

    fn rule(id: &str, kind: RuleKind, trigger: Predicate) -> Rule {
        Rule {
            id: id.into(),
            kind,
            trigger,
            impact: None,
            description: None,
        }
    }

    fn law() -> RuleSet {
        RuleSet {
            id: "law".into(),
            version: 1,
            rules: vec![
                rule(
                    "no_delete",
                    RuleKind::Prohibit,
                    Predicate::ActionIs {
                        action: "delete".into(),
                    },
                ),
                rule(
                    "needs_target",
                    RuleKind::Require,
                    Predicate::Not {
                        predicate: Box::new(Predicate::TargetIs {
                            target: String::new(),
                        }),
                    },
                ),
                rule(
                    "has_summary",
                    RuleKind::Output,
                    Predicate::OutputPresent {
                        key: "summary".into(),
                    },
                ),
                rule(
                    "on_success",
                    RuleKind::Reputation,
                    Predicate::StatusIs {
                        status: ResultStatus::Success,
                    },
                ),
                rule(
                    "on_failure",
                    RuleKind::Reputation,
                    Predicate::StatusIs {
                        status: ResultStatus::Failure,
                    },
                ),
            ],
        }
    }

    #[test]
    fn admission_passes_and_reports_triggered_requires() {
        let rec = record("analyze", "10");
        let triggered = evaluate_admission(&law(), &rec).unwrap();
        let ids: Vec<_> = triggered.iter().map(|t| t.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["needs_target"]);
    }

    #[test]
    fn admission_names_every_violation() {
        let mut rec = record("delete", "10");
        rec.request.target = String::new();
        let err = evaluate_admission(&law(), &rec).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RuleViolation);
        assert_eq!(err.detail, "violated rule(s): no_delete, needs_target");
    }

    #[test]
    fn output_rules_checked_only_on_success() {
        let rec = record("analyze", "10");
        let ok = success_result(&rec, "5");
        assert_eq!(evaluate_output(&law(), &rec, &ok), vec!["has_summary"]);
        let failed = failure_result(&rec, "5");
        assert!(evaluate_output(&law(), &rec, &failed).is_empty());
    }

    #[test]
    fn reputation_rules_follow_outcome() {
        let rec = record("analyze", "10");
        let ok = success_result(&rec, "5");
        let failed = failure_result(&rec, "5");
        assert_eq!(evaluate_reputation(&law(), &rec, &ok)[0].rule_id, "on_success");
        assert_eq!(evaluate_reputation(&law(), &rec, &failed)[0].rule_id, "on_failure");
    }

    #[test]
    fn evaluation_is_deterministic() {
        let rec = record("analyze", "10");
        let ok = success_result(&rec, "5");
        let a = serde_json::to_vec(&evaluate_reputation(&law(), &rec, &ok)).unwrap();
        let b = serde_json::to_vec(&evaluate_reputation(&law(), &rec, &ok)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn registry_resolves_by_hash() {
        let registry = RuleRegistry::new();
        let hash = registry.publish(law()).unwrap();
        assert_eq!(registry.resolve(&hash).unwrap().id, "law");
        assert!(registry.resolve("unknown").is_none());
    }
}
