//! Reputation Computation Engine.
//!
//! Turns the reputation rules triggered by an outcome into a
//! [`ReputationDelta`]:
//!
//! 1. Each triggered rule's factors are resolved to raw weights in [0, 1]
//!    and normalized so they sum to 1 within the rule.
//! 2. For every dimension the rule touches, the base delta is multiplied by
//!    each modifier whose factor clears its threshold, in declaration order.
//!    Proportional modifiers multiply by their multiplier times the factor's
//!    raw weight instead.
//! 3. Gains are diminished once the pair has repeated the action type more
//!    than `diminishing_after` times: each positive sum is divided by
//!    `1 + (repeats - diminishing_after) * diminishing_step`. Penalties are
//!    never diminished.
//! 4. Per-dimension sums across rules are clamped to `±delta_bound`.
//!
//! A rule whose factors cannot be resolved contributes nothing and is
//! reported in `computation_errors`. The delta is always produced, also for
//! failed executions and when no rule triggered.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use time::OffsetDateTime;

use r7_interchange::{
    ActionRecord, ActionResult, ContributingFactor, Dimension, DimensionChange, FactorSource,
    ReputationImpact, ReputationDelta, TensorKind, TensorSnapshot,
};

use crate::predicate::{eval_pred, json_decimal, EvalContext};
use crate::provenance::ProvenanceCollector;
use crate::rules::TriggeredRule;

pub struct ReputationEngine {
    delta_bound: Decimal,
    diminishing_after: u64,
    diminishing_step: Decimal,
}

/// A rule's resolved contribution: per-dimension change and the
/// normalized factors behind it.
struct RuleContribution {
    changes: BTreeMap<Dimension, Decimal>,
    factors: Vec<(String, Decimal)>,
}

impl ReputationEngine {
    /// An engine without diminishing returns.
    pub fn new(delta_bound: Decimal) -> Self {
        ReputationEngine {
            delta_bound: delta_bound.abs(),
            diminishing_after: u64::MAX,
            diminishing_step: Decimal::ZERO,
        }
    }

    pub fn with_diminishing(mut self, after: u64, step: Decimal) -> Self {
        self.diminishing_after = after;
        self.diminishing_step = step.max(Decimal::ZERO);
        self
    }

    /// Multiplier for gains after `repeats` earlier outcomes of the same
    /// action type.
    pub fn diminishing_factor(&self, repeats: u64) -> Decimal {
        if repeats <= self.diminishing_after {
            return Decimal::ONE;
        }
        let excess = Decimal::from(repeats - self.diminishing_after);
        excess
            .checked_mul(self.diminishing_step)
            .and_then(|d| d.checked_add(Decimal::ONE))
            .and_then(|d| Decimal::ONE.checked_div(d))
            .unwrap_or(Decimal::ZERO)
    }

    /// Compute the delta for one executed action.
    ///
    /// `current` is the subject's tensor snapshot in the acting role; it
    /// supplies the `from` side of every dimension change. `repeats` counts
    /// the pair's earlier outcomes of the same action type.
    pub fn compute(
        &self,
        record: &ActionRecord,
        record_hash: &str,
        result: &ActionResult,
        triggered: &[TriggeredRule],
        current: &TensorSnapshot,
        repeats: u64,
        now: OffsetDateTime,
    ) -> ReputationDelta {
        let ctx = EvalContext::post_execution(record, result);
        let mut sums: BTreeMap<Dimension, Decimal> = BTreeMap::new();
        let mut contributing = Vec::new();
        let mut errors = Vec::new();

        for rule in triggered {
            let Some(impact) = &rule.impact else {
                continue;
            };
            match contribution(impact, &ctx) {
                Ok(c) => {
                    for (dim, change) in c.changes {
                        let sum = sums.entry(dim).or_insert(Decimal::ZERO);
                        *sum = sum.saturating_add(change);
                    }
                    contributing.extend(c.factors.into_iter().map(|(factor, weight)| {
                        ContributingFactor {
                            factor,
                            weight,
                            rule: rule.rule_id.clone(),
                        }
                    }));
                }
                Err(msg) => {
                    tracing::warn!(
                        rule = %rule.rule_id,
                        record = %record_hash,
                        "reputation rule skipped: {msg}"
                    );
                    errors.push(format!("{}: {}", rule.rule_id, msg));
                }
            }
        }

        let diminishing = self.diminishing_factor(repeats);
        let mut t3_delta = BTreeMap::new();
        let mut v3_delta = BTreeMap::new();
        for (dim, sum) in sums {
            let sum = if sum > Decimal::ZERO {
                sum.checked_mul(diminishing).unwrap_or(sum)
            } else {
                sum
            };
            let change = sum.clamp(-self.delta_bound, self.delta_bound);
            let from = current.value(dim);
            let entry = DimensionChange {
                change,
                from,
                to: dim.clamp(from + change),
            };
            match dim.tensor() {
                TensorKind::Trust => t3_delta.insert(dim, entry),
                TensorKind::Value => v3_delta.insert(dim, entry),
            };
        }

        let rule_triggered: Vec<String> = triggered.iter().map(|t| t.rule_id.clone()).collect();
        let mut reason = if rule_triggered.is_empty() {
            format!("{}: no reputation rules triggered", result.status)
        } else {
            format!("{}: {}", result.status, rule_triggered.join(", "))
        };
        if diminishing < Decimal::ONE {
            reason.push_str(&format!(" (gains diminished after {repeats} repeats)"));
        }

        ReputationDelta {
            subject: record.role.actor.clone(),
            role: record.role.role_ref.clone(),
            action_ref: record_hash.to_string(),
            rule_triggered,
            reason,
            net_trust_change: t3_delta.values().map(|c: &DimensionChange| c.change).sum(),
            net_value_change: v3_delta.values().map(|c: &DimensionChange| c.change).sum(),
            t3_delta,
            v3_delta,
            contributing_factors: contributing,
            witnesses: Vec::new(),
            timestamp: now,
            computation_errors: errors,
        }
    }
}

fn contribution(impact: &ReputationImpact, ctx: &EvalContext<'_>) -> Result<RuleContribution, String> {
    let mut raw = Vec::with_capacity(impact.factors.len());
    let mut names = BTreeSet::new();
    for template in &impact.factors {
        if !names.insert(template.name.as_str()) {
            return Err(format!("factor '{}' is declared twice", template.name));
        }
        let weight = factor_weight(&template.source, ctx)
            .map_err(|e| format!("factor '{}': {}", template.name, e))?;
        raw.push((template.name.clone(), weight));
    }

    let total: Decimal = raw.iter().map(|(_, w)| *w).sum();
    let factors: Vec<(String, Decimal)> = raw
        .iter()
        .map(|(name, w)| {
            let normalized = if total.is_zero() { Decimal::ZERO } else { *w / total };
            (name.clone(), normalized)
        })
        .collect();

    let mut changes = BTreeMap::new();
    for (dim, dim_impact) in &impact.dimensions {
        let mut change = dim_impact.base_delta;
        for modifier in &dim_impact.modifiers {
            let lookup = |weights: &[(String, Decimal)]| {
                weights
                    .iter()
                    .find(|(name, _)| *name == modifier.factor)
                    .map(|(_, w)| *w)
                    .ok_or_else(|| format!("modifier references unknown factor '{}'", modifier.factor))
            };
            let multiplier = if modifier.proportional {
                modifier.multiplier.checked_mul(lookup(&raw)?)
            } else {
                let weight = lookup(&factors)?;
                let applies = match modifier.min_weight {
                    Some(min) => weight >= min,
                    None => weight > Decimal::ZERO,
                };
                Some(if applies { modifier.multiplier } else { Decimal::ONE })
            };
            change = multiplier
                .and_then(|m| change.checked_mul(m))
                .ok_or_else(|| format!("{dim} change overflows"))?;
        }
        changes.insert(*dim, change);
    }

    Ok(RuleContribution { changes, factors })
}

fn unit(value: Decimal) -> Decimal {
    value.clamp(Decimal::ZERO, Decimal::ONE)
}

/// Raw weight of one factor, in [0, 1].
fn factor_weight(source: &FactorSource, ctx: &EvalContext<'_>) -> Result<Decimal, String> {
    let record = ctx.record;
    match source {
        FactorSource::Constant { weight } => {
            if *weight < Decimal::ZERO || *weight > Decimal::ONE {
                return Err(format!("constant weight {weight} is outside [0, 1]"));
            }
            Ok(*weight)
        }
        FactorSource::Flag { when } => {
            let holds = eval_pred(when, ctx, &mut ProvenanceCollector::new());
            Ok(if holds { Decimal::ONE } else { Decimal::ZERO })
        }
        FactorSource::Param { key } => record
            .request
            .parameters
            .get(key)
            .and_then(json_decimal)
            .map(unit)
            .ok_or_else(|| format!("parameter '{key}' is missing or not numeric")),
        FactorSource::OutputField { key } => ctx
            .outcome
            .and_then(|r| r.output.data.get(key))
            .and_then(json_decimal)
            .map(unit)
            .ok_or_else(|| format!("output field '{key}' is missing or not numeric")),
        FactorSource::ResourceEfficiency { resource } => {
            let required = record
                .resource
                .required
                .get(*resource)
                .filter(|r| *r > Decimal::ZERO)
                .ok_or_else(|| format!("no positive {resource} requirement declared"))?;
            let consumed = ctx
                .outcome
                .map(|r| r.resource_consumed.amount(*resource))
                .unwrap_or(Decimal::ZERO);
            let ratio = consumed.checked_div(required).unwrap_or(Decimal::MAX);
            Ok(unit(Decimal::ONE.saturating_sub(ratio)))
        }
        FactorSource::StakeRatio { scale } => {
            if *scale <= Decimal::ZERO {
                return Err(format!("stake scale {scale} must be positive"));
            }
            let ratio = record
                .request
                .resource_stake
                .checked_div(*scale)
                .unwrap_or(Decimal::MAX);
            Ok(unit(ratio))
        }
        FactorSource::ContextDepth { max } => {
            if *max == 0 {
                return Err("context depth max must be positive".to_string());
            }
            Ok(unit(
                Decimal::from(record.reference.context_depth) / Decimal::from(*max),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{dec, failure_result, record, success_result};
    use r7_interchange::{
        DimensionImpact, FactorTemplate, Modifier, Predicate, ResourceKind, RuleKind, RuleSet,
    };

    fn triggered(id: &str, impact: ReputationImpact) -> TriggeredRule {
        TriggeredRule {
            rule_id: id.into(),
            kind: RuleKind::Reputation,
            impact: Some(impact),
            inputs_used: vec![],
        }
    }

    fn impact(
        factors: Vec<FactorTemplate>,
        dims: Vec<(Dimension, DimensionImpact)>,
    ) -> ReputationImpact {
        ReputationImpact {
            factors,
            dimensions: dims.into_iter().collect(),
            witnesses_required: 1,
            designated_witnesses: vec![],
        }
    }

    fn engine() -> ReputationEngine {
        ReputationEngine::new(Decimal::ONE)
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    #[test]
    fn modifier_multiplies_base_delta() {
        let rec = record("analyze", "100");
        let mut result = success_result(&rec, "60");
        result.output = crate::meter::output_of(serde_json::json!({ "early": true }));
        let rule = triggered(
            "success_bonus",
            impact(
                vec![FactorTemplate {
                    name: "early_completion".into(),
                    source: FactorSource::Flag {
                        when: Predicate::OutputPresent { key: "early".into() },
                    },
                }],
                vec![(
                    Dimension::Training,
                    DimensionImpact {
                        base_delta: dec("0.01"),
                        modifiers: vec![Modifier {
                            factor: "early_completion".into(),
                            multiplier: dec("1.3"),
                            min_weight: None,
                            proportional: false,
                        }],
                    },
                )],
            ),
        );
        let delta = engine().compute(&rec, "h", &result, &[rule], &TensorSnapshot::neutral(), 0, now());
        let training = &delta.t3_delta[&Dimension::Training];
        assert_eq!(training.change, dec("0.013"));
        assert_eq!(training.from, dec("0.5"));
        assert_eq!(training.to, dec("0.513"));
        assert_eq!(delta.net_trust_change, dec("0.013"));
        assert!(delta.v3_delta.is_empty());
        assert_eq!(delta.reason, "success: success_bonus");
        assert_eq!(delta.contributing_factors[0].weight, Decimal::ONE);
    }

    #[test]
    fn modifier_skipped_when_factor_weight_is_zero() {
        let rec = record("analyze", "100");
        let result = success_result(&rec, "60");
        let rule = triggered(
            "success_bonus",
            impact(
                vec![FactorTemplate {
                    name: "early_completion".into(),
                    source: FactorSource::Flag {
                        when: Predicate::OutputPresent { key: "early".into() },
                    },
                }],
                vec![(
                    Dimension::Training,
                    DimensionImpact {
                        base_delta: dec("0.01"),
                        modifiers: vec![Modifier {
                            factor: "early_completion".into(),
                            multiplier: dec("1.3"),
                            min_weight: None,
                            proportional: false,
                        }],
                    },
                )],
            ),
        );
        let delta = engine().compute(&rec, "h", &result, &[rule], &TensorSnapshot::neutral(), 0, now());
        assert_eq!(delta.change(Dimension::Training), dec("0.01"));
    }

    #[test]
    fn modifiers_chain_multiplicatively_in_order() {
        let rec = record("analyze", "100");
        let result = success_result(&rec, "50");
        let always = |name: &str| FactorTemplate {
            name: name.into(),
            source: FactorSource::Constant { weight: dec("0.5") },
        };
        let rule = triggered(
            "r",
            impact(
                vec![always("a"), always("b")],
                vec![(
                    Dimension::Veracity,
                    DimensionImpact {
                        base_delta: dec("0.01"),
                        modifiers: vec![
                            Modifier { factor: "a".into(), multiplier: dec("1.5"), min_weight: None, proportional: false },
                            Modifier { factor: "b".into(), multiplier: dec("2"), min_weight: Some(dec("0.5")), proportional: false },
                        ],
                    },
                )],
            ),
        );
        let delta = engine().compute(&rec, "h", &result, &[rule], &TensorSnapshot::neutral(), 0, now());
        assert_eq!(delta.change(Dimension::Veracity), dec("0.03"));
        // Two equal factors normalize to one half each.
        assert!(delta.contributing_factors.iter().all(|f| f.weight == dec("0.5")));
    }

    #[test]
    fn changes_are_clamped_to_bound() {
        let rec = record("analyze", "100");
        let result = success_result(&rec, "50");
        let big = |id: &str| {
            triggered(
                id,
                impact(
                    vec![],
                    vec![(
                        Dimension::Talent,
                        DimensionImpact { base_delta: dec("0.8"), modifiers: vec![] },
                    )],
                ),
            )
        };
        let delta = ReputationEngine::new(dec("1"))
            .compute(&rec, "h", &result, &[big("a"), big("b")], &TensorSnapshot::neutral(), 0, now());
        let talent = &delta.t3_delta[&Dimension::Talent];
        assert_eq!(talent.change, Decimal::ONE);
        assert_eq!(talent.to, Decimal::ONE);
    }

    #[test]
    fn failure_is_scored() {
        let rec = record("analyze", "100");
        let result = failure_result(&rec, "30");
        let standard = RuleSet::standard();
        let fired = crate::rules::evaluate_reputation(&standard, &rec, &result);
        let delta = engine().compute(&rec, "h", &result, &fired, &TensorSnapshot::neutral(), 0, now());
        assert_eq!(delta.rule_triggered, vec!["default_failure"]);
        assert_eq!(delta.change(Dimension::Temperament), dec("-0.02"));
        assert_eq!(delta.change(Dimension::Validity), dec("-0.01"));
        assert!(delta.net_trust_change < Decimal::ZERO);
    }

    #[test]
    fn no_triggered_rules_yields_explicit_zero_delta() {
        let rec = record("analyze", "100");
        let result = failure_result(&rec, "30");
        let delta = engine().compute(&rec, "h", &result, &[], &TensorSnapshot::neutral(), 0, now());
        assert!(delta.is_zero());
        assert_eq!(delta.reason, "failure: no reputation rules triggered");
        assert_eq!(delta.subject, "lct:alice");
        assert_eq!(delta.role, "role:analyst");
    }

    #[test]
    fn unresolvable_factor_is_reported_and_contributes_nothing() {
        let rec = record("analyze", "100");
        let result = success_result(&rec, "50");
        let broken = triggered(
            "broken",
            impact(
                vec![FactorTemplate {
                    name: "speed".into(),
                    source: FactorSource::Param { key: "deadline_met".into() },
                }],
                vec![(
                    Dimension::Training,
                    DimensionImpact { base_delta: dec("0.5"), modifiers: vec![] },
                )],
            ),
        );
        let fine = triggered(
            "fine",
            impact(
                vec![],
                vec![(
                    Dimension::Training,
                    DimensionImpact { base_delta: dec("0.01"), modifiers: vec![] },
                )],
            ),
        );
        let delta = engine().compute(&rec, "h", &result, &[broken, fine], &TensorSnapshot::neutral(), 0, now());
        assert_eq!(delta.change(Dimension::Training), dec("0.01"));
        assert_eq!(delta.computation_errors.len(), 1);
        assert!(delta.computation_errors[0].starts_with("broken: factor 'speed'"));
        assert_eq!(delta.rule_triggered, vec!["broken", "fine"]);
    }

    #[test]
    fn unknown_modifier_factor_is_an_error() {
        let rec = record("analyze", "100");
        let result = success_result(&rec, "50");
        let rule = triggered(
            "r",
            impact(
                vec![],
                vec![(
                    Dimension::Validity,
                    DimensionImpact {
                        base_delta: dec("0.01"),
                        modifiers: vec![Modifier {
                            factor: "ghost".into(),
                            multiplier: dec("2"),
                            min_weight: None,
                            proportional: false,
                        }],
                    },
                )],
            ),
        );
        let delta = engine().compute(&rec, "h", &result, &[rule], &TensorSnapshot::neutral(), 0, now());
        assert!(delta.is_zero());
        assert!(delta.computation_errors[0].contains("unknown factor 'ghost'"));
    }

    #[test]
    fn efficiency_and_stake_factors() {
        let mut rec = record("analyze", "100");
        rec.request.resource_stake = dec("500");
        let result = success_result(&rec, "25");
        let ctx = EvalContext::post_execution(&rec, &result);
        assert_eq!(
            factor_weight(&FactorSource::ResourceEfficiency { resource: ResourceKind::Work }, &ctx),
            Ok(dec("0.75"))
        );
        assert_eq!(
            factor_weight(&FactorSource::StakeRatio { scale: dec("1000") }, &ctx),
            Ok(dec("0.5"))
        );
        assert!(factor_weight(&FactorSource::ResourceEfficiency { resource: ResourceKind::Storage }, &ctx).is_err());
    }

    #[test]
    fn stake_reward_scales_with_stake_up_to_double() {
        let standard = RuleSet::standard();
        // (stake, talent, veracity): talent 0.01 and veracity 0.02 scaled by
        // min(stake / 100, 2), plus the 0.01 veracity of default_success.
        let cases = [
            ("1", "0.0001", "0.0102"),
            ("100", "0.01", "0.03"),
            ("150", "0.015", "0.04"),
            ("1000", "0.02", "0.05"),
        ];
        for (stake, talent, veracity) in cases {
            let mut rec = record("analyze", "100");
            rec.request.resource_stake = dec(stake);
            // 90% consumed keeps efficiency_bonus out.
            let result = success_result(&rec, "90");
            let fired = crate::rules::evaluate_reputation(&standard, &rec, &result);
            assert_eq!(
                fired.iter().map(|t| t.rule_id.as_str()).collect::<Vec<_>>(),
                vec!["default_success", "stake_reward"]
            );
            let delta = engine().compute(&rec, "h", &result, &fired, &TensorSnapshot::neutral(), 0, now());
            assert_eq!(delta.change(Dimension::Talent), dec(talent), "stake {stake}");
            assert_eq!(delta.change(Dimension::Veracity), dec(veracity), "stake {stake}");
            assert_eq!(delta.change(Dimension::Valuation), Decimal::ZERO, "stake {stake}");
        }
    }

    #[test]
    fn zero_stake_earns_no_stake_reward() {
        let mut rec = record("analyze", "100");
        rec.request.resource_stake = Decimal::ZERO;
        let result = success_result(&rec, "90");
        let standard = RuleSet::standard();
        let fired = crate::rules::evaluate_reputation(&standard, &rec, &result);
        let delta = engine().compute(&rec, "h", &result, &fired, &TensorSnapshot::neutral(), 0, now());
        assert_eq!(delta.rule_triggered, vec!["default_success"]);
        assert_eq!(delta.change(Dimension::Talent), Decimal::ZERO);
        assert_eq!(delta.change(Dimension::Veracity), dec("0.01"));
    }

    #[test]
    fn efficiency_bonus_rewards_talent_and_valuation() {
        let mut rec = record("analyze", "100");
        rec.request.resource_stake = Decimal::ZERO;
        let result = success_result(&rec, "50");
        let standard = RuleSet::standard();
        let fired = crate::rules::evaluate_reputation(&standard, &rec, &result);
        let delta = engine().compute(&rec, "h", &result, &fired, &TensorSnapshot::neutral(), 0, now());
        assert_eq!(delta.rule_triggered, vec!["default_success", "efficiency_bonus"]);
        assert_eq!(delta.change(Dimension::Talent), dec("0.015"));
        assert_eq!(delta.change(Dimension::Valuation), dec("0.01"));
    }

    #[test]
    fn proportional_modifier_uses_raw_weight() {
        let rec = record("analyze", "100");
        let result = success_result(&rec, "50");
        let rule = triggered(
            "r",
            impact(
                vec![
                    FactorTemplate {
                        name: "quarter".into(),
                        source: FactorSource::Constant { weight: dec("0.25") },
                    },
                    FactorTemplate {
                        name: "full".into(),
                        source: FactorSource::Constant { weight: Decimal::ONE },
                    },
                ],
                vec![(
                    Dimension::Validity,
                    DimensionImpact {
                        base_delta: dec("0.1"),
                        modifiers: vec![Modifier {
                            factor: "quarter".into(),
                            multiplier: dec("4"),
                            min_weight: None,
                            proportional: true,
                        }],
                    },
                )],
            ),
        );
        let delta = engine().compute(&rec, "h", &result, &[rule], &TensorSnapshot::neutral(), 0, now());
        // 0.1 × 4 × 0.25, not the normalized 0.2 weight.
        assert_eq!(delta.change(Dimension::Validity), dec("0.1"));
        assert_eq!(delta.contributing_factors[0].weight, dec("0.2"));
    }

    #[test]
    fn diminishing_factor_after_threshold() {
        let diminishing = engine().with_diminishing(5, dec("0.2"));
        assert_eq!(diminishing.diminishing_factor(0), Decimal::ONE);
        assert_eq!(diminishing.diminishing_factor(5), Decimal::ONE);
        assert_eq!(diminishing.diminishing_factor(10), dec("0.5"));
        assert_eq!(diminishing.diminishing_factor(25), dec("0.2"));
        assert!(diminishing.diminishing_factor(6) < Decimal::ONE);
        // Plain engines never diminish.
        assert_eq!(engine().diminishing_factor(1_000), Decimal::ONE);
    }

    #[test]
    fn repeated_actions_diminish_gains_but_not_penalties() {
        let diminishing = engine().with_diminishing(5, dec("0.2"));
        let standard = RuleSet::standard();
        let rec = record("analyze", "100");

        let ok = success_result(&rec, "90");
        let fired = crate::rules::evaluate_reputation(&standard, &rec, &ok);
        let fresh = diminishing.compute(&rec, "h", &ok, &fired, &TensorSnapshot::neutral(), 5, now());
        assert_eq!(fresh.change(Dimension::Training), dec("0.01"));
        assert!(!fresh.reason.contains("diminished"));

        let repeated = diminishing.compute(&rec, "h", &ok, &fired, &TensorSnapshot::neutral(), 10, now());
        assert_eq!(repeated.change(Dimension::Training), dec("0.005"));
        assert_eq!(repeated.change(Dimension::Veracity), dec("0.015"));
        assert!(repeated.reason.ends_with("(gains diminished after 10 repeats)"));

        let failed = failure_result(&rec, "30");
        let fired = crate::rules::evaluate_reputation(&standard, &rec, &failed);
        let penalty = diminishing.compute(&rec, "h", &failed, &fired, &TensorSnapshot::neutral(), 10, now());
        assert_eq!(penalty.change(Dimension::Temperament), dec("-0.02"));
    }

    #[test]
    fn computation_is_deterministic() {
        let rec = record("analyze", "100");
        let result = success_result(&rec, "50");
        let standard = RuleSet::standard();
        let fired = crate::rules::evaluate_reputation(&standard, &rec, &result);
        let a = engine().compute(&rec, "h", &result, &fired, &TensorSnapshot::neutral(), 0, now());
        let b = engine().compute(&rec, "h", &result, &fired, &TensorSnapshot::neutral(), 0, now());
        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    }
}
