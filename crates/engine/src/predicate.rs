//! Trigger predicate evaluator.
//!
//! Predicates are total: every variant evaluates to a boolean for any
//! input. Missing parameters, non-numeric values and outcome predicates
//! evaluated before execution all read as `false`.

use std::str::FromStr;

use rust_decimal::Decimal;

use r7_interchange::{ActionRecord, ActionResult, Predicate};

use crate::provenance::ProvenanceCollector;

/// What a predicate is evaluated against. `outcome` is `None` during
/// admission.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub record: &'a ActionRecord,
    pub outcome: Option<&'a ActionResult>,
}

impl<'a> EvalContext<'a> {
    pub fn admission(record: &'a ActionRecord) -> Self {
        EvalContext {
            record,
            outcome: None,
        }
    }

    pub fn post_execution(record: &'a ActionRecord, outcome: &'a ActionResult) -> Self {
        EvalContext {
            record,
            outcome: Some(outcome),
        }
    }
}

/// Read a JSON value as a decimal. Accepts numbers and numeric strings.
pub fn json_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .ok()
        }
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

/// Action-name glob: a trailing `*` matches any suffix, anything else is
/// an exact match.
pub fn action_matches(pattern: &str, action: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => action.starts_with(prefix),
        None => pattern == action,
    }
}

/// Evaluate a trigger predicate.
///
/// The `collector` records every input the predicate reads.
pub fn eval_pred(pred: &Predicate, ctx: &EvalContext<'_>, collector: &mut ProvenanceCollector) -> bool {
    let record = ctx.record;
    match pred {
        Predicate::Always => true,
        Predicate::Never => false,

        Predicate::ActionIs { action } => {
            collector.record("request.action");
            record.request.action == *action
        }

        Predicate::ActionMatches { pattern } => {
            collector.record("request.action");
            action_matches(pattern, &record.request.action)
        }

        Predicate::TargetIs { target } => {
            collector.record("request.target");
            record.request.target == *target
        }

        Predicate::RoleIs { role_type } => {
            collector.record("role.roleType");
            record.role.role_type == *role_type
        }

        Predicate::ParamPresent { key } => {
            collector.record(format!("request.parameters.{key}"));
            record.request.parameters.contains_key(key)
        }

        Predicate::ParamEquals { key, value } => {
            collector.record(format!("request.parameters.{key}"));
            record.request.parameters.get(key) == Some(value)
        }

        Predicate::Param { key, cmp, value } => {
            collector.record(format!("request.parameters.{key}"));
            record
                .request
                .parameters
                .get(key)
                .and_then(json_decimal)
                .is_some_and(|v| cmp.holds(v, *value))
        }

        Predicate::ConstraintPresent { key } => {
            collector.record(format!("request.constraints.{key}"));
            record.request.constraints.contains_key(key)
        }

        Predicate::Stake { cmp, value } => {
            collector.record("request.resourceStake");
            cmp.holds(record.request.resource_stake, *value)
        }

        Predicate::Required {
            resource,
            cmp,
            value,
        } => {
            collector.record(format!("resource.required.{resource}"));
            record
                .resource
                .required
                .get(*resource)
                .is_some_and(|v| cmp.holds(v, *value))
        }

        Predicate::ContextDepth { cmp, value } => {
            collector.record("reference.contextDepth");
            cmp.holds(
                Decimal::from(record.reference.context_depth),
                Decimal::from(*value),
            )
        }

        Predicate::PrecedentCount { cmp, value } => {
            collector.record("reference.precedents");
            cmp.holds(
                Decimal::from(record.reference.precedents.len() as u64),
                Decimal::from(*value),
            )
        }

        Predicate::Trust {
            dimension,
            cmp,
            value,
        } => {
            collector.record(format!("role.trustSnapshot.{dimension}"));
            cmp.holds(record.role.trust_snapshot.value(*dimension), *value)
        }

        Predicate::StatusIs { status } => {
            collector.record("result.status");
            ctx.outcome.is_some_and(|o| o.status == *status)
        }

        Predicate::Consumed {
            resource,
            cmp,
            value,
        } => {
            collector.record(format!("result.resourceConsumed.{resource}"));
            ctx.outcome
                .is_some_and(|o| cmp.holds(o.resource_consumed.amount(*resource), *value))
        }

        Predicate::ConsumptionRatio {
            resource,
            cmp,
            value,
        } => {
            collector.record(format!("result.resourceConsumed.{resource}"));
            collector.record(format!("resource.required.{resource}"));
            let Some(outcome) = ctx.outcome else {
                return false;
            };
            let required = record.resource.required.amount(*resource);
            if required.is_zero() {
                return false;
            }
            outcome
                .resource_consumed
                .amount(*resource)
                .checked_div(required)
                .is_some_and(|ratio| cmp.holds(ratio, *value))
        }

        Predicate::OutputPresent { key } => {
            collector.record(format!("result.output.{key}"));
            ctx.outcome
                .is_some_and(|o| o.output.data.get(key).is_some_and(|v| !v.is_null()))
        }

        Predicate::Output { key, cmp, value } => {
            collector.record(format!("result.output.{key}"));
            ctx.outcome
                .and_then(|o| o.output.data.get(key))
                .and_then(json_decimal)
                .is_some_and(|v| cmp.holds(v, *value))
        }

        Predicate::All { of } => {
            // Short-circuit on the first false operand.
            for p in of {
                if !eval_pred(p, ctx, collector) {
                    return false;
                }
            }
            true
        }

        Predicate::Any { of } => {
            for p in of {
                if eval_pred(p, ctx, collector) {
                    return true;
                }
            }
            false
        }

        Predicate::Not { predicate } => !eval_pred(predicate, ctx, collector),
    }
}
