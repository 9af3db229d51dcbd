//! Rule Set wire types.
//!
//! A rule set is a versioned, hash-identified, ordered collection of named
//! rules. Each rule pairs a trigger [`Predicate`] with an optional
//! reputation-impact template. Predicates are a closed variant set; the
//! engine evaluates them by pattern matching, never by reflection.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::hash::content_hash;
use crate::types::{Dimension, ResourceKind, ResultStatus};

/// A versioned, immutable collection of rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: String,
    pub version: u32,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// The hash Action Records use to reference this rule set.
    pub fn hash(&self) -> Result<String, serde_json::Error> {
        content_hash(self)
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Ready-made reputation rules: a small reward for success, a larger
    /// penalty for failure, and bonuses for efficient and well-staked work.
    /// The stake reward scales with min(stake / 100, 2).
    pub fn standard() -> Self {
        let success = Predicate::StatusIs {
            status: ResultStatus::Success,
        };
        RuleSet {
            id: "r7-standard".to_string(),
            version: 1,
            rules: vec![
                reputation_rule(
                    "default_success",
                    success.clone(),
                    vec![factor("completion", FactorSource::Constant { weight: Decimal::ONE })],
                    vec![
                        (Dimension::Training, flat(Decimal::new(1, 2))),
                        (Dimension::Temperament, flat(Decimal::new(5, 3))),
                        (Dimension::Veracity, flat(Decimal::new(1, 2))),
                        (Dimension::Validity, flat(Decimal::new(5, 3))),
                    ],
                ),
                reputation_rule(
                    "default_failure",
                    Predicate::Any {
                        of: vec![
                            Predicate::StatusIs {
                                status: ResultStatus::Failure,
                            },
                            Predicate::StatusIs {
                                status: ResultStatus::Error,
                            },
                        ],
                    },
                    Vec::new(),
                    vec![
                        (Dimension::Temperament, flat(Decimal::new(-2, 2))),
                        (Dimension::Validity, flat(Decimal::new(-1, 2))),
                    ],
                ),
                reputation_rule(
                    "efficiency_bonus",
                    Predicate::All {
                        of: vec![
                            success.clone(),
                            Predicate::ConsumptionRatio {
                                resource: ResourceKind::Work,
                                cmp: Comparison::Le,
                                value: Decimal::new(8, 1),
                            },
                        ],
                    },
                    vec![factor(
                        "efficiency",
                        FactorSource::ResourceEfficiency {
                            resource: ResourceKind::Work,
                        },
                    )],
                    vec![
                        (Dimension::Talent, flat(Decimal::new(15, 3))),
                        (Dimension::Valuation, flat(Decimal::new(1, 2))),
                    ],
                ),
                reputation_rule(
                    "stake_reward",
                    Predicate::All {
                        of: vec![
                            success,
                            Predicate::Stake {
                                cmp: Comparison::Gt,
                                value: Decimal::ZERO,
                            },
                        ],
                    },
                    vec![factor(
                        "stake",
                        FactorSource::StakeRatio {
                            scale: Decimal::from(200),
                        },
                    )],
                    vec![
                        (Dimension::Talent, scaled(Decimal::new(1, 2), "stake", Decimal::TWO)),
                        (Dimension::Veracity, scaled(Decimal::new(2, 2), "stake", Decimal::TWO)),
                    ],
                ),
            ],
        }
    }
}

fn reputation_rule(
    id: &str,
    trigger: Predicate,
    factors: Vec<FactorTemplate>,
    dimensions: Vec<(Dimension, DimensionImpact)>,
) -> Rule {
    Rule {
        id: id.to_string(),
        kind: RuleKind::Reputation,
        trigger,
        impact: Some(ReputationImpact {
            factors,
            dimensions: dimensions.into_iter().collect(),
            witnesses_required: default_witnesses_required(),
            designated_witnesses: Vec::new(),
        }),
        description: None,
    }
}

fn factor(name: &str, source: FactorSource) -> FactorTemplate {
    FactorTemplate {
        name: name.to_string(),
        source,
    }
}

fn flat(base_delta: Decimal) -> DimensionImpact {
    DimensionImpact {
        base_delta,
        modifiers: Vec::new(),
    }
}

/// Base delta multiplied by `cap` times the factor's raw weight, so a
/// factor at full weight applies the whole cap.
fn scaled(base_delta: Decimal, factor: &str, cap: Decimal) -> DimensionImpact {
    DimensionImpact {
        base_delta,
        modifiers: vec![Modifier {
            factor: factor.to_string(),
            multiplier: cap,
            min_weight: None,
            proportional: true,
        }],
    }
}

/// What a rule does when evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Admission: the request is rejected when the trigger holds.
    Prohibit,
    /// Admission: the request is rejected unless the trigger holds.
    Require,
    /// Post-execution: a successful result is invalid unless the trigger holds.
    Output,
    /// Post-execution: contributes its impact template when the trigger holds.
    Reputation,
}

impl RuleKind {
    pub fn is_admission(self) -> bool {
        matches!(self, RuleKind::Prohibit | RuleKind::Require)
    }
}

/// A single named rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub kind: RuleKind,
    pub trigger: Predicate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ReputationImpact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Comparison operator used by numeric predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = ">")]
    Gt,
}

impl Comparison {
    pub fn holds(self, left: Decimal, right: Decimal) -> bool {
        match self {
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Eq => left == right,
            Comparison::Ne => left != right,
            Comparison::Ge => left >= right,
            Comparison::Gt => left > right,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Ge => ">=",
            Comparison::Gt => ">",
        };
        f.write_str(s)
    }
}

/// Trigger predicate over (request, execution outcome, declared resources,
/// reference context).
///
/// Outcome predicates (`status_is`, `consumed`, `consumption_ratio`,
/// `output_*`) are false when no outcome exists yet, so every predicate is
/// total in both evaluation phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Always,
    Never,
    ActionIs {
        action: String,
    },
    /// Glob match on the action name; only a trailing `*` is special.
    ActionMatches {
        pattern: String,
    },
    TargetIs {
        target: String,
    },
    RoleIs {
        role_type: String,
    },
    ParamPresent {
        key: String,
    },
    ParamEquals {
        key: String,
        value: serde_json::Value,
    },
    Param {
        key: String,
        cmp: Comparison,
        value: Decimal,
    },
    ConstraintPresent {
        key: String,
    },
    Stake {
        cmp: Comparison,
        value: Decimal,
    },
    Required {
        resource: ResourceKind,
        cmp: Comparison,
        value: Decimal,
    },
    ContextDepth {
        cmp: Comparison,
        value: u32,
    },
    PrecedentCount {
        cmp: Comparison,
        value: u32,
    },
    Trust {
        dimension: Dimension,
        cmp: Comparison,
        value: Decimal,
    },
    StatusIs {
        status: ResultStatus,
    },
    Consumed {
        resource: ResourceKind,
        cmp: Comparison,
        value: Decimal,
    },
    /// consumed / required for one resource kind.
    ConsumptionRatio {
        resource: ResourceKind,
        cmp: Comparison,
        value: Decimal,
    },
    OutputPresent {
        key: String,
    },
    Output {
        key: String,
        cmp: Comparison,
        value: Decimal,
    },
    All {
        of: Vec<Predicate>,
    },
    Any {
        of: Vec<Predicate>,
    },
    Not {
        predicate: Box<Predicate>,
    },
}

// ── Reputation impact templates ─────────────────────────────────────

fn default_witnesses_required() -> u32 {
    1
}

/// How a triggered reputation rule changes the subject's tensors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationImpact {
    #[serde(default)]
    pub factors: Vec<FactorTemplate>,
    #[serde(default)]
    pub dimensions: BTreeMap<Dimension, DimensionImpact>,
    #[serde(default = "default_witnesses_required")]
    pub witnesses_required: u32,
    /// Authorities or oracles the rule designates as first-tier witnesses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub designated_witnesses: Vec<String>,
}

/// A named contributing factor and where its weight comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorTemplate {
    pub name: String,
    pub source: FactorSource,
}

/// Source of a contributing factor's raw weight. Every source yields a
/// weight in [0, 1].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactorSource {
    /// Fixed weight.
    Constant { weight: Decimal },
    /// 1 when the predicate holds, 0 otherwise.
    Flag { when: Predicate },
    /// Numeric request parameter, clamped into [0, 1].
    Param { key: String },
    /// Numeric field of the output payload, clamped into [0, 1].
    OutputField { key: String },
    /// 1 − consumed/required for a resource kind.
    ResourceEfficiency { resource: ResourceKind },
    /// min(stake / scale, 1).
    StakeRatio { scale: Decimal },
    /// min(context depth / max, 1).
    ContextDepth { max: u32 },
}

/// Base change for one dimension plus its conditional multipliers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionImpact {
    pub base_delta: Decimal,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

/// Conditional multiplier: applies when the named factor's normalized weight
/// is positive (or at least `min_weight`, when set).
///
/// A `proportional` modifier always applies and multiplies by
/// `multiplier × raw weight` instead, so the multiplier acts as a cap
/// reached at full weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    pub factor: String,
    pub multiplier: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_weight: Option<Decimal>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub proportional: bool,
}
