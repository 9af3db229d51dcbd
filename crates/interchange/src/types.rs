//! Typed structs for the R7 wire format.
//!
//! Covers the Action Record (rules + role + request + reference +
//! resource), the execution Result, the Reputation Delta and the
//! trust/value tensor snapshots. Field names serialize in camelCase.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::hash::content_hash;

/// Neutral tensor value: every dimension starts here and decays back here.
pub const NEUTRAL: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

// ── Tensor dimensions ───────────────────────────────────────────────

/// Which tensor a dimension belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorKind {
    /// Trust tensor (T3): capability and character.
    Trust,
    /// Value tensor (V3): quality of output.
    Value,
}

/// A single trust (T3) or value (V3) dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Talent,
    Training,
    Temperament,
    Valuation,
    Veracity,
    Validity,
}

impl Dimension {
    pub const T3: [Dimension; 3] = [Dimension::Talent, Dimension::Training, Dimension::Temperament];
    pub const V3: [Dimension; 3] = [Dimension::Valuation, Dimension::Veracity, Dimension::Validity];
    pub const ALL: [Dimension; 6] = [
        Dimension::Talent,
        Dimension::Training,
        Dimension::Temperament,
        Dimension::Valuation,
        Dimension::Veracity,
        Dimension::Validity,
    ];

    pub fn tensor(self) -> TensorKind {
        match self {
            Dimension::Talent | Dimension::Training | Dimension::Temperament => TensorKind::Trust,
            Dimension::Valuation | Dimension::Veracity | Dimension::Validity => TensorKind::Value,
        }
    }

    /// Upper bound of the dimension's domain. `valuation` is a value-like
    /// quantity and has no upper bound; every other dimension lives in [0, 1].
    pub fn upper_bound(self) -> Option<Decimal> {
        match self {
            Dimension::Valuation => None,
            _ => Some(Decimal::ONE),
        }
    }

    /// Clamp a value into this dimension's domain.
    pub fn clamp(self, value: Decimal) -> Decimal {
        let floored = value.max(Decimal::ZERO);
        match self.upper_bound() {
            Some(upper) => floored.min(upper),
            None => floored,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Talent => "talent",
            Dimension::Training => "training",
            Dimension::Temperament => "temperament",
            Dimension::Valuation => "valuation",
            Dimension::Veracity => "veracity",
            Dimension::Validity => "validity",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time values of an (entity, role) pair's trust and value tensors.
///
/// Missing dimensions read as [`NEUTRAL`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TensorSnapshot {
    #[serde(default)]
    pub t3: BTreeMap<Dimension, Decimal>,
    #[serde(default)]
    pub v3: BTreeMap<Dimension, Decimal>,
}

impl TensorSnapshot {
    /// A snapshot with every dimension at the neutral baseline.
    pub fn neutral() -> Self {
        let mut snap = TensorSnapshot::default();
        for dim in Dimension::ALL {
            snap.set(dim, NEUTRAL);
        }
        snap
    }

    pub fn value(&self, dim: Dimension) -> Decimal {
        let map = match dim.tensor() {
            TensorKind::Trust => &self.t3,
            TensorKind::Value => &self.v3,
        };
        map.get(&dim).copied().unwrap_or(NEUTRAL)
    }

    pub fn set(&mut self, dim: Dimension, value: Decimal) {
        let map = match dim.tensor() {
            TensorKind::Trust => &mut self.t3,
            TensorKind::Value => &mut self.v3,
        };
        map.insert(dim, value);
    }

    /// Weighted mean of one tensor's dimensions, rounded to 8 places.
    /// An empty weight map weighs the three dimensions equally; a dimension
    /// missing from a non-empty map weighs zero, and a non-positive total
    /// reads as zero.
    pub fn composite(&self, kind: TensorKind, weights: &BTreeMap<Dimension, Decimal>) -> Decimal {
        let dims = match kind {
            TensorKind::Trust => Dimension::T3,
            TensorKind::Value => Dimension::V3,
        };
        let weight = |dim: &Dimension| {
            if weights.is_empty() {
                Decimal::ONE
            } else {
                weights.get(dim).copied().unwrap_or(Decimal::ZERO).max(Decimal::ZERO)
            }
        };
        let total: Decimal = dims.iter().map(weight).sum();
        if total <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let sum = dims
            .iter()
            .map(|d| self.value(*d).saturating_mul(weight(d)))
            .fold(Decimal::ZERO, Decimal::saturating_add);
        sum.checked_div(total).unwrap_or(Decimal::ZERO).round_dp(8)
    }

    /// Equally weighted mean of the trust dimensions.
    pub fn trust_score(&self) -> Decimal {
        self.composite(TensorKind::Trust, &BTreeMap::new())
    }

    /// Equally weighted mean of the value dimensions.
    pub fn value_score(&self) -> Decimal {
        self.composite(TensorKind::Value, &BTreeMap::new())
    }
}

// ── Resources ───────────────────────────────────────────────────────

/// Kinds of metered resource. `Work` is the work-token unit that escrow
/// and settlement are denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Work,
    Compute,
    Bandwidth,
    Storage,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Work,
        ResourceKind::Compute,
        ResourceKind::Bandwidth,
        ResourceKind::Storage,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Work => "work",
            ResourceKind::Compute => "compute",
            ResourceKind::Bandwidth => "bandwidth",
            ResourceKind::Storage => "storage",
        };
        f.write_str(s)
    }
}

/// A bundle of resource quantities: a work-token amount plus optional
/// compute / bandwidth / storage quantities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAmounts {
    #[serde(default)]
    pub work: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Decimal>,
}

impl ResourceAmounts {
    pub fn work(amount: Decimal) -> Self {
        ResourceAmounts {
            work: amount,
            ..Default::default()
        }
    }

    /// Quantity declared for `kind`, or `None` when the kind is not declared.
    pub fn get(&self, kind: ResourceKind) -> Option<Decimal> {
        match kind {
            ResourceKind::Work => Some(self.work),
            ResourceKind::Compute => self.compute,
            ResourceKind::Bandwidth => self.bandwidth,
            ResourceKind::Storage => self.storage,
        }
    }

    /// Quantity for `kind`, treating undeclared kinds as zero.
    pub fn amount(&self, kind: ResourceKind) -> Decimal {
        self.get(kind).unwrap_or(Decimal::ZERO)
    }

    pub fn set(&mut self, kind: ResourceKind, amount: Decimal) {
        match kind {
            ResourceKind::Work => self.work = amount,
            ResourceKind::Compute => self.compute = Some(amount),
            ResourceKind::Bandwidth => self.bandwidth = Some(amount),
            ResourceKind::Storage => self.storage = Some(amount),
        }
    }

    /// Iterate over the declared (kind, quantity) pairs.
    pub fn declared(&self) -> impl Iterator<Item = (ResourceKind, Decimal)> + '_ {
        ResourceKind::ALL
            .into_iter()
            .filter_map(|k| self.get(k).map(|v| (k, v)))
    }
}

// ── Action Record ───────────────────────────────────────────────────

/// Role context: binds an actor to a role plus the actor's tensor snapshot
/// in that role at binding time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleContext {
    pub actor: String,
    pub role_type: String,
    pub role_ref: String,
    #[serde(default)]
    pub trust_snapshot: TensorSnapshot,
}

/// The specific action intent and its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub action: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub constraints: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub resource_stake: Decimal,
    pub nonce: String,
}

/// Historical context cited by the request. Every cited hash or grant must
/// resolve and be unrevoked for the action to be admitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default)]
    pub precedents: Vec<String>,
    #[serde(default)]
    pub context_depth: u32,
    #[serde(default)]
    pub prior_attestations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grants: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub witnesses: Vec<String>,
}

/// Declared resource requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDeclaration {
    pub required: ResourceAmounts,
    pub pricing_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_id: Option<String>,
}

/// An immutable description of a proposed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub rules_hash: String,
    pub role: RoleContext,
    pub request: Request,
    #[serde(default)]
    pub reference: Reference,
    pub resource: ResourceDeclaration,
}

impl ActionRecord {
    /// Content hash identifying this record.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        content_hash(self)
    }
}

// ── Result ──────────────────────────────────────────────────────────

/// Outcome status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
    Error,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failure => "failure",
            ResultStatus::Error => "error",
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultStatus::Success
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque output payload plus its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub data: serde_json::Value,
    pub hash: String,
}

/// Machine-readable error attached to a non-success result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultError {
    pub code: String,
    pub message: String,
}

/// Pointer to the ledger record that proves a result was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerProof {
    pub tx_hash: String,
    pub height: u64,
    pub root: String,
    pub inclusion_proof: Vec<String>,
}

/// Outcome of execution. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_ref: String,
    pub status: ResultStatus,
    pub output: Output,
    pub resource_consumed: ResourceAmounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResultError>,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_proof: Option<LedgerProof>,
}

// ── Reputation Delta ────────────────────────────────────────────────

/// A single dimension's change, with the value it moved from and to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionChange {
    pub change: Decimal,
    pub from: Decimal,
    pub to: Decimal,
}

/// A factor contributing to a reputation change, with its normalized weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub factor: String,
    pub weight: Decimal,
    pub rule: String,
}

/// Priority tier a witness was selected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WitnessTier {
    /// Rule-designated authority or oracle.
    Authority,
    /// Validator registered for the subject's role.
    RoleValidator,
    /// Relationship-graph peer within the hop bound.
    Peer,
}

/// A witness's signed statement over a delta's content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessAttestation {
    pub id: String,
    /// Base64-encoded Ed25519 signature over [`crate::attestation_message`].
    pub signature: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub tier: WitnessTier,
}

/// Explicit, role-scoped record of trust/value change caused by one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationDelta {
    pub subject: String,
    pub role: String,
    pub action_ref: String,
    pub rule_triggered: Vec<String>,
    pub reason: String,
    pub t3_delta: BTreeMap<Dimension, DimensionChange>,
    pub v3_delta: BTreeMap<Dimension, DimensionChange>,
    pub contributing_factors: Vec<ContributingFactor>,
    #[serde(default)]
    pub witnesses: Vec<WitnessAttestation>,
    pub net_trust_change: Decimal,
    pub net_value_change: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computation_errors: Vec<String>,
}

impl ReputationDelta {
    /// Hash of the delta's content, excluding witness attestations.
    ///
    /// Witnesses sign this hash, so it must not depend on the signatures
    /// being collected.
    pub fn content_hash(&self) -> Result<String, serde_json::Error> {
        let mut unsigned = self.clone();
        unsigned.witnesses.clear();
        content_hash(&unsigned)
    }

    /// True when no dimension changes.
    pub fn is_zero(&self) -> bool {
        self.t3_delta.values().all(|c| c.change.is_zero())
            && self.v3_delta.values().all(|c| c.change.is_zero())
    }

    /// Change for a dimension, zero when the dimension is untouched.
    pub fn change(&self, dim: Dimension) -> Decimal {
        let map = match dim.tensor() {
            TensorKind::Trust => &self.t3_delta,
            TensorKind::Value => &self.v3_delta,
        };
        map.get(&dim).map(|c| c.change).unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn neutral_is_one_half() {
        assert_eq!(NEUTRAL, dec("0.5"));
    }

    #[test]
    fn clamp_respects_bounds() {
        assert_eq!(Dimension::Talent.clamp(dec("1.7")), Decimal::ONE);
        assert_eq!(Dimension::Talent.clamp(dec("-0.2")), Decimal::ZERO);
        assert_eq!(Dimension::Valuation.clamp(dec("3.5")), dec("3.5"));
        assert_eq!(Dimension::Valuation.clamp(dec("-1")), Decimal::ZERO);
    }

    #[test]
    fn snapshot_defaults_to_neutral() {
        let snap = TensorSnapshot::default();
        assert_eq!(snap.value(Dimension::Veracity), NEUTRAL);
        let mut snap = snap;
        snap.set(Dimension::Veracity, dec("0.9"));
        assert_eq!(snap.value(Dimension::Veracity), dec("0.9"));
        assert!(snap.t3.is_empty());
    }

    #[test]
    fn composite_scores_are_weighted_means() {
        let mut snap = TensorSnapshot::neutral();
        snap.set(Dimension::Talent, dec("0.8"));
        snap.set(Dimension::Training, dec("0.9"));
        snap.set(Dimension::Temperament, dec("1"));
        assert_eq!(snap.trust_score(), dec("0.9"));
        assert_eq!(snap.value_score(), NEUTRAL);

        let weights: BTreeMap<Dimension, Decimal> = [
            (Dimension::Talent, dec("0.3")),
            (Dimension::Training, dec("0.4")),
            (Dimension::Temperament, dec("0.3")),
        ]
        .into_iter()
        .collect();
        // 0.24 + 0.36 + 0.3
        assert_eq!(snap.composite(TensorKind::Trust, &weights), dec("0.9"));

        let talent_only: BTreeMap<Dimension, Decimal> =
            [(Dimension::Talent, dec("2"))].into_iter().collect();
        assert_eq!(snap.composite(TensorKind::Trust, &talent_only), dec("0.8"));
        // Weights for the other tensor leave nothing to average.
        assert_eq!(snap.composite(TensorKind::Value, &talent_only), Decimal::ZERO);
    }

    #[test]
    fn composite_rounds_repeating_means() {
        let mut snap = TensorSnapshot::neutral();
        snap.set(Dimension::Veracity, dec("0.6"));
        assert_eq!(snap.value_score(), dec("0.53333333"));
    }

    #[test]
    fn action_record_parses_wire_shape() {
        let json = serde_json::json!({
            "rulesHash": "abc",
            "role": {
                "actor": "lct:alice",
                "roleType": "analyst",
                "roleRef": "role:analyst@acme",
                "trustSnapshot": { "t3": { "training": "0.6" } }
            },
            "request": {
                "action": "analyze",
                "target": "dataset:1",
                "parameters": { "rows": 10 },
                "resourceStake": "100",
                "nonce": "n-1"
            },
            "reference": { "precedents": [], "contextDepth": 2, "priorAttestations": [] },
            "resource": {
                "required": { "work": "100", "compute": "5" },
                "pricingRef": "pricing:default"
            }
        });
        let record: ActionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.role.trust_snapshot.value(Dimension::Training), dec("0.6"));
        assert_eq!(record.request.resource_stake, dec("100"));
        assert_eq!(record.resource.required.get(ResourceKind::Compute), Some(dec("5")));
        assert_eq!(record.resource.required.get(ResourceKind::Storage), None);
        assert_eq!(record.reference.context_depth, 2);
    }

    #[test]
    fn delta_hash_ignores_witnesses() {
        let mut delta = ReputationDelta {
            subject: "lct:alice".into(),
            role: "analyst".into(),
            action_ref: "h".into(),
            rule_triggered: vec![],
            reason: String::new(),
            t3_delta: BTreeMap::new(),
            v3_delta: BTreeMap::new(),
            contributing_factors: vec![],
            witnesses: vec![],
            net_trust_change: Decimal::ZERO,
            net_value_change: Decimal::ZERO,
            timestamp: OffsetDateTime::UNIX_EPOCH,
            computation_errors: vec![],
        };
        let before = delta.content_hash().unwrap();
        delta.witnesses.push(WitnessAttestation {
            id: "w".into(),
            signature: "sig".into(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
            tier: WitnessTier::Peer,
        });
        assert_eq!(before, delta.content_hash().unwrap());
        assert!(delta.is_zero());
    }

    #[test]
    fn dimension_keys_serialize_as_names() {
        let mut snap = TensorSnapshot::default();
        snap.set(Dimension::Temperament, dec("0.7"));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["t3"]["temperament"], "0.7");
    }
}
