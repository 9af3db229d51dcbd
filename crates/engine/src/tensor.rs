//! Tensor Aggregator.
//!
//! Owns the per-(entity, role) trust and value tensors. A dimension's
//! value is never stored directly; it is recomputed from the pair's
//! history of applied changes:
//!
//! ```text
//! value(t) = clamp(0.5 + Σ change_i · 2^(−age_i / half_life))
//! ```
//!
//! over changes younger than the horizon, so an idle pair drifts back to
//! the neutral baseline. Updates for one pair are applied strictly in the
//! order their tickets were issued; different pairs never wait on each
//! other.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Notify;

use r7_interchange::{Dimension, ResultStatus, TensorSnapshot, NEUTRAL};

use crate::clock::Clock;
use crate::config::TensorConfig;
use crate::error::EngineError;
use crate::witness::FinalizedDelta;

const SECONDS_PER_DAY: i64 = 86_400;

/// One applied change, as kept in a pair's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TensorEntry {
    pub sequence: u64,
    pub action_ref: String,
    pub delta_hash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub applied_at: OffsetDateTime,
    pub confidence: Decimal,
    /// Effective change per dimension, at full weight when applied.
    pub changes: BTreeMap<Dimension, Decimal>,
}

/// Per-pair action counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCounters {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
}

/// A pair's tensors right after an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedTensor {
    pub entity: String,
    pub role: String,
    pub sequence: u64,
    pub snapshot: TensorSnapshot,
    pub counters: PairCounters,
}

/// Place in a pair's apply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyTicket {
    entity: String,
    role: String,
    sequence: u64,
}

impl ApplyTicket {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

#[derive(Debug, Default)]
struct PairState {
    history: Vec<TensorEntry>,
    counters: PairCounters,
    /// Computed outcomes per action type, applied or not.
    action_counts: BTreeMap<String, u64>,
    next_ticket: u64,
    next_apply: u64,
    /// Tickets given up before their turn came.
    forfeited: BTreeSet<u64>,
}

impl PairState {
    fn advance(&mut self) {
        self.next_apply += 1;
        while self.forfeited.remove(&self.next_apply) {
            self.next_apply += 1;
        }
    }
}

pub struct TensorAggregator {
    pairs: Mutex<HashMap<(String, String), PairState>>,
    turn: Notify,
    config: TensorConfig,
    clock: Arc<dyn Clock>,
}

impl TensorAggregator {
    pub fn new(config: TensorConfig, clock: Arc<dyn Clock>) -> Self {
        TensorAggregator {
            pairs: Mutex::new(HashMap::new()),
            turn: Notify::new(),
            config,
            clock,
        }
    }

    fn pairs(&self) -> MutexGuard<'_, HashMap<(String, String), PairState>> {
        self.pairs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start tracking a pair at the neutral baseline. No-op when the pair
    /// already exists.
    pub fn ensure_pair(&self, entity: &str, role: &str) {
        self.pairs()
            .entry((entity.to_string(), role.to_string()))
            .or_default();
    }

    /// Current decayed values of a pair. Unknown pairs read as neutral.
    pub fn snapshot(&self, entity: &str, role: &str) -> TensorSnapshot {
        let now = self.clock.now();
        let pairs = self.pairs();
        match pairs.get(&(entity.to_string(), role.to_string())) {
            Some(state) => self.values_at(&state.history, now),
            None => TensorSnapshot::neutral(),
        }
    }

    pub fn history(&self, entity: &str, role: &str) -> Vec<TensorEntry> {
        self.pairs()
            .get(&(entity.to_string(), role.to_string()))
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    pub fn counters(&self, entity: &str, role: &str) -> PairCounters {
        self.pairs()
            .get(&(entity.to_string(), role.to_string()))
            .map(|s| s.counters)
            .unwrap_or_default()
    }

    /// Count one computed outcome of `action` for a pair and return how many
    /// came before it.
    pub fn count_action(&self, entity: &str, role: &str, action: &str) -> u64 {
        let mut pairs = self.pairs();
        let state = pairs
            .entry((entity.to_string(), role.to_string()))
            .or_default();
        let count = state.action_counts.entry(action.to_string()).or_insert(0);
        let prior = *count;
        *count += 1;
        prior
    }

    /// Roles an entity has tensors in, sorted.
    pub fn roles_for_entity(&self, entity: &str) -> Vec<String> {
        let mut roles: Vec<String> = self
            .pairs()
            .keys()
            .filter(|(e, _)| e == entity)
            .map(|(_, r)| r.clone())
            .collect();
        roles.sort();
        roles
    }

    /// Reserve the next slot in a pair's apply order.
    pub fn ticket(&self, entity: &str, role: &str) -> ApplyTicket {
        let mut pairs = self.pairs();
        let state = pairs
            .entry((entity.to_string(), role.to_string()))
            .or_default();
        let sequence = state.next_ticket;
        state.next_ticket += 1;
        ApplyTicket {
            entity: entity.to_string(),
            role: role.to_string(),
            sequence,
        }
    }

    /// Give up a ticket that will never be applied, so later tickets for
    /// the pair are not blocked behind it.
    pub fn forfeit(&self, ticket: ApplyTicket) {
        {
            let mut pairs = self.pairs();
            let Some(state) = pairs.get_mut(&(ticket.entity, ticket.role)) else {
                return;
            };
            if ticket.sequence == state.next_apply {
                state.advance();
            } else if ticket.sequence > state.next_apply {
                state.forfeited.insert(ticket.sequence);
            }
        }
        self.turn.notify_waiters();
    }

    /// Apply a finalized delta, taking the next ticket for its pair.
    pub async fn apply(&self, finalized: FinalizedDelta) -> Result<UpdatedTensor, EngineError> {
        let delta = finalized.delta();
        let ticket = self.ticket(&delta.subject, &delta.role);
        self.apply_in_order(ticket, finalized).await
    }

    /// Apply a finalized delta once every earlier ticket for the pair has
    /// been applied or forfeited.
    ///
    /// A delta that fails the quorum gate is refused, and its ticket is
    /// still consumed.
    pub async fn apply_in_order(
        &self,
        ticket: ApplyTicket,
        finalized: FinalizedDelta,
    ) -> Result<UpdatedTensor, EngineError> {
        let key = (ticket.entity.clone(), ticket.role.clone());
        loop {
            let notified = self.turn.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let ready = self
                .pairs()
                .get(&key)
                .map_or(true, |s| s.next_apply >= ticket.sequence);
            if ready {
                break;
            }
            notified.await;
        }

        let outcome = self.apply_now(&key, ticket.sequence, &finalized);
        self.turn.notify_waiters();
        outcome
    }

    fn apply_now(
        &self,
        key: &(String, String),
        sequence: u64,
        finalized: &FinalizedDelta,
    ) -> Result<UpdatedTensor, EngineError> {
        let now = self.clock.now();
        let delta = finalized.delta();
        let mut pairs = self.pairs();
        let state = pairs.entry(key.clone()).or_default();
        if state.next_apply == sequence {
            state.advance();
        }

        if delta.subject != key.0 || delta.role != key.1 {
            return Err(EngineError::InvalidState {
                record_hash: delta.action_ref.clone(),
                actual: format!("delta for ({}, {})", delta.subject, delta.role),
                expected: format!("delta for ({}, {})", key.0, key.1),
            });
        }
        if let Err(reason) = finalized.check_gate() {
            tracing::warn!(action = %delta.action_ref, "delta refused at quorum gate: {reason}");
            return Err(EngineError::InvalidState {
                record_hash: delta.action_ref.clone(),
                actual: reason,
                expected: "witness quorum".into(),
            });
        }

        let horizon = self.config.horizon_days;
        state
            .history
            .retain(|e| age_days(e.applied_at, now) <= horizon);

        let confidence = finalized.confidence();
        let mut changes = BTreeMap::new();
        for dim in Dimension::ALL {
            let change = delta.change(dim);
            if change.is_zero() {
                continue;
            }
            let raw = self.raw_value(&state.history, dim, now);
            let current = dim.clamp(raw);
            let scaled = change.checked_mul(confidence).unwrap_or(change);
            let target = dim.clamp(current.saturating_add(scaled));
            // Stored so that the undecayed sum lands exactly on `target`.
            changes.insert(dim, target - raw);
        }

        state.history.push(TensorEntry {
            sequence,
            action_ref: delta.action_ref.clone(),
            delta_hash: finalized.delta_hash().to_string(),
            applied_at: now,
            confidence,
            changes,
        });
        state.counters.total += 1;
        match finalized.outcome() {
            ResultStatus::Success => state.counters.success += 1,
            ResultStatus::Failure | ResultStatus::Error => state.counters.failure += 1,
        }

        let snapshot = self.values_at(&state.history, now);
        tracing::debug!(
            entity = %key.0,
            role = %key.1,
            sequence,
            "tensor updated"
        );
        Ok(UpdatedTensor {
            entity: key.0.clone(),
            role: key.1.clone(),
            sequence,
            snapshot,
            counters: state.counters,
        })
    }

    fn raw_value(&self, history: &[TensorEntry], dim: Dimension, now: OffsetDateTime) -> Decimal {
        history
            .iter()
            .filter_map(|e| e.changes.get(&dim).map(|c| (e.applied_at, *c)))
            .filter(|(at, _)| age_days(*at, now) <= self.config.horizon_days)
            .fold(NEUTRAL, |acc, (at, change)| {
                let w = decay_weight(age_days(at, now), self.config.half_life_days);
                acc.saturating_add(change.checked_mul(w).unwrap_or(Decimal::ZERO))
            })
    }

    fn values_at(&self, history: &[TensorEntry], now: OffsetDateTime) -> TensorSnapshot {
        let mut snap = TensorSnapshot::default();
        for dim in Dimension::ALL {
            snap.set(dim, dim.clamp(self.raw_value(history, dim, now)));
        }
        snap
    }
}

/// Age in (fractional) days. Timestamps in the future count as age zero.
fn age_days(at: OffsetDateTime, now: OffsetDateTime) -> Decimal {
    let secs = (now - at).whole_seconds().max(0);
    Decimal::from(secs) / Decimal::from(SECONDS_PER_DAY)
}

/// 2^(−age / half_life). Underflow reads as zero weight.
pub fn decay_weight(age_days: Decimal, half_life_days: Decimal) -> Decimal {
    if age_days <= Decimal::ZERO {
        return Decimal::ONE;
    }
    if half_life_days <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let Some(exponent) = age_days.checked_div(half_life_days) else {
        return Decimal::ZERO;
    };
    match Decimal::TWO.checked_powd(exponent) {
        Some(growth) if growth > Decimal::ZERO => Decimal::ONE.checked_div(growth).unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testutil::dec;
    use crate::witness::WitnessStatus;
    use r7_interchange::{DimensionChange, ReputationDelta};
    use time::macros::datetime;

    fn delta(subject: &str, role: &str, action: &str, changes: &[(Dimension, &str)]) -> ReputationDelta {
        let mut t3 = BTreeMap::new();
        let mut v3 = BTreeMap::new();
        for (dim, change) in changes {
            let entry = DimensionChange {
                change: dec(change),
                from: NEUTRAL,
                to: NEUTRAL + dec(change),
            };
            match dim.tensor() {
                r7_interchange::TensorKind::Trust => t3.insert(*dim, entry),
                r7_interchange::TensorKind::Value => v3.insert(*dim, entry),
            };
        }
        ReputationDelta {
            subject: subject.into(),
            role: role.into(),
            action_ref: action.into(),
            rule_triggered: vec![],
            reason: String::new(),
            t3_delta: t3,
            v3_delta: v3,
            contributing_factors: vec![],
            witnesses: vec![],
            net_trust_change: Decimal::ZERO,
            net_value_change: Decimal::ZERO,
            timestamp: datetime!(2026-01-01 00:00 UTC),
            computation_errors: vec![],
        }
    }

    fn finalized(d: ReputationDelta) -> FinalizedDelta {
        let hash = d.content_hash().unwrap();
        FinalizedDelta::new(d, hash, ResultStatus::Success, WitnessStatus::QuorumMet, 0)
    }

    fn setup() -> (Arc<ManualClock>, TensorAggregator) {
        let clock = Arc::new(ManualClock::new(datetime!(2026-01-01 00:00 UTC)));
        let agg = TensorAggregator::new(TensorConfig::default(), clock.clone());
        (clock, agg)
    }

    #[test]
    fn decay_weight_halves_per_half_life() {
        assert_eq!(decay_weight(Decimal::ZERO, dec("30")), Decimal::ONE);
        assert_eq!(decay_weight(dec("30"), dec("30")), dec("0.5"));
        assert_eq!(decay_weight(dec("90"), dec("30")), dec("0.125"));
    }

    #[tokio::test]
    async fn idle_pair_decays_toward_neutral() {
        let (clock, agg) = setup();
        agg.apply(finalized(delta("e", "r", "a1", &[(Dimension::Talent, "0.3")])))
            .await
            .unwrap();
        assert_eq!(agg.snapshot("e", "r").value(Dimension::Talent), dec("0.8"));

        clock.advance(time::Duration::days(90));
        // 87.5% of the way back to 0.5.
        assert_eq!(agg.snapshot("e", "r").value(Dimension::Talent), dec("0.5375"));

        clock.advance(time::Duration::days(300));
        assert_eq!(agg.snapshot("e", "r").value(Dimension::Talent), NEUTRAL);
    }

    #[tokio::test]
    async fn untouched_dimensions_and_roles_are_unchanged() {
        let (_, agg) = setup();
        agg.ensure_pair("e", "role:b");
        agg.apply(finalized(delta("e", "role:a", "a1", &[(Dimension::Veracity, "0.1")])))
            .await
            .unwrap();
        let a = agg.snapshot("e", "role:a");
        assert_eq!(a.value(Dimension::Veracity), dec("0.6"));
        assert_eq!(a.value(Dimension::Talent), NEUTRAL);
        assert_eq!(agg.snapshot("e", "role:b"), TensorSnapshot::neutral());
        assert_eq!(agg.roles_for_entity("e"), vec!["role:a", "role:b"]);
    }

    #[tokio::test]
    async fn values_stay_in_bounds() {
        let (_, agg) = setup();
        for i in 0..5 {
            agg.apply(finalized(delta(
                "e",
                "r",
                &format!("a{i}"),
                &[(Dimension::Training, "0.4"), (Dimension::Validity, "-0.4")],
            )))
            .await
            .unwrap();
        }
        let snap = agg.snapshot("e", "r");
        assert_eq!(snap.value(Dimension::Training), Decimal::ONE);
        assert_eq!(snap.value(Dimension::Validity), Decimal::ZERO);

        // A later decrease moves off the bound immediately.
        agg.apply(finalized(delta("e", "r", "down", &[(Dimension::Training, "-0.1")])))
            .await
            .unwrap();
        assert_eq!(agg.snapshot("e", "r").value(Dimension::Training), dec("0.9"));
    }

    #[tokio::test]
    async fn reduced_confidence_scales_change() {
        let (_, agg) = setup();
        let mut d = delta("e", "r", "a1", &[(Dimension::Temperament, "0.3")]);
        d.witnesses.push(r7_interchange::WitnessAttestation {
            id: "w".into(),
            signature: String::new(),
            timestamp: datetime!(2026-01-01 00:00 UTC),
            tier: r7_interchange::WitnessTier::Peer,
        });
        let hash = d.content_hash().unwrap();
        let f = FinalizedDelta::new(d, hash, ResultStatus::Success, WitnessStatus::ReducedConfidence, 2);
        agg.apply(f).await.unwrap();
        assert_eq!(agg.snapshot("e", "r").value(Dimension::Temperament), dec("0.65"));
    }

    #[tokio::test]
    async fn below_quorum_delta_is_refused() {
        let (_, agg) = setup();
        let d = delta("e", "r", "a1", &[(Dimension::Talent, "0.2")]);
        let hash = d.content_hash().unwrap();
        let f = FinalizedDelta::new(d, hash, ResultStatus::Success, WitnessStatus::QuorumMet, 2);
        assert!(agg.apply(f).await.is_err());
        assert_eq!(agg.snapshot("e", "r"), TensorSnapshot::neutral());
        assert_eq!(agg.counters("e", "r").total, 0);

        // The refused ticket does not block the next one.
        agg.apply(finalized(delta("e", "r", "a2", &[(Dimension::Talent, "0.1")])))
            .await
            .unwrap();
        assert_eq!(agg.snapshot("e", "r").value(Dimension::Talent), dec("0.6"));
    }

    #[tokio::test]
    async fn applies_follow_ticket_order() {
        let (_, agg) = setup();
        let agg = Arc::new(agg);
        let first = agg.ticket("e", "r");
        let second = agg.ticket("e", "r");

        // The second ticket is presented first and must wait.
        let waiting = {
            let agg = agg.clone();
            tokio::spawn(async move {
                agg.apply_in_order(second, finalized(delta("e", "r", "d2", &[(Dimension::Talent, "-0.2")])))
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(agg.history("e", "r").is_empty());

        agg.apply_in_order(first, finalized(delta("e", "r", "d1", &[(Dimension::Talent, "0.4")])))
            .await
            .unwrap();
        let updated = waiting.await.unwrap().unwrap();
        assert_eq!(updated.sequence, 1);
        let order: Vec<_> = agg.history("e", "r").into_iter().map(|e| e.action_ref).collect();
        assert_eq!(order, vec!["d1", "d2"]);
        // 0.5 + 0.4 = 0.9, then 0.9 − 0.2.
        assert_eq!(agg.snapshot("e", "r").value(Dimension::Talent), dec("0.7"));
    }

    #[test]
    fn action_counts_are_per_pair_and_type() {
        let (_, agg) = setup();
        assert_eq!(agg.count_action("e", "r", "analyze"), 0);
        assert_eq!(agg.count_action("e", "r", "analyze"), 1);
        assert_eq!(agg.count_action("e", "r", "report"), 0);
        assert_eq!(agg.count_action("e", "other", "analyze"), 0);
        assert_eq!(agg.count_action("e", "r", "analyze"), 2);
        assert_eq!(agg.roles_for_entity("e"), vec!["other", "r"]);
    }

    #[tokio::test]
    async fn forfeited_ticket_unblocks_successor() {
        let (_, agg) = setup();
        let first = agg.ticket("e", "r");
        let second = agg.ticket("e", "r");
        agg.forfeit(first);
        agg.apply_in_order(second, finalized(delta("e", "r", "d2", &[(Dimension::Talent, "0.1")])))
            .await
            .unwrap();
        assert_eq!(agg.counters("e", "r").total, 1);
    }
}
