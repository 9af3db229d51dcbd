//! Witness Coordinator.
//!
//! A reputation delta becomes final only once enough independent witnesses
//! have signed its content hash. Candidates are drawn in tier order:
//!
//! 1. authorities designated by the triggered rules,
//! 2. validators registered for the subject's role,
//! 3. relationship-graph peers within `max_peer_hops`, nearest first.
//!
//! Ties inside a tier break by identifier, so the same inputs always select
//! the same witnesses. When quorum is missed the configured
//! [`WitnessFallback`] decides between a deficit, a reduced-confidence
//! finalization and another round with a wider pool.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use r7_interchange::{
    attestation_message, ReputationDelta, ResultStatus, WitnessAttestation, WitnessTier,
};

use crate::clock::Clock;
use crate::config::{WitnessConfig, WitnessFallback};
use crate::error::EngineError;
use crate::rules::TriggeredRule;

/// A witness selected for solicitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessCandidate {
    pub id: String,
    pub tier: WitnessTier,
    /// Graph distance from the subject; zero outside the peer tier.
    pub hops: u32,
}

/// How many attestations a delta needs and who must be asked first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessRequirements {
    pub required: u32,
    pub designated: Vec<String>,
}

impl WitnessRequirements {
    /// The strictest requirement among the triggered rules, with every
    /// designated authority. Falls back to `default_quorum` when no
    /// triggered rule carries an impact template.
    pub fn from_triggered(triggered: &[TriggeredRule], default_quorum: u32) -> Self {
        let impacts: Vec<_> = triggered.iter().filter_map(|t| t.impact.as_ref()).collect();
        let required = impacts
            .iter()
            .map(|i| i.witnesses_required)
            .max()
            .unwrap_or(default_quorum);
        let designated: BTreeSet<String> = impacts
            .iter()
            .flat_map(|i| i.designated_witnesses.iter().cloned())
            .collect();
        WitnessRequirements {
            required,
            designated: designated.into_iter().collect(),
        }
    }
}

/// Where witnesses come from and how they are asked.
#[async_trait]
pub trait WitnessNetwork: Send + Sync + 'static {
    /// Validators registered for a role.
    fn role_validators(&self, role_ref: &str) -> Vec<String>;

    /// Direct relationship-graph neighbours of an entity.
    fn peers(&self, entity: &str) -> Vec<String>;

    fn verifying_key(&self, witness: &str) -> Option<VerifyingKey>;

    /// Ask one witness to sign `delta_hash`.
    async fn solicit(
        &self,
        candidate: &WitnessCandidate,
        delta: &ReputationDelta,
        delta_hash: &str,
    ) -> Result<WitnessAttestation, String>;
}

/// How a simulated witness answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum WitnessBehavior {
    Honest,
    /// Never answers.
    Silent,
    /// Answers honestly after `ms` milliseconds.
    Delayed { ms: u64 },
    /// Signs with a key other than its registered one.
    ForgedSignature,
    /// Timestamps its attestation `secs` seconds away from now.
    Skewed { secs: i64 },
    Refuse,
}

struct SimulatedWitness {
    key: SigningKey,
    behavior: WitnessBehavior,
}

#[derive(Default)]
struct NetworkInner {
    witnesses: HashMap<String, SimulatedWitness>,
    validators: BTreeMap<String, BTreeSet<String>>,
    edges: BTreeMap<String, BTreeSet<String>>,
}

/// In-process [`WitnessNetwork`] with scripted witness behaviour.
pub struct MemoryWitnessNetwork {
    inner: RwLock<NetworkInner>,
    clock: Arc<dyn Clock>,
}

impl MemoryWitnessNetwork {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MemoryWitnessNetwork {
            inner: RwLock::new(NetworkInner::default()),
            clock,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, NetworkInner> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, NetworkInner> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a witness with a fresh key pair.
    pub fn add_witness(&self, id: &str, behavior: WitnessBehavior) -> VerifyingKey {
        let key = SigningKey::generate(&mut rand::rngs::OsRng);
        let verifying = key.verifying_key();
        self.write()
            .witnesses
            .insert(id.to_string(), SimulatedWitness { key, behavior });
        verifying
    }

    pub fn add_role_validator(&self, role_ref: &str, witness: &str) {
        self.write()
            .validators
            .entry(role_ref.to_string())
            .or_default()
            .insert(witness.to_string());
    }

    /// Add an undirected relationship edge.
    pub fn connect(&self, a: &str, b: &str) {
        let mut inner = self.write();
        inner.edges.entry(a.to_string()).or_default().insert(b.to_string());
        inner.edges.entry(b.to_string()).or_default().insert(a.to_string());
    }
}

#[async_trait]
impl WitnessNetwork for MemoryWitnessNetwork {
    fn role_validators(&self, role_ref: &str) -> Vec<String> {
        self.read()
            .validators
            .get(role_ref)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn peers(&self, entity: &str) -> Vec<String> {
        self.read()
            .edges
            .get(entity)
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn verifying_key(&self, witness: &str) -> Option<VerifyingKey> {
        self.read().witnesses.get(witness).map(|w| w.key.verifying_key())
    }

    async fn solicit(
        &self,
        candidate: &WitnessCandidate,
        _delta: &ReputationDelta,
        delta_hash: &str,
    ) -> Result<WitnessAttestation, String> {
        let (key, behavior) = {
            let inner = self.read();
            let witness = inner
                .witnesses
                .get(&candidate.id)
                .ok_or_else(|| format!("witness {} is not reachable", candidate.id))?;
            (witness.key.clone(), witness.behavior.clone())
        };

        let mut timestamp = self.clock.now();
        let mut signing_key = key;
        match behavior {
            WitnessBehavior::Honest => {}
            WitnessBehavior::Silent => std::future::pending::<()>().await,
            WitnessBehavior::Delayed { ms } => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                timestamp = self.clock.now();
            }
            WitnessBehavior::ForgedSignature => {
                signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
            }
            WitnessBehavior::Skewed { secs } => {
                timestamp += time::Duration::seconds(secs);
            }
            WitnessBehavior::Refuse => {
                return Err(format!("witness {} refused to attest", candidate.id));
            }
        }

        let message = attestation_message(&candidate.id, delta_hash, timestamp);
        let signature = signing_key.sign(message.as_bytes());
        Ok(WitnessAttestation {
            id: candidate.id.clone(),
            signature: BASE64.encode(signature.to_bytes()),
            timestamp,
            tier: candidate.tier,
        })
    }
}

// ── Finalization ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WitnessStatus {
    QuorumMet,
    ReducedConfidence,
}

/// A witnessed delta, ready for the tensor aggregator.
///
/// Only the coordinator can build one; the aggregator re-checks the quorum
/// gate before applying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedDelta {
    delta: ReputationDelta,
    delta_hash: String,
    outcome: ResultStatus,
    status: WitnessStatus,
    required: u32,
    confidence: Decimal,
}

impl FinalizedDelta {
    pub(crate) fn new(
        delta: ReputationDelta,
        delta_hash: String,
        outcome: ResultStatus,
        status: WitnessStatus,
        required: u32,
    ) -> Self {
        let attested = delta.witnesses.len() as u32;
        let confidence = match status {
            WitnessStatus::QuorumMet => Decimal::ONE,
            WitnessStatus::ReducedConfidence if required > 0 => {
                Decimal::from(attested.min(required)) / Decimal::from(required)
            }
            WitnessStatus::ReducedConfidence => Decimal::ONE,
        };
        FinalizedDelta {
            delta,
            delta_hash,
            outcome,
            status,
            required,
            confidence,
        }
    }

    pub fn delta(&self) -> &ReputationDelta {
        &self.delta
    }

    pub fn delta_hash(&self) -> &str {
        &self.delta_hash
    }

    /// Status of the execution the delta scores.
    pub fn outcome(&self) -> ResultStatus {
        self.outcome
    }

    pub fn status(&self) -> WitnessStatus {
        self.status
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    pub fn attested(&self) -> u32 {
        self.delta.witnesses.len() as u32
    }

    /// Fraction of the delta the aggregator applies.
    pub fn confidence(&self) -> Decimal {
        self.confidence
    }

    /// The quorum gate: enough attestations for the status claimed, and the
    /// hash still matches the content.
    pub(crate) fn check_gate(&self) -> Result<(), String> {
        let attested = self.attested();
        let enough = match self.status {
            WitnessStatus::QuorumMet => attested >= self.required,
            WitnessStatus::ReducedConfidence => attested > 0 || self.required == 0,
        };
        if !enough {
            return Err(format!(
                "{attested} of {} required attestations",
                self.required
            ));
        }
        match self.delta.content_hash() {
            Ok(hash) if hash == self.delta_hash => Ok(()),
            Ok(_) => Err("delta content does not match its attested hash".to_string()),
            Err(e) => Err(format!("delta cannot be hashed: {e}")),
        }
    }
}

/// Attestations collected in one solicitation.
#[derive(Debug, Clone, Default)]
pub struct QuorumTally {
    pub attestations: Vec<WitnessAttestation>,
    /// Candidates whose answers were missing or invalid.
    pub rejected: Vec<String>,
}

/// Outcome of witness gathering.
#[derive(Debug, Clone)]
pub enum WitnessDecision {
    Finalized(FinalizedDelta),
    Deficit {
        delta: ReputationDelta,
        delta_hash: String,
        required: u32,
        attested: u32,
        rounds: u32,
    },
}

pub struct WitnessCoordinator {
    network: Arc<dyn WitnessNetwork>,
    config: WitnessConfig,
    clock: Arc<dyn Clock>,
}

impl WitnessCoordinator {
    pub fn new(network: Arc<dyn WitnessNetwork>, config: WitnessConfig, clock: Arc<dyn Clock>) -> Self {
        WitnessCoordinator {
            network,
            config,
            clock,
        }
    }

    /// Ranked candidates for `delta`, at most `requirements.required` of
    /// them. The subject and anyone in `exclude` are never selected.
    pub fn select_witnesses(
        &self,
        delta: &ReputationDelta,
        requirements: &WitnessRequirements,
        exclude: &BTreeSet<String>,
    ) -> Vec<WitnessCandidate> {
        let limit = requirements.required as usize;
        let mut taken: BTreeSet<String> = exclude.clone();
        taken.insert(delta.subject.clone());
        let mut selected = Vec::new();

        let mut push = |id: String, tier: WitnessTier, hops: u32, selected: &mut Vec<WitnessCandidate>| {
            if selected.len() < limit && taken.insert(id.clone()) {
                selected.push(WitnessCandidate { id, tier, hops });
            }
        };

        let mut designated = requirements.designated.clone();
        designated.sort();
        for id in designated {
            push(id, WitnessTier::Authority, 0, &mut selected);
        }

        let mut validators = self.network.role_validators(&delta.role);
        validators.sort();
        for id in validators {
            push(id, WitnessTier::RoleValidator, 0, &mut selected);
        }

        for (id, hops) in self.peers_within(&delta.subject) {
            push(id, WitnessTier::Peer, hops, &mut selected);
        }

        selected
    }

    /// Breadth-first walk of the relationship graph, ordered by
    /// (hops, id).
    fn peers_within(&self, subject: &str) -> Vec<(String, u32)> {
        let max_hops = self.config.max_peer_hops;
        let mut seen = BTreeSet::from([subject.to_string()]);
        let mut queue = VecDeque::from([(subject.to_string(), 0u32)]);
        let mut found = Vec::new();
        while let Some((node, hops)) = queue.pop_front() {
            if hops >= max_hops {
                continue;
            }
            for next in self.network.peers(&node) {
                if seen.insert(next.clone()) {
                    found.push((next.clone(), hops + 1));
                    queue.push_back((next, hops + 1));
                }
            }
        }
        found.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        found
    }

    /// Solicit every candidate concurrently and collect valid attestations
    /// until `quorum` is reached or `timeout` passes.
    pub async fn solicit_and_wait(
        &self,
        candidates: &[WitnessCandidate],
        delta: &ReputationDelta,
        delta_hash: &str,
        quorum: u32,
        timeout: Duration,
    ) -> QuorumTally {
        let mut tally = QuorumTally::default();
        let mut pending: BTreeMap<String, WitnessCandidate> = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for candidate in candidates {
            if pending.insert(candidate.id.clone(), candidate.clone()).is_some() {
                continue;
            }
            let network = self.network.clone();
            let candidate = candidate.clone();
            let delta = delta.clone();
            let hash = delta_hash.to_string();
            tasks.spawn(async move {
                let answer = network.solicit(&candidate, &delta, &hash).await;
                (candidate, answer)
            });
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut signers = BTreeSet::new();
        while (tally.attestations.len() as u32) < quorum {
            let joined = match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(missing = pending.len(), "witness solicitation timed out");
                    break;
                }
            };
            let (candidate, answer) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("witness task failed: {e}");
                    continue;
                }
            };
            pending.remove(&candidate.id);
            let verdict = answer.and_then(|att| {
                self.verify(&candidate, att, delta_hash, &signers)
            });
            match verdict {
                Ok(att) => {
                    signers.insert(att.id.clone());
                    tally.attestations.push(att);
                }
                Err(reason) => {
                    tracing::debug!(witness = %candidate.id, "attestation not counted: {reason}");
                    tally.rejected.push(candidate.id.clone());
                }
            }
        }
        tasks.abort_all();
        tally.rejected.extend(pending.into_keys());
        tally
    }

    fn verify(
        &self,
        candidate: &WitnessCandidate,
        mut att: WitnessAttestation,
        delta_hash: &str,
        signers: &BTreeSet<String>,
    ) -> Result<WitnessAttestation, String> {
        if att.id != candidate.id {
            return Err(format!("signed as {} instead of {}", att.id, candidate.id));
        }
        if signers.contains(&att.id) {
            return Err("duplicate signer".to_string());
        }
        let key = self
            .network
            .verifying_key(&att.id)
            .ok_or_else(|| "no verifying key".to_string())?;
        let sig_bytes = BASE64
            .decode(&att.signature)
            .map_err(|e| format!("error decoding signature: {e}"))?;
        let sig_array: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("invalid signature length: {}", b.len()))?;
        let signature = Signature::from_bytes(&sig_array);
        let message = attestation_message(&att.id, delta_hash, att.timestamp);
        key.verify_strict(message.as_bytes(), &signature)
            .map_err(|e| format!("signature invalid: {e}"))?;

        let skew = (att.timestamp - self.clock.now()).abs();
        if skew > self.config.max_clock_skew() {
            return Err(format!("timestamp off by {skew}"));
        }
        att.tier = candidate.tier;
        Ok(att)
    }

    /// Gather attestations for `delta`, applying the configured fallback
    /// when quorum is missed.
    pub async fn gather(
        &self,
        mut delta: ReputationDelta,
        requirements: &WitnessRequirements,
        outcome: ResultStatus,
    ) -> Result<WitnessDecision, EngineError> {
        let delta_hash = delta.content_hash()?;
        let required = requirements.required;
        let extra_rounds = match self.config.fallback {
            WitnessFallback::ExpandAndRetry { max_rounds } => max_rounds,
            _ => 0,
        };

        let mut solicited = BTreeSet::new();
        let mut attestations: Vec<WitnessAttestation> = Vec::new();
        let mut rounds = 0;
        while (attestations.len() as u32) < required && rounds <= extra_rounds {
            let needed = required - attestations.len() as u32;
            let round_requirements = WitnessRequirements {
                required: needed,
                designated: requirements.designated.clone(),
            };
            let candidates = self.select_witnesses(&delta, &round_requirements, &solicited);
            if candidates.is_empty() {
                tracing::debug!(round = rounds, "no further witness candidates");
                break;
            }
            rounds += 1;
            solicited.extend(candidates.iter().map(|c| c.id.clone()));
            let tally = self
                .solicit_and_wait(&candidates, &delta, &delta_hash, needed, self.config.timeout())
                .await;
            attestations.extend(tally.attestations);
        }

        let attested = attestations.len() as u32;
        let status = if attested >= required {
            Some(WitnessStatus::QuorumMet)
        } else {
            match self.config.fallback {
                WitnessFallback::ReducedConfidence { min_attestations }
                    if attested >= min_attestations.max(1) =>
                {
                    Some(WitnessStatus::ReducedConfidence)
                }
                _ => None,
            }
        };

        delta.witnesses = attestations;
        match status {
            Some(status) => {
                tracing::debug!(attested, required, ?status, "reputation delta finalized");
                Ok(WitnessDecision::Finalized(FinalizedDelta::new(
                    delta, delta_hash, outcome, status, required,
                )))
            }
            None => {
                tracing::warn!(attested, required, rounds, "witness quorum not reached");
                Ok(WitnessDecision::Deficit {
                    delta,
                    delta_hash,
                    required,
                    attested,
                    rounds,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn delta() -> ReputationDelta {
        ReputationDelta {
            subject: "lct:alice".into(),
            role: "role:analyst".into(),
            action_ref: "h".into(),
            rule_triggered: vec![],
            reason: "success: r".into(),
            t3_delta: BTreeMap::new(),
            v3_delta: BTreeMap::new(),
            contributing_factors: vec![],
            witnesses: vec![],
            net_trust_change: Decimal::ZERO,
            net_value_change: Decimal::ZERO,
            timestamp: datetime!(2026-01-01 00:00 UTC),
            computation_errors: vec![],
        }
    }

    fn setup(fallback: WitnessFallback) -> (Arc<MemoryWitnessNetwork>, WitnessCoordinator) {
        setup_with_skew(fallback, 300)
    }

    fn setup_with_skew(
        fallback: WitnessFallback,
        max_clock_skew_secs: u64,
    ) -> (Arc<MemoryWitnessNetwork>, WitnessCoordinator) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(datetime!(2026-01-01 00:00 UTC)));
        let network = Arc::new(MemoryWitnessNetwork::new(clock.clone()));
        let config = WitnessConfig {
            fallback,
            timeout_ms: 100,
            max_clock_skew_secs,
            default_quorum: 1,
            max_peer_hops: 2,
        };
        let coordinator = WitnessCoordinator::new(network.clone(), config, clock);
        (network, coordinator)
    }

    fn needs(required: u32, designated: &[&str]) -> WitnessRequirements {
        WitnessRequirements {
            required,
            designated: designated.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn selection_follows_tiers_and_caps() {
        let (net, coord) = setup(WitnessFallback::Abort);
        net.add_role_validator("role:analyst", "v2");
        net.add_role_validator("role:analyst", "v1");
        net.connect("lct:alice", "p1");
        let picked = coord.select_witnesses(&delta(), &needs(3, &["auth"]), &BTreeSet::new());
        let ids: Vec<_> = picked.iter().map(|c| (c.id.as_str(), c.tier)).collect();
        assert_eq!(
            ids,
            vec![
                ("auth", WitnessTier::Authority),
                ("v1", WitnessTier::RoleValidator),
                ("v2", WitnessTier::RoleValidator),
            ]
        );
    }

    #[test]
    fn peers_are_bounded_and_ordered_by_distance() {
        let (net, coord) = setup(WitnessFallback::Abort);
        net.connect("lct:alice", "zed");
        net.connect("zed", "amy");
        net.connect("amy", "far");
        net.connect("lct:alice", "bob");
        let picked = coord.select_witnesses(&delta(), &needs(10, &[]), &BTreeSet::new());
        let ids: Vec<_> = picked.iter().map(|c| (c.id.as_str(), c.hops)).collect();
        assert_eq!(ids, vec![("bob", 1), ("zed", 1), ("amy", 2)]);
    }

    #[test]
    fn subject_and_duplicates_are_never_selected() {
        let (net, coord) = setup(WitnessFallback::Abort);
        net.add_role_validator("role:analyst", "lct:alice");
        net.add_role_validator("role:analyst", "auth");
        let picked = coord.select_witnesses(&delta(), &needs(5, &["auth"]), &BTreeSet::new());
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].tier, WitnessTier::Authority);
    }

    #[test]
    fn requirements_take_the_strictest_rule() {
        use r7_interchange::{ReputationImpact, RuleKind};
        let rule = |id: &str, n: u32, designated: &[&str]| TriggeredRule {
            rule_id: id.into(),
            kind: RuleKind::Reputation,
            impact: Some(ReputationImpact {
                factors: vec![],
                dimensions: BTreeMap::new(),
                witnesses_required: n,
                designated_witnesses: designated.iter().map(|s| s.to_string()).collect(),
            }),
            inputs_used: vec![],
        };
        let reqs = WitnessRequirements::from_triggered(
            &[rule("a", 2, &["oracle"]), rule("b", 3, &["auth", "oracle"])],
            1,
        );
        assert_eq!(reqs.required, 3);
        assert_eq!(reqs.designated, vec!["auth", "oracle"]);
        assert_eq!(WitnessRequirements::from_triggered(&[], 2).required, 2);
    }

    #[tokio::test]
    async fn quorum_met_with_honest_witnesses() {
        let (net, coord) = setup(WitnessFallback::Abort);
        for id in ["v1", "v2"] {
            net.add_witness(id, WitnessBehavior::Honest);
            net.add_role_validator("role:analyst", id);
        }
        let decision = coord
            .gather(delta(), &needs(2, &[]), ResultStatus::Success)
            .await
            .unwrap();
        match decision {
            WitnessDecision::Finalized(f) => {
                assert_eq!(f.attested(), 2);
                assert_eq!(f.confidence(), Decimal::ONE);
                assert!(f.check_gate().is_ok());
            }
            other => panic!("expected finalized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn abort_policy_reports_deficit() {
        let (net, coord) = setup(WitnessFallback::Abort);
        net.add_witness("v1", WitnessBehavior::Honest);
        net.add_witness("v2", WitnessBehavior::Honest);
        net.add_witness("v3", WitnessBehavior::Silent);
        for id in ["v1", "v2", "v3"] {
            net.add_role_validator("role:analyst", id);
        }
        let decision = coord
            .gather(delta(), &needs(3, &[]), ResultStatus::Success)
            .await
            .unwrap();
        assert!(matches!(
            decision,
            WitnessDecision::Deficit { required: 3, attested: 2, .. }
        ));
    }

    #[tokio::test]
    async fn invalid_attestations_do_not_count() {
        let (net, coord) = setup(WitnessFallback::Abort);
        net.add_witness("forger", WitnessBehavior::ForgedSignature);
        net.add_witness("skewed", WitnessBehavior::Skewed { secs: 3600 });
        net.add_witness("refuser", WitnessBehavior::Refuse);
        net.add_witness("honest", WitnessBehavior::Honest);
        let candidates: Vec<_> = ["forger", "skewed", "refuser", "honest", "honest"]
            .iter()
            .map(|id| WitnessCandidate {
                id: id.to_string(),
                tier: WitnessTier::Peer,
                hops: 1,
            })
            .collect();
        let d = delta();
        let hash = d.content_hash().unwrap();
        let tally = coord
            .solicit_and_wait(&candidates, &d, &hash, 4, Duration::from_millis(100))
            .await;
        assert_eq!(tally.attestations.len(), 1);
        assert_eq!(tally.attestations[0].id, "honest");
        assert_eq!(tally.rejected.len(), 3);
    }

    #[tokio::test]
    async fn unbounded_skew_setting_accepts_skewed_attestation() {
        let (net, coord) = setup_with_skew(WitnessFallback::Abort, u64::MAX);
        net.add_witness("skewed", WitnessBehavior::Skewed { secs: 3600 });
        net.add_role_validator("role:analyst", "skewed");
        let decision = coord
            .gather(delta(), &needs(1, &[]), ResultStatus::Success)
            .await
            .unwrap();
        let WitnessDecision::Finalized(f) = decision else {
            panic!("expected finalized");
        };
        assert_eq!(f.attested(), 1);
    }

    #[tokio::test]
    async fn reduced_confidence_scales_by_attested_fraction() {
        let (net, coord) = setup(WitnessFallback::ReducedConfidence { min_attestations: 1 });
        net.add_witness("v1", WitnessBehavior::Honest);
        net.add_witness("v2", WitnessBehavior::Honest);
        net.add_witness("v3", WitnessBehavior::Silent);
        for id in ["v1", "v2", "v3"] {
            net.add_role_validator("role:analyst", id);
        }
        let decision = coord
            .gather(delta(), &needs(3, &[]), ResultStatus::Success)
            .await
            .unwrap();
        let WitnessDecision::Finalized(f) = decision else {
            panic!("expected finalized");
        };
        assert_eq!(f.status(), WitnessStatus::ReducedConfidence);
        assert_eq!(f.confidence(), Decimal::from(2) / Decimal::from(3));
        assert!(f.check_gate().is_ok());
    }

    #[tokio::test]
    async fn expand_and_retry_widens_the_pool() {
        let (net, coord) = setup(WitnessFallback::ExpandAndRetry { max_rounds: 1 });
        net.add_witness("v1", WitnessBehavior::Silent);
        net.add_role_validator("role:analyst", "v1");
        net.add_witness("p1", WitnessBehavior::Honest);
        net.connect("lct:alice", "p1");
        let decision = coord
            .gather(delta(), &needs(1, &[]), ResultStatus::Success)
            .await
            .unwrap();
        let WitnessDecision::Finalized(f) = decision else {
            panic!("expected finalized");
        };
        assert_eq!(f.delta().witnesses[0].id, "p1");
        assert_eq!(f.delta().witnesses[0].tier, WitnessTier::Peer);
    }

    #[test]
    fn gate_rejects_tampered_content() {
        let mut d = delta();
        let hash = d.content_hash().unwrap();
        d.reason = "tampered".into();
        let f = FinalizedDelta::new(d, hash, ResultStatus::Success, WitnessStatus::QuorumMet, 0);
        assert!(f.check_gate().unwrap_err().contains("does not match"));
    }
}
