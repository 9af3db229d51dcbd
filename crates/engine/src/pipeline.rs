//! The action pipeline.
//!
//! [`Engine`] drives each action through its state machine:
//!
//! ```text
//! Submitted → Validating → (Rejected | Validated) → Executing
//!   → (ExecFailed | Executed) → Settling → (SettleFailed | Settled)
//!   → ComputingReputation → AwaitingWitness → (WitnessDeficit | Finalized)
//!   → (WitnessDeficit | Aggregated)
//! ```
//!
//! A `Validated` action may instead be `Cancelled`, or `Expired` once its
//! escrow's TTL has passed. Every transition is written to the ledger
//! before the state advances, each record chained to the previous one for
//! the same action.
//!
//! When ledger retries are exhausted the action stops where it is and
//! [`Engine::resume`] continues it later from the first unfinished step.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Instrument;

use r7_interchange::{
    ActionRecord, ActionResult, LedgerProof, ReputationDelta, ResultError, RuleSet,
};
use r7_ledger::{Ledger, MemoryLedger};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::directory::RoleDirectory;
use crate::error::{AdmissionError, EngineError, ErrorKind};
use crate::meter::{Effector, ExecutionMeter};
use crate::reputation::ReputationEngine;
use crate::retry::append_with_retry;
use crate::rules::{evaluate_output, evaluate_reputation, RuleSetResolver, TriggeredRule};
use crate::settlement::{
    Escrow, PricingOracle, ReleaseCondition, ResourcePool, SettlementOutcome, SettlementProcessor,
};
use crate::tensor::{ApplyTicket, TensorAggregator, UpdatedTensor};
use crate::validator::{ActionValidator, ValidationToken};
use crate::witness::{
    FinalizedDelta, WitnessCoordinator, WitnessDecision, WitnessNetwork, WitnessRequirements,
    WitnessStatus,
};

pub const TOPIC_SUBMITTED: &str = "r7.action.submitted";
pub const TOPIC_REJECTED: &str = "r7.action.rejected";
pub const TOPIC_VALIDATED: &str = "r7.action.validated";
pub const TOPIC_CANCELLED: &str = "r7.action.cancelled";
pub const TOPIC_EXPIRED: &str = "r7.action.expired";
pub const TOPIC_RESULT: &str = "r7.result";
pub const TOPIC_REPUTATION_COMPUTED: &str = "r7.reputation.computed";
pub const TOPIC_REPUTATION_FINALIZED: &str = "r7.reputation.finalized";
pub const TOPIC_REPUTATION_DEFICIT: &str = "r7.reputation.deficit";
pub const TOPIC_TENSOR_AGGREGATED: &str = "r7.tensor.aggregated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Submitted,
    Validating,
    Rejected,
    Validated,
    Cancelled,
    Expired,
    Executing,
    ExecFailed,
    Executed,
    Settling,
    SettleFailed,
    Settled,
    ComputingReputation,
    AwaitingWitness,
    WitnessDeficit,
    Finalized,
    Aggregated,
}

impl ActionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionState::Submitted => "submitted",
            ActionState::Validating => "validating",
            ActionState::Rejected => "rejected",
            ActionState::Validated => "validated",
            ActionState::Cancelled => "cancelled",
            ActionState::Expired => "expired",
            ActionState::Executing => "executing",
            ActionState::ExecFailed => "exec_failed",
            ActionState::Executed => "executed",
            ActionState::Settling => "settling",
            ActionState::SettleFailed => "settle_failed",
            ActionState::Settled => "settled",
            ActionState::ComputingReputation => "computing_reputation",
            ActionState::AwaitingWitness => "awaiting_witness",
            ActionState::WitnessDeficit => "witness_deficit",
            ActionState::Finalized => "finalized",
            ActionState::Aggregated => "aggregated",
        }
    }

    /// No further transition happens without operator action.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionState::Rejected
                | ActionState::Cancelled
                | ActionState::Expired
                | ActionState::SettleFailed
                | ActionState::WitnessDeficit
                | ActionState::Aggregated
        )
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Witness stage summary for an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessSummary {
    pub required: u32,
    pub attested: u32,
    /// `None` when quorum was not reached.
    pub status: Option<WitnessStatus>,
    pub confidence: Decimal,
    pub witnesses: Vec<String>,
}

/// Everything the pipeline produced for one action so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub record_hash: String,
    pub state: ActionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<ReputationDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<WitnessSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tensor: Option<UpdatedTensor>,
    /// Hash of the latest ledger record written for the action.
    pub ledger_head: String,
}

/// Per-action pipeline state.
#[derive(Debug, Clone)]
struct ActionEntry {
    record: ActionRecord,
    record_hash: String,
    state: ActionState,
    /// A step is in flight; no other call may advance the action.
    busy: bool,
    /// Stopped on a ledger stall.
    stalled: bool,
    head: String,
    token: Option<ValidationToken>,
    result: Option<ActionResult>,
    result_logged: bool,
    settlement: Option<SettlementOutcome>,
    triggered: Vec<TriggeredRule>,
    delta: Option<ReputationDelta>,
    witness: Option<WitnessSummary>,
    finalized: Option<FinalizedDelta>,
    ticket: Option<ApplyTicket>,
    tensor: Option<UpdatedTensor>,
}

impl ActionEntry {
    fn outcome(&self) -> ActionOutcome {
        ActionOutcome {
            record_hash: self.record_hash.clone(),
            state: self.state,
            result: self.result.clone(),
            settlement: self.settlement.clone(),
            delta: self.delta.clone(),
            witness: self.witness.clone(),
            tensor: self.tensor.clone(),
            ledger_head: self.head.clone(),
        }
    }

    fn token(&self) -> Result<&ValidationToken, EngineError> {
        self.token.as_ref().ok_or_else(|| self.invalid("validated"))
    }

    fn result(&self) -> Result<&ActionResult, EngineError> {
        self.result.as_ref().ok_or_else(|| self.invalid("executed"))
    }

    fn invalid(&self, expected: &str) -> EngineError {
        EngineError::InvalidState {
            record_hash: self.record_hash.clone(),
            actual: self.state.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Assembles an [`Engine`] from its collaborators.
pub struct EngineBuilder {
    config: EngineConfig,
    ledger: Option<Arc<dyn Ledger>>,
    clock: Option<Arc<dyn Clock>>,
    rules: Option<Arc<dyn RuleSetResolver>>,
    directory: Option<Arc<dyn RoleDirectory>>,
    pricing: Option<Arc<dyn PricingOracle>>,
    pool: Option<Arc<ResourcePool>>,
    witnesses: Option<Arc<dyn WitnessNetwork>>,
}

impl EngineBuilder {
    pub fn ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn rules(mut self, rules: Arc<dyn RuleSetResolver>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn RoleDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn pricing(mut self, pricing: Arc<dyn PricingOracle>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    pub fn pool(mut self, pool: Arc<ResourcePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn witnesses(mut self, network: Arc<dyn WitnessNetwork>) -> Self {
        self.witnesses = Some(network);
        self
    }

    /// Validate the configuration and wire the stages together. The
    /// ledger, clock and pool default to in-memory instances; the other
    /// collaborators are required.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        let missing = |what: &str| EngineError::Config(format!("engine needs a {what}"));
        let rules = self.rules.ok_or_else(|| missing("rule set resolver"))?;
        let directory = self.directory.ok_or_else(|| missing("role directory"))?;
        let pricing = self.pricing.ok_or_else(|| missing("pricing oracle"))?;
        let network = self.witnesses.ok_or_else(|| missing("witness network"))?;
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(MemoryLedger::new()) as Arc<dyn Ledger>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let pool = self.pool.unwrap_or_else(|| Arc::new(ResourcePool::new()));
        let config = self.config;

        let escrow_ttl = time::Duration::seconds(
            i64::try_from(config.settlement.escrow_ttl_secs).unwrap_or(i64::MAX),
        );
        Ok(Engine {
            validator: ActionValidator::new(
                directory,
                rules.clone(),
                pricing,
                pool.clone(),
                ledger.clone(),
                clock.clone(),
                escrow_ttl,
            ),
            meter: ExecutionMeter::new(config.execution.timeout()),
            settlement: SettlementProcessor::new(
                pool.clone(),
                ledger.clone(),
                config.ledger.clone(),
                config.settlement.refund_fraction,
            ),
            reputation: ReputationEngine::new(config.reputation.delta_bound).with_diminishing(
                config.reputation.diminishing_after,
                config.reputation.diminishing_step,
            ),
            witnesses: WitnessCoordinator::new(network, config.witness.clone(), clock.clone()),
            tensor: Arc::new(TensorAggregator::new(config.tensor.clone(), clock.clone())),
            actions: Mutex::new(HashMap::new()),
            config,
            ledger,
            clock,
            rules,
            pool,
        })
    }
}

/// The R7 engine: owns every pipeline stage and the per-action state.
pub struct Engine {
    config: EngineConfig,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    rules: Arc<dyn RuleSetResolver>,
    pool: Arc<ResourcePool>,
    validator: ActionValidator,
    meter: ExecutionMeter,
    settlement: SettlementProcessor,
    reputation: ReputationEngine,
    witnesses: WitnessCoordinator,
    tensor: Arc<TensorAggregator>,
    actions: Mutex<HashMap<String, ActionEntry>>,
}

fn already_submitted(record_hash: &str) -> EngineError {
    AdmissionError::new(
        ErrorKind::RequestMalformed,
        format!("record {record_hash} was already submitted"),
    )
    .into()
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            ledger: None,
            clock: None,
            rules: None,
            directory: None,
            pricing: None,
            pool: None,
            witnesses: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    pub fn tensor(&self) -> &Arc<TensorAggregator> {
        &self.tensor
    }

    /// Register the effector that executes `action` (trailing `*` globs
    /// allowed).
    pub fn register_effector(&self, action: &str, effector: Arc<dyn Effector>) {
        self.meter.register(action, effector);
    }

    fn actions(&self) -> MutexGuard<'_, HashMap<String, ActionEntry>> {
        self.actions.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self, record_hash: &str) -> Option<ActionState> {
        self.actions().get(record_hash).map(|e| e.state)
    }

    pub fn outcome(&self, record_hash: &str) -> Option<ActionOutcome> {
        self.actions().get(record_hash).map(ActionEntry::outcome)
    }

    async fn append(
        &self,
        topic: &str,
        object: serde_json::Value,
        parent: Option<&str>,
    ) -> Result<String, EngineError> {
        append_with_retry(self.ledger.as_ref(), &self.config.ledger, topic, object, parent).await
    }

    /// Record a submission and run admission. On success the escrow is
    /// locked and the action waits in `Validated` for [`Engine::run`].
    pub async fn submit(&self, record: ActionRecord) -> Result<ValidationToken, EngineError> {
        let record_hash = record.content_hash()?;
        let span = tracing::info_span!("action", record = %short(&record_hash));
        self.submit_inner(record, record_hash).instrument(span).await
    }

    async fn submit_inner(
        &self,
        record: ActionRecord,
        record_hash: String,
    ) -> Result<ValidationToken, EngineError> {
        if self.actions().contains_key(&record_hash) {
            return Err(already_submitted(&record_hash));
        }

        let submitted = self
            .append(
                TOPIC_SUBMITTED,
                json!({ "recordHash": record_hash, "record": record }),
                None,
            )
            .await?;

        let mut entry = ActionEntry {
            record: record.clone(),
            record_hash: record_hash.clone(),
            state: ActionState::Validating,
            busy: true,
            stalled: false,
            head: submitted,
            token: None,
            result: None,
            result_logged: false,
            settlement: None,
            triggered: Vec::new(),
            delta: None,
            witness: None,
            finalized: None,
            ticket: None,
            tensor: None,
        };
        {
            let mut actions = self.actions();
            if actions.contains_key(&record_hash) {
                return Err(already_submitted(&record_hash));
            }
            actions.insert(record_hash.clone(), entry.clone());
        }

        let token = match self.validator.validate(&record).await {
            Ok(token) => token,
            Err(rejection) => {
                tracing::info!(code = rejection.code(), "action rejected: {}", rejection.detail);
                let object = json!({
                    "recordHash": record_hash,
                    "code": rejection.code(),
                    "detail": rejection.detail,
                });
                // Best effort: the caller gets the rejection either way.
                match self.ledger.append(object, TOPIC_REJECTED, Some(&entry.head)).await {
                    Ok(hash) => entry.head = hash,
                    Err(e) => tracing::warn!("rejection trace not recorded: {e}"),
                }
                entry.state = ActionState::Rejected;
                entry.busy = false;
                self.store(&entry);
                return Err(rejection.into());
            }
        };

        let validated = self
            .append(
                TOPIC_VALIDATED,
                serde_json::to_value(&token)?,
                Some(&entry.head),
            )
            .await;
        match validated {
            Ok(hash) => {
                entry.head = hash;
                entry.state = ActionState::Validated;
                entry.token = Some(token.clone());
                entry.busy = false;
                self.store(&entry);
                self.tensor
                    .ensure_pair(&record.role.actor, &record.role.role_ref);
                tracing::info!(escrow = %token.escrow_id, amount = %token.escrow_amount, "action validated");
                Ok(token)
            }
            Err(e) => {
                // Unrecorded admission: give the escrow back.
                if let Err(release) = self.pool.release(&token.escrow_id, ReleaseCondition::Cancelled) {
                    tracing::error!("escrow {} not released: {release}", token.escrow_id);
                }
                entry.state = ActionState::Rejected;
                entry.busy = false;
                self.store(&entry);
                Err(e)
            }
        }
    }

    fn store(&self, entry: &ActionEntry) {
        self.actions().insert(entry.record_hash.clone(), entry.clone());
    }

    /// Claim an action for a step. Fails when another call holds it or it
    /// is in none of the `allowed` states.
    fn claim(
        &self,
        record_hash: &str,
        allowed: impl Fn(&ActionEntry) -> bool,
        expected: &str,
    ) -> Result<ActionEntry, EngineError> {
        let mut actions = self.actions();
        let entry = actions
            .get_mut(record_hash)
            .ok_or_else(|| EngineError::UnknownAction {
                record_hash: record_hash.to_string(),
            })?;
        if entry.busy || !allowed(entry) {
            return Err(EngineError::InvalidState {
                record_hash: record_hash.to_string(),
                actual: if entry.busy {
                    format!("{} (in progress)", entry.state)
                } else {
                    entry.state.to_string()
                },
                expected: expected.to_string(),
            });
        }
        entry.busy = true;
        Ok(entry.clone())
    }

    /// Cancel a validated action before execution and return its escrow
    /// in full.
    pub async fn cancel(&self, record_hash: &str) -> Result<Escrow, EngineError> {
        let mut entry = self.claim(record_hash, |e| e.state == ActionState::Validated, "validated")?;
        let escrow_id = entry.token()?.escrow_id.clone();
        let appended = self
            .append(
                TOPIC_CANCELLED,
                json!({ "recordHash": record_hash, "escrowId": escrow_id }),
                Some(&entry.head),
            )
            .await;
        let hash = match appended {
            Ok(hash) => hash,
            Err(e) => {
                entry.busy = false;
                self.store(&entry);
                return Err(e);
            }
        };
        let released = self.pool.release(&escrow_id, ReleaseCondition::Cancelled);
        entry.head = hash;
        entry.state = ActionState::Cancelled;
        entry.busy = false;
        self.store(&entry);
        tracing::info!(record = %short(record_hash), "action cancelled");
        released
    }

    /// Release the escrows of validated actions whose TTL has passed.
    pub async fn expire_escrows(&self) -> Vec<Escrow> {
        let now = self.clock.now();
        let mut candidates: Vec<String> = self
            .actions()
            .values()
            .filter(|e| e.state == ActionState::Validated && !e.busy)
            .filter_map(|e| {
                let token = e.token.as_ref()?;
                let escrow = self.pool.escrow(&token.escrow_id)?;
                (escrow.expires_at <= now).then(|| e.record_hash.clone())
            })
            .collect();
        candidates.sort();

        let mut released = Vec::new();
        for record_hash in candidates {
            let Ok(mut entry) =
                self.claim(&record_hash, |e| e.state == ActionState::Validated, "validated")
            else {
                continue;
            };
            let Some(escrow_id) = entry.token.as_ref().map(|t| t.escrow_id.clone()) else {
                entry.busy = false;
                self.store(&entry);
                continue;
            };
            match self.pool.release(&escrow_id, ReleaseCondition::Expired) {
                Ok(escrow) => {
                    let object = json!({ "recordHash": record_hash, "escrowId": escrow_id });
                    match self.append(TOPIC_EXPIRED, object, Some(&entry.head)).await {
                        Ok(hash) => entry.head = hash,
                        Err(e) => tracing::warn!("expiry of {escrow_id} not recorded: {e}"),
                    }
                    entry.state = ActionState::Expired;
                    released.push(escrow);
                }
                Err(e) => tracing::warn!("escrow {escrow_id} not expired: {e}"),
            }
            entry.busy = false;
            self.store(&entry);
        }
        released
    }

    /// Submit and run in one call.
    pub async fn process(&self, record: ActionRecord) -> Result<ActionOutcome, EngineError> {
        let token = self.submit(record).await?;
        self.run(&token.record_hash).await
    }

    /// Execute a validated action and drive it to a terminal state.
    pub async fn run(&self, record_hash: &str) -> Result<ActionOutcome, EngineError> {
        let entry = self.claim(record_hash, |e| e.state == ActionState::Validated, "validated")?;
        let span = tracing::info_span!("action", record = %short(record_hash));
        self.drive(entry).instrument(span).await
    }

    /// Continue an action that stopped on a ledger stall.
    pub async fn resume(&self, record_hash: &str) -> Result<ActionOutcome, EngineError> {
        let mut entry = self.claim(record_hash, |e| e.stalled, "stalled")?;
        entry.stalled = false;
        if entry.state == ActionState::SettleFailed {
            entry.state = if entry.result_logged {
                ActionState::Settling
            } else if entry.result.as_ref().map_or(false, |r| r.status.is_success()) {
                ActionState::Executed
            } else {
                ActionState::ExecFailed
            };
        }
        tracing::info!(record = %short(record_hash), state = %entry.state, "resuming action");
        let span = tracing::info_span!("action", record = %short(record_hash));
        self.drive(entry).instrument(span).await
    }

    async fn drive(&self, mut entry: ActionEntry) -> Result<ActionOutcome, EngineError> {
        let outcome = loop {
            if entry.state.is_terminal() {
                break Ok(());
            }
            let step = self.step(&mut entry).await;
            self.store(&entry);
            if let Err(e) = step {
                break Err(e);
            }
        };
        entry.busy = false;
        self.store(&entry);
        outcome.map(|()| entry.outcome())
    }

    /// Advance one state. On error the entry reflects where the action
    /// stopped.
    async fn step(&self, entry: &mut ActionEntry) -> Result<(), EngineError> {
        match entry.state {
            ActionState::Validated => {
                entry.state = ActionState::Executing;
                Ok(())
            }
            ActionState::Executing => {
                self.execute(entry).await;
                Ok(())
            }
            ActionState::Executed | ActionState::ExecFailed => {
                self.log_result(entry).await.inspect_err(|_| {
                    entry.state = ActionState::SettleFailed;
                    entry.stalled = true;
                })
            }
            ActionState::Settling => self.settle(entry).await,
            ActionState::Settled => {
                entry.state = ActionState::ComputingReputation;
                Ok(())
            }
            ActionState::ComputingReputation => self.compute_reputation(entry).await,
            ActionState::AwaitingWitness => self.gather_witnesses(entry).await,
            ActionState::Finalized => self.aggregate(entry).await,
            ActionState::Submitted | ActionState::Validating => Err(entry.invalid("validated")),
            ActionState::Rejected
            | ActionState::Cancelled
            | ActionState::Expired
            | ActionState::SettleFailed
            | ActionState::WitnessDeficit
            | ActionState::Aggregated => Ok(()),
        }
    }

    fn rule_set(&self, rules_hash: &str) -> Option<Arc<RuleSet>> {
        let rules = self.rules.resolve(rules_hash);
        if rules.is_none() {
            tracing::warn!(rules = %rules_hash, "rule set no longer resolves");
        }
        rules
    }

    async fn execute(&self, entry: &mut ActionEntry) {
        let capabilities = entry
            .token
            .as_ref()
            .map(|t| t.capabilities.clone())
            .unwrap_or_default();
        let mut result = self
            .meter
            .execute(&entry.record, &entry.record_hash, &capabilities)
            .await;

        if let Some(rules) = self.rule_set(&entry.record.rules_hash) {
            let violated = evaluate_output(&rules, &entry.record, &result);
            if !violated.is_empty() {
                result.status = r7_interchange::ResultStatus::Failure;
                result.error = Some(ResultError {
                    code: ErrorKind::ResultInvalid.code().to_string(),
                    message: format!("output violates rule(s): {}", violated.join(", ")),
                });
            }
        }

        tracing::info!(
            status = %result.status,
            code = result.error.as_ref().map(|e| e.code.as_str()).unwrap_or(""),
            "action executed"
        );
        entry.state = if result.status.is_success() {
            ActionState::Executed
        } else {
            ActionState::ExecFailed
        };
        entry.result = Some(result);
    }

    async fn log_result(&self, entry: &mut ActionEntry) -> Result<(), EngineError> {
        let result = entry.result()?.clone();
        let hash = self
            .append(TOPIC_RESULT, serde_json::to_value(&result)?, Some(&entry.head))
            .await?;
        entry.head = hash.clone();
        entry.result_logged = true;
        entry.state = ActionState::Settling;

        match self.ledger.prove(&hash).await {
            Ok(proof) => {
                let inclusion_proof = proof.encoded_path();
                if let Some(result) = entry.result.as_mut() {
                    result.ledger_proof = Some(LedgerProof {
                        tx_hash: proof.record_hash,
                        height: proof.height,
                        root: proof.root,
                        inclusion_proof,
                    });
                }
            }
            Err(e) => tracing::warn!("no inclusion proof for result {hash}: {e}"),
        }
        Ok(())
    }

    async fn settle(&self, entry: &mut ActionEntry) -> Result<(), EngineError> {
        let settled = {
            let token = entry.token()?;
            let result = entry.result()?;
            self.settlement.settle(result, token, Some(&entry.head)).await
        };
        match settled {
            Ok(outcome) => {
                tracing::info!(
                    transferred = %outcome.transferred,
                    refunded = %outcome.plan.refunded,
                    "action settled"
                );
                entry.head = outcome.ledger_hash.clone();
                entry.settlement = Some(outcome);
                entry.state = ActionState::Settled;
                Ok(())
            }
            Err(e) => {
                entry.state = ActionState::SettleFailed;
                entry.stalled = matches!(e, EngineError::LedgerStall { .. });
                Err(e)
            }
        }
    }

    async fn compute_reputation(&self, entry: &mut ActionEntry) -> Result<(), EngineError> {
        if entry.delta.is_none() {
            let result = entry.result()?;
            let triggered = self
                .rule_set(&entry.record.rules_hash)
                .map(|rules| evaluate_reputation(&rules, &entry.record, result))
                .unwrap_or_default();
            let role = &entry.record.role;
            let current = self.tensor.snapshot(&role.actor, &role.role_ref);
            let repeats = self.tensor.count_action(
                &role.actor,
                &role.role_ref,
                &entry.record.request.action,
            );
            let delta = self.reputation.compute(
                &entry.record,
                &entry.record_hash,
                result,
                &triggered,
                &current,
                repeats,
                self.clock.now(),
            );
            entry.triggered = triggered;
            entry.delta = Some(delta);
        }

        let Some(delta) = entry.delta.as_ref() else {
            return Err(entry.invalid("reputation computed"));
        };
        let object = json!({
            "recordHash": entry.record_hash,
            "deltaHash": delta.content_hash()?,
            "delta": delta,
        });
        let hash = self
            .append(TOPIC_REPUTATION_COMPUTED, object, Some(&entry.head))
            .await
            .inspect_err(|_| entry.stalled = true)?;
        entry.head = hash;
        entry.state = ActionState::AwaitingWitness;
        Ok(())
    }

    async fn gather_witnesses(&self, entry: &mut ActionEntry) -> Result<(), EngineError> {
        let Some(delta) = entry.delta.clone() else {
            return Err(entry.invalid("reputation computed"));
        };
        let status = entry.result()?.status;
        let requirements =
            WitnessRequirements::from_triggered(&entry.triggered, self.config.witness.default_quorum);

        let decision = match entry.finalized.clone() {
            Some(finalized) => WitnessDecision::Finalized(finalized),
            None => self.witnesses.gather(delta, &requirements, status).await?,
        };

        match decision {
            WitnessDecision::Finalized(finalized) => {
                entry.witness = Some(WitnessSummary {
                    required: finalized.required(),
                    attested: finalized.attested(),
                    status: Some(finalized.status()),
                    confidence: finalized.confidence(),
                    witnesses: finalized.delta().witnesses.iter().map(|w| w.id.clone()).collect(),
                });
                entry.delta = Some(finalized.delta().clone());
                entry.finalized = Some(finalized.clone());

                let role = &entry.record.role;
                let ticket = self.tensor.ticket(&role.actor, &role.role_ref);
                let object = json!({ "recordHash": entry.record_hash, "finalized": finalized });
                match self
                    .append(TOPIC_REPUTATION_FINALIZED, object, Some(&entry.head))
                    .await
                {
                    Ok(hash) => {
                        entry.head = hash;
                        entry.ticket = Some(ticket);
                        entry.state = ActionState::Finalized;
                        Ok(())
                    }
                    Err(e) => {
                        self.tensor.forfeit(ticket);
                        entry.stalled = true;
                        Err(e)
                    }
                }
            }
            WitnessDecision::Deficit {
                delta,
                delta_hash,
                required,
                attested,
                rounds,
            } => {
                entry.witness = Some(WitnessSummary {
                    required,
                    attested,
                    status: None,
                    confidence: Decimal::ZERO,
                    witnesses: delta.witnesses.iter().map(|w| w.id.clone()).collect(),
                });
                let object = json!({
                    "recordHash": entry.record_hash,
                    "code": ErrorKind::WitnessDeficit.code(),
                    "deltaHash": delta_hash,
                    "required": required,
                    "attested": attested,
                    "rounds": rounds,
                });
                entry.delta = Some(delta);
                let hash = self
                    .append(TOPIC_REPUTATION_DEFICIT, object, Some(&entry.head))
                    .await
                    .inspect_err(|_| entry.stalled = true)?;
                entry.head = hash;
                entry.state = ActionState::WitnessDeficit;
                Ok(())
            }
        }
    }

    async fn aggregate(&self, entry: &mut ActionEntry) -> Result<(), EngineError> {
        if entry.tensor.is_none() {
            let Some(finalized) = entry.finalized.clone() else {
                return Err(entry.invalid("finalized"));
            };
            let role = &entry.record.role;
            let ticket = match entry.ticket.take() {
                Some(ticket) => ticket,
                None => self.tensor.ticket(&role.actor, &role.role_ref),
            };
            match self.tensor.apply_in_order(ticket, finalized).await {
                Ok(updated) => entry.tensor = Some(updated),
                Err(refusal) => return self.refuse_delta(entry, refusal).await,
            }
        }

        let Some(updated) = entry.tensor.as_ref() else {
            return Err(entry.invalid("aggregated"));
        };
        let object = json!({
            "recordHash": entry.record_hash,
            "entity": updated.entity,
            "role": updated.role,
            "sequence": updated.sequence,
            "snapshot": updated.snapshot,
        });
        let hash = self
            .append(TOPIC_TENSOR_AGGREGATED, object, Some(&entry.head))
            .await
            .inspect_err(|_| entry.stalled = true)?;
        entry.head = hash;
        entry.state = ActionState::Aggregated;
        tracing::info!(sequence = updated.sequence, "tensor aggregated");
        Ok(())
    }

    /// End an action whose finalized delta the aggregator refused. The
    /// tensors are untouched and the pair's ticket is already consumed.
    async fn refuse_delta(
        &self,
        entry: &mut ActionEntry,
        refusal: EngineError,
    ) -> Result<(), EngineError> {
        tracing::warn!(error = %refusal, "finalized delta refused by aggregator");
        let (delta_hash, required, attested) = match entry.finalized.as_ref() {
            Some(f) => (f.delta_hash().to_string(), f.required(), f.attested()),
            None => return Err(entry.invalid("finalized")),
        };
        let object = json!({
            "recordHash": entry.record_hash,
            "code": ErrorKind::WitnessDeficit.code(),
            "deltaHash": delta_hash,
            "required": required,
            "attested": attested,
            "refused": refusal.to_string(),
        });
        let hash = self
            .append(TOPIC_REPUTATION_DEFICIT, object, Some(&entry.head))
            .await
            .inspect_err(|_| entry.stalled = true)?;
        entry.head = hash;
        entry.state = ActionState::WitnessDeficit;
        Ok(())
    }
}
