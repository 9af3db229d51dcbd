//! Settlement Processor and the resource pool it owns.
//!
//! The [`ResourcePool`] holds every account balance and every escrow
//! behind one lock, so debits and credits are serialized and the pool's
//! total supply never changes. Settlement is two-phase:
//!
//! 1. Mark the escrow `Settling` and compute the plan.
//! 2. Append the settlement record to the ledger (with retry).
//! 3. On success, apply the plan's transfers and refund in one step.
//!    On failure, put the escrow back to `Locked` so nothing moved.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use r7_interchange::{ActionResult, ResourceAmounts, ResourceKind};
use r7_ledger::Ledger;

use crate::config::RetryConfig;
use crate::error::{AdmissionError, EngineError, ErrorKind};
use crate::retry::append_with_retry;
use crate::validator::ValidationToken;

pub const TOPIC_SETTLEMENT: &str = "r7.settlement";

// ── Pricing ─────────────────────────────────────────────────────────

/// A provider's share of settled cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderShare {
    pub account: String,
    pub share: Decimal,
}

/// Prices and payees in force for one pricing reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSchedule {
    /// Work-token price per unit consumed. Kinds without a price are free.
    pub unit_prices: BTreeMap<ResourceKind, Decimal>,
    pub providers: Vec<ProviderShare>,
    /// Receives the forfeited part of a failed action's escrow.
    pub pool_account: String,
}

impl PricingSchedule {
    /// One work token per unit of work, all paid to `provider`.
    pub fn one_to_one(provider: &str, pool_account: &str) -> Self {
        PricingSchedule {
            unit_prices: BTreeMap::from([(ResourceKind::Work, Decimal::ONE)]),
            providers: vec![ProviderShare {
                account: provider.to_string(),
                share: Decimal::ONE,
            }],
            pool_account: pool_account.to_string(),
        }
    }

    pub fn cost(&self, consumed: &ResourceAmounts) -> Decimal {
        consumed
            .declared()
            .map(|(kind, amount)| {
                let price = self.unit_prices.get(&kind).copied().unwrap_or(Decimal::ZERO);
                amount.checked_mul(price).unwrap_or(Decimal::MAX)
            })
            .fold(Decimal::ZERO, |acc, c| acc.saturating_add(c))
    }

    /// Split `amount` across providers by share. The last provider takes
    /// the rounding remainder so the parts always sum to `amount`.
    fn split(&self, amount: Decimal) -> Result<Vec<Transfer>, EngineError> {
        if amount.is_zero() {
            return Ok(Vec::new());
        }
        let overflow = || EngineError::Pricing {
            detail: format!("provider shares overflow while splitting {amount}"),
        };
        let total_share = self
            .providers
            .iter()
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p.share))
            .ok_or_else(overflow)?;
        if self.providers.is_empty() || total_share <= Decimal::ZERO {
            return Ok(vec![Transfer {
                to: self.pool_account.clone(),
                amount,
            }]);
        }
        let mut transfers = Vec::with_capacity(self.providers.len());
        let mut remaining = amount;
        let last = self.providers.len() - 1;
        for (i, provider) in self.providers.iter().enumerate() {
            let part = if i == last {
                remaining
            } else {
                amount
                    .checked_mul(provider.share)
                    .and_then(|v| v.checked_div(total_share))
                    .ok_or_else(overflow)?
                    .round_dp(8)
                    .clamp(Decimal::ZERO, remaining)
            };
            remaining -= part;
            if !part.is_zero() {
                transfers.push(Transfer {
                    to: provider.account.clone(),
                    amount: part,
                });
            }
        }
        Ok(transfers)
    }
}

/// Resolves a `pricingRef` to the schedule in force.
pub trait PricingOracle: Send + Sync + 'static {
    fn schedule(&self, pricing_ref: &str) -> Option<PricingSchedule>;
}

/// In-memory [`PricingOracle`].
#[derive(Debug, Default)]
pub struct StaticPricing {
    schedules: RwLock<HashMap<String, PricingSchedule>>,
}

impl StaticPricing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pricing_ref: &str, schedule: PricingSchedule) {
        self.schedules
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(pricing_ref.to_string(), schedule);
    }
}

impl PricingOracle for StaticPricing {
    fn schedule(&self, pricing_ref: &str) -> Option<PricingSchedule> {
        self.schedules
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(pricing_ref)
            .cloned()
    }
}

// ── Resource pool ───────────────────────────────────────────────────

/// Why an escrow was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseCondition {
    Completed,
    Failed,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "condition", rename_all = "snake_case")]
pub enum EscrowState {
    Locked,
    Settling,
    Released(ReleaseCondition),
}

/// Work tokens locked for one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: String,
    pub owner: String,
    pub record_hash: String,
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub state: EscrowState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub to: String,
    pub amount: Decimal,
}

#[derive(Debug, Default)]
struct PoolInner {
    balances: BTreeMap<String, Decimal>,
    escrows: HashMap<String, Escrow>,
    next_id: u64,
}

impl PoolInner {
    fn credit(&mut self, account: &str, amount: Decimal) {
        *self.balances.entry(account.to_string()).or_default() += amount;
    }

    fn escrow_mut(&mut self, id: &str) -> Result<&mut Escrow, EngineError> {
        self.escrows.get_mut(id).ok_or_else(|| EngineError::UnknownEscrow {
            escrow_id: id.to_string(),
        })
    }
}

/// Account balances and escrows. The only component that mutates
/// balances.
#[derive(Debug, Default)]
pub struct ResourcePool {
    inner: Mutex<PoolInner>,
}

fn state_name(state: EscrowState) -> String {
    match state {
        EscrowState::Locked => "locked".into(),
        EscrowState::Settling => "settling".into(),
        EscrowState::Released(c) => format!("released ({c:?})").to_lowercase(),
    }
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn deposit(&self, account: &str, amount: Decimal) {
        self.lock_inner().credit(account, amount);
    }

    pub fn balance(&self, account: &str) -> Decimal {
        self.lock_inner()
            .balances
            .get(account)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of all balances plus all unreleased escrow.
    pub fn total_supply(&self) -> Decimal {
        let inner = self.lock_inner();
        let balances: Decimal = inner.balances.values().copied().sum();
        let escrowed: Decimal = inner
            .escrows
            .values()
            .filter(|e| !matches!(e.state, EscrowState::Released(_)))
            .map(|e| e.amount)
            .sum();
        balances + escrowed
    }

    pub fn escrow(&self, id: &str) -> Option<Escrow> {
        self.lock_inner().escrows.get(id).cloned()
    }

    /// Atomically debit `amount` from `owner` into a new escrow.
    pub fn lock(
        &self,
        owner: &str,
        amount: Decimal,
        record_hash: &str,
        requested_id: Option<&str>,
        now: OffsetDateTime,
        ttl: time::Duration,
    ) -> Result<Escrow, AdmissionError> {
        let mut inner = self.lock_inner();
        let available = inner.balances.get(owner).copied().unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(AdmissionError::new(
                ErrorKind::ResourceInsufficient,
                format!("{owner} has {available} available, {amount} required"),
            ));
        }
        let id = match requested_id {
            Some(id) if inner.escrows.contains_key(id) => {
                return Err(AdmissionError::new(
                    ErrorKind::RequestMalformed,
                    format!("escrow id '{id}' already in use"),
                ));
            }
            Some(id) => id.to_string(),
            None => {
                inner.next_id += 1;
                format!("escrow-{}", inner.next_id)
            }
        };
        inner.credit(owner, -amount);
        let escrow = Escrow {
            id: id.clone(),
            owner: owner.to_string(),
            record_hash: record_hash.to_string(),
            amount,
            created_at: now,
            expires_at: now + ttl,
            state: EscrowState::Locked,
        };
        inner.escrows.insert(id, escrow.clone());
        Ok(escrow)
    }

    /// `Locked` → `Settling`.
    pub fn begin_settlement(&self, id: &str) -> Result<Escrow, EngineError> {
        let mut inner = self.lock_inner();
        let escrow = inner.escrow_mut(id)?;
        if escrow.state != EscrowState::Locked {
            return Err(EngineError::InvalidState {
                record_hash: escrow.record_hash.clone(),
                actual: format!("escrow {}", state_name(escrow.state)),
                expected: "escrow locked".into(),
            });
        }
        escrow.state = EscrowState::Settling;
        Ok(escrow.clone())
    }

    /// `Settling` → `Locked`. Nothing has moved.
    pub fn abort_settlement(&self, id: &str) -> Result<(), EngineError> {
        let mut inner = self.lock_inner();
        let escrow = inner.escrow_mut(id)?;
        if escrow.state == EscrowState::Settling {
            escrow.state = EscrowState::Locked;
        }
        Ok(())
    }

    /// Apply a settlement plan to a `Settling` escrow.
    pub fn commit_settlement(&self, plan: &SettlementPlan) -> Result<(), EngineError> {
        let mut inner = self.lock_inner();
        let escrow = inner.escrow_mut(&plan.escrow_id)?;
        if escrow.state != EscrowState::Settling {
            return Err(EngineError::InvalidState {
                record_hash: escrow.record_hash.clone(),
                actual: format!("escrow {}", state_name(escrow.state)),
                expected: "escrow settling".into(),
            });
        }
        if plan.transferred() + plan.refunded != escrow.amount {
            return Err(EngineError::Conservation {
                escrow_id: plan.escrow_id.clone(),
                detail: format!(
                    "locked {} != transferred {} + refunded {}",
                    escrow.amount,
                    plan.transferred(),
                    plan.refunded
                ),
            });
        }
        escrow.state = EscrowState::Released(plan.condition);
        let owner = escrow.owner.clone();
        for t in &plan.transfers {
            inner.credit(&t.to, t.amount);
        }
        inner.credit(&owner, plan.refunded);
        Ok(())
    }

    /// Release a `Locked` escrow in full back to its owner.
    pub fn release(&self, id: &str, condition: ReleaseCondition) -> Result<Escrow, EngineError> {
        let mut inner = self.lock_inner();
        let escrow = inner.escrow_mut(id)?;
        if escrow.state != EscrowState::Locked {
            return Err(EngineError::InvalidState {
                record_hash: escrow.record_hash.clone(),
                actual: format!("escrow {}", state_name(escrow.state)),
                expected: "escrow locked".into(),
            });
        }
        escrow.state = EscrowState::Released(condition);
        let released = escrow.clone();
        inner.credit(&released.owner, released.amount);
        Ok(released)
    }
}

// ── Settlement ──────────────────────────────────────────────────────

/// How a locked escrow will be distributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementPlan {
    pub escrow_id: String,
    pub locked: Decimal,
    /// Priced cost of the metered consumption.
    pub cost: Decimal,
    pub transfers: Vec<Transfer>,
    pub refunded: Decimal,
    pub condition: ReleaseCondition,
}

impl SettlementPlan {
    pub fn transferred(&self) -> Decimal {
        self.transfers.iter().map(|t| t.amount).sum()
    }
}

/// Compute how to distribute an escrow given the execution outcome.
///
/// Success pays the full priced cost to the providers and refunds the
/// rest. Admission only locks escrows that cover the priced declared caps,
/// so a cost above the escrow is refused rather than underpaid. Failure
/// refunds `refund_fraction` of the escrow and sends the remainder to the
/// pool account.
pub fn plan_settlement(
    escrow: &Escrow,
    result: &ActionResult,
    schedule: &PricingSchedule,
    refund_fraction: Decimal,
) -> Result<SettlementPlan, EngineError> {
    let locked = escrow.amount;
    let cost = schedule.cost(&result.resource_consumed);
    if result.status.is_success() {
        if cost > locked {
            return Err(EngineError::Conservation {
                escrow_id: escrow.id.clone(),
                detail: format!("priced cost {cost} exceeds escrow {locked}"),
            });
        }
        Ok(SettlementPlan {
            escrow_id: escrow.id.clone(),
            locked,
            cost,
            transfers: schedule.split(cost)?,
            refunded: locked - cost,
            condition: ReleaseCondition::Completed,
        })
    } else {
        let refunded = locked
            .checked_mul(refund_fraction)
            .unwrap_or(locked)
            .clamp(Decimal::ZERO, locked);
        let forfeited = locked - refunded;
        let transfers = if forfeited.is_zero() {
            Vec::new()
        } else {
            vec![Transfer {
                to: schedule.pool_account.clone(),
                amount: forfeited,
            }]
        };
        Ok(SettlementPlan {
            escrow_id: escrow.id.clone(),
            locked,
            cost,
            transfers,
            refunded,
            condition: ReleaseCondition::Failed,
        })
    }
}

/// A completed settlement, as written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub record_hash: String,
    #[serde(flatten)]
    pub plan: SettlementPlan,
    pub transferred: Decimal,
    /// Hash of the settlement's ledger record. Empty in the object written
    /// to the ledger.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ledger_hash: String,
}

/// Settles executed actions against the resource pool.
pub struct SettlementProcessor {
    pool: Arc<ResourcePool>,
    ledger: Arc<dyn Ledger>,
    retry: RetryConfig,
    refund_fraction: Decimal,
}

impl SettlementProcessor {
    pub fn new(
        pool: Arc<ResourcePool>,
        ledger: Arc<dyn Ledger>,
        retry: RetryConfig,
        refund_fraction: Decimal,
    ) -> Self {
        SettlementProcessor {
            pool,
            ledger,
            retry,
            refund_fraction,
        }
    }

    /// Settle one executed action.
    ///
    /// On [`EngineError::LedgerStall`] the escrow is back in `Locked` and
    /// the call may be repeated.
    pub async fn settle(
        &self,
        result: &ActionResult,
        token: &ValidationToken,
        parent_hash: Option<&str>,
    ) -> Result<SettlementOutcome, EngineError> {
        let escrow = self.pool.begin_settlement(&token.escrow_id)?;
        let plan = match plan_settlement(&escrow, result, &token.pricing, self.refund_fraction) {
            Ok(plan) => plan,
            Err(e) => {
                self.pool.abort_settlement(&token.escrow_id)?;
                return Err(e);
            }
        };
        let mut outcome = SettlementOutcome {
            record_hash: token.record_hash.clone(),
            transferred: plan.transferred(),
            plan,
            ledger_hash: String::new(),
        };

        let object = match serde_json::to_value(&outcome) {
            Ok(v) => v,
            Err(e) => {
                self.pool.abort_settlement(&token.escrow_id)?;
                return Err(e.into());
            }
        };
        match append_with_retry(
            self.ledger.as_ref(),
            &self.retry,
            TOPIC_SETTLEMENT,
            object,
            parent_hash,
        )
        .await
        {
            Ok(hash) => {
                self.pool.commit_settlement(&outcome.plan)?;
                tracing::debug!(
                    escrow = %outcome.plan.escrow_id,
                    transferred = %outcome.transferred,
                    refunded = %outcome.plan.refunded,
                    "settlement committed"
                );
                outcome.ledger_hash = hash;
                Ok(outcome)
            }
            Err(e) => {
                self.pool.abort_settlement(&token.escrow_id)?;
                tracing::error!(escrow = %token.escrow_id, "settlement rolled back: {e}");
                Err(e)
            }
        }
    }
}
