//! Action Validator.
//!
//! Admission runs a fixed sequence of checks and stops at the first
//! failure:
//!
//! 0. Structure and replay: required fields present, amounts non-negative,
//!    (actor, nonce) never seen before.
//! 1. Role pairing exists, is live, and permits the action.
//! 2. Admission rules of the referenced rule set pass.
//! 3. Declared resources fit the actor's balance and the role/grant caps.
//! 4. Every cited precedent, attestation, grant, witness and the pricing
//!    reference resolves and is unrevoked.
//!
//! The escrow locks the declared caps priced with the schedule in force,
//! and never less than the declared work. Metering never lets consumption
//! pass the caps, so a successful action's cost is always covered.
//!
//! Only after all checks pass is the escrow locked. A rejected record
//! never holds resources.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use r7_interchange::{ActionRecord, Dimension};
use r7_ledger::{Ledger, LedgerError};

use crate::clock::Clock;
use crate::directory::{ReferenceStatus, RoleDirectory, RolePairing};
use crate::error::{AdmissionError, ErrorKind};
use crate::rules::{evaluate_admission, RuleSetResolver};
use crate::settlement::{PricingOracle, PricingSchedule, ResourcePool};

/// Proof of admission: binds a record hash to its escrow and to the
/// pricing in force at request time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationToken {
    pub record_hash: String,
    pub escrow_id: String,
    pub escrow_amount: Decimal,
    pub rules_hash: String,
    pub pricing: PricingSchedule,
    /// The role's capability set, carried to execution.
    pub capabilities: BTreeSet<String>,
    /// Admission rules whose triggers matched.
    pub admission_rules: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub validated_at: OffsetDateTime,
}

pub struct ActionValidator {
    directory: Arc<dyn RoleDirectory>,
    rules: Arc<dyn RuleSetResolver>,
    pricing: Arc<dyn PricingOracle>,
    pool: Arc<ResourcePool>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    escrow_ttl: time::Duration,
    nonces: Mutex<HashSet<(String, String)>>,
}

fn malformed(detail: impl Into<String>) -> AdmissionError {
    AdmissionError::new(ErrorKind::RequestMalformed, detail)
}

impl ActionValidator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: Arc<dyn RoleDirectory>,
        rules: Arc<dyn RuleSetResolver>,
        pricing: Arc<dyn PricingOracle>,
        pool: Arc<ResourcePool>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        escrow_ttl: time::Duration,
    ) -> Self {
        ActionValidator {
            directory,
            rules,
            pricing,
            pool,
            ledger,
            clock,
            escrow_ttl,
            nonces: Mutex::new(HashSet::new()),
        }
    }

    /// Validate a record and lock its escrow.
    pub async fn validate(&self, record: &ActionRecord) -> Result<ValidationToken, AdmissionError> {
        check_structure(record)?;
        let record_hash = record
            .content_hash()
            .map_err(|e| malformed(format!("record cannot be hashed: {e}")))?;

        let nonce_key = (record.role.actor.clone(), record.request.nonce.clone());
        if !self.nonces().insert(nonce_key.clone()) {
            return Err(malformed(format!(
                "nonce '{}' already used by {}",
                nonce_key.1, nonce_key.0
            )));
        }

        let admitted = self.admit(record, &record_hash).await;
        if admitted.is_err() {
            // A rejected attempt does not burn the nonce.
            self.nonces().remove(&nonce_key);
        }
        admitted
    }

    fn nonces(&self) -> std::sync::MutexGuard<'_, HashSet<(String, String)>> {
        self.nonces.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn admit(
        &self,
        record: &ActionRecord,
        record_hash: &str,
    ) -> Result<ValidationToken, AdmissionError> {
        let now = self.clock.now();

        let pairing = self.check_role(record, now)?;

        let rule_set = self.rules.resolve(&record.rules_hash).ok_or_else(|| {
            AdmissionError::new(
                ErrorKind::ReferenceInvalid,
                format!("rule set '{}' does not resolve", record.rules_hash),
            )
        })?;
        let triggered = evaluate_admission(&rule_set, record)?;

        self.check_resources(record, &pairing, now)?;

        let pricing = self.check_references(record, now).await?;

        let escrow = self.pool.lock(
            &record.role.actor,
            escrow_amount(record, &pricing),
            record_hash,
            record.resource.escrow_id.as_deref(),
            now,
            self.escrow_ttl,
        )?;

        Ok(ValidationToken {
            record_hash: record_hash.to_string(),
            escrow_id: escrow.id,
            escrow_amount: escrow.amount,
            rules_hash: record.rules_hash.clone(),
            pricing,
            capabilities: pairing.capabilities,
            admission_rules: triggered.into_iter().map(|t| t.rule_id).collect(),
            validated_at: now,
        })
    }

    fn check_role(&self, record: &ActionRecord, now: OffsetDateTime) -> Result<RolePairing, AdmissionError> {
        let role = &record.role;
        let unauthorized = |detail: String| AdmissionError::new(ErrorKind::RoleUnauthorized, detail);

        let pairing = self
            .directory
            .role_pairing(&role.actor, &role.role_ref)
            .ok_or_else(|| unauthorized(format!("{} holds no role {}", role.actor, role.role_ref)))?;
        if pairing.role_type != role.role_type {
            return Err(unauthorized(format!(
                "role {} is a '{}' role, not '{}'",
                role.role_ref, pairing.role_type, role.role_type
            )));
        }
        if pairing.revoked {
            return Err(unauthorized(format!("role {} is revoked", role.role_ref)));
        }
        if !pairing.is_live(now) {
            return Err(unauthorized(format!("role {} has expired", role.role_ref)));
        }
        if !pairing.permits(&record.request.action) {
            return Err(unauthorized(format!(
                "role {} does not permit '{}'",
                role.role_ref, record.request.action
            )));
        }
        Ok(pairing)
    }

    fn check_resources(
        &self,
        record: &ActionRecord,
        pairing: &RolePairing,
        now: OffsetDateTime,
    ) -> Result<(), AdmissionError> {
        let required = &record.resource.required;
        let insufficient = |detail: String| AdmissionError::new(ErrorKind::ResourceInsufficient, detail);

        let available = self.pool.balance(&record.role.actor);
        if required.work > available {
            return Err(insufficient(format!(
                "{} has {} available, {} required",
                record.role.actor, available, required.work
            )));
        }

        for (kind, amount) in required.declared() {
            if let Some(cap) = pairing.caps.get(&kind) {
                if amount > *cap {
                    return Err(insufficient(format!(
                        "{kind} {amount} exceeds role cap {cap}"
                    )));
                }
            }
            // Grants that do not resolve are reported by the reference check.
            for grant_id in &record.reference.grants {
                let Some(grant) = self.directory.grant(grant_id) else {
                    continue;
                };
                if !grant.is_live(now) {
                    continue;
                }
                if let Some(cap) = grant.caps.get(&kind) {
                    if amount > *cap {
                        return Err(insufficient(format!(
                            "{kind} {amount} exceeds cap {cap} of grant {grant_id}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    async fn check_references(
        &self,
        record: &ActionRecord,
        now: OffsetDateTime,
    ) -> Result<PricingSchedule, AdmissionError> {
        let invalid = |detail: String| AdmissionError::new(ErrorKind::ReferenceInvalid, detail);
        let reference = &record.reference;

        for cited in reference.precedents.iter().chain(&reference.prior_attestations) {
            match self.directory.reference_status(cited) {
                ReferenceStatus::Valid => {}
                ReferenceStatus::Revoked => {
                    return Err(invalid(format!("reference {cited} is revoked")));
                }
                ReferenceStatus::Unknown => match self.ledger.get(cited).await {
                    Ok(_) => {}
                    Err(LedgerError::NotFound { .. }) => {
                        return Err(invalid(format!("reference {cited} does not resolve")));
                    }
                    Err(e) => {
                        return Err(invalid(format!("reference {cited} could not be resolved: {e}")));
                    }
                },
            }
        }

        for grant_id in &reference.grants {
            let grant = self
                .directory
                .grant(grant_id)
                .ok_or_else(|| invalid(format!("grant {grant_id} does not resolve")))?;
            if grant.holder != record.role.actor {
                return Err(invalid(format!(
                    "grant {grant_id} is held by {}, not {}",
                    grant.holder, record.role.actor
                )));
            }
            if !grant.is_live(now) {
                return Err(invalid(format!("grant {grant_id} is revoked or expired")));
            }
        }

        for witness in &reference.witnesses {
            if !self.directory.witness_in_good_standing(witness) {
                return Err(invalid(format!("witness {witness} is unknown or revoked")));
            }
        }

        self.pricing
            .schedule(&record.resource.pricing_ref)
            .ok_or_else(|| invalid(format!("pricing {} does not resolve", record.resource.pricing_ref)))
    }
}

/// Work tokens to lock: the priced declared caps, at least the declared work.
fn escrow_amount(record: &ActionRecord, pricing: &PricingSchedule) -> Decimal {
    let required = &record.resource.required;
    pricing.cost(required).max(required.work)
}

fn check_structure(record: &ActionRecord) -> Result<(), AdmissionError> {
    let required_fields = [
        ("rulesHash", record.rules_hash.as_str()),
        ("role.actor", record.role.actor.as_str()),
        ("role.roleType", record.role.role_type.as_str()),
        ("role.roleRef", record.role.role_ref.as_str()),
        ("request.action", record.request.action.as_str()),
        ("request.nonce", record.request.nonce.as_str()),
        ("resource.pricingRef", record.resource.pricing_ref.as_str()),
    ];
    for (name, value) in required_fields {
        if value.trim().is_empty() {
            return Err(malformed(format!("{name} must not be empty")));
        }
    }
    if record.request.resource_stake < Decimal::ZERO {
        return Err(malformed("request.resourceStake must not be negative"));
    }
    for (kind, amount) in record.resource.required.declared() {
        if amount < Decimal::ZERO {
            return Err(malformed(format!("resource.required.{kind} must not be negative")));
        }
    }
    if matches!(record.resource.escrow_id.as_deref(), Some(id) if id.trim().is_empty()) {
        return Err(malformed("resource.escrowId must not be empty when present"));
    }
    for dim in Dimension::ALL {
        let value = record.role.trust_snapshot.value(dim);
        if dim.clamp(value) != value {
            return Err(malformed(format!(
                "role.trustSnapshot.{dim} = {value} is outside its domain"
            )));
        }
    }
    Ok(())
}
