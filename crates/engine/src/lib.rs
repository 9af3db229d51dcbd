//! r7-engine: the R7 action pipeline.
//!
//! An action moves through six stages:
//!
//! ```text
//! Action Record → Validator → Execution Meter → Settlement
//!               → Reputation Engine → Witness Coordinator → Tensor Aggregator
//! ```
//!
//! Every stage appends its outcome to the [`r7_ledger::Ledger`], chained to
//! the previous stage's record by parent hash. [`Engine`] owns the stages
//! and drives one action at a time through them; concurrent actions only
//! meet at the resource pool and the tensor aggregator, both of which
//! serialize their own updates.

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod meter;
pub mod pipeline;
pub mod predicate;
pub mod provenance;
pub mod reputation;
pub mod retry;
pub mod rules;
pub mod settlement;
pub mod tensor;
pub mod validator;
pub mod witness;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    EngineConfig, ExecutionConfig, ReputationConfig, RetryConfig, SettlementConfig, TensorConfig,
    WitnessConfig, WitnessFallback,
};
pub use directory::{Grant, MemoryDirectory, ReferenceStatus, RoleDirectory, RolePairing};
pub use error::{AdmissionError, EngineError, ErrorKind};
pub use meter::{Effector, ExecutionFault, ExecutionMeter, Meter, ScriptedEffector};
pub use pipeline::{ActionOutcome, ActionState, Engine, EngineBuilder, WitnessSummary};
pub use reputation::ReputationEngine;
pub use rules::{RuleRegistry, RuleSetResolver, TriggeredRule};
pub use settlement::{
    Escrow, EscrowState, PricingOracle, PricingSchedule, ProviderShare, ReleaseCondition,
    ResourcePool, SettlementOutcome, SettlementPlan, StaticPricing, Transfer,
};
pub use tensor::{ApplyTicket, PairCounters, TensorAggregator, TensorEntry, UpdatedTensor};
pub use validator::{ActionValidator, ValidationToken};
pub use witness::{
    FinalizedDelta, MemoryWitnessNetwork, WitnessBehavior, WitnessCandidate, WitnessCoordinator,
    WitnessDecision, WitnessNetwork, WitnessRequirements, WitnessStatus,
};

#[cfg(test)]
pub(crate) mod testutil {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use r7_interchange::{
        ActionRecord, ActionResult, Reference, Request, ResourceAmounts, ResourceDeclaration,
        ResultError, ResultStatus, RoleContext, TensorSnapshot,
    };

    use crate::meter::output_of;

    pub fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// A record by `lct:alice` in the analyst role requiring `work` tokens
    /// and staking the same amount.
    pub fn record(action: &str, work: &str) -> ActionRecord {
        ActionRecord {
            rules_hash: "rules".into(),
            role: RoleContext {
                actor: "lct:alice".into(),
                role_type: "analyst".into(),
                role_ref: "role:analyst".into(),
                trust_snapshot: TensorSnapshot::default(),
            },
            request: Request {
                action: action.into(),
                target: "dataset:1".into(),
                parameters: Default::default(),
                constraints: Default::default(),
                resource_stake: dec(work),
                nonce: "n-1".into(),
            },
            reference: Reference::default(),
            resource: ResourceDeclaration {
                required: ResourceAmounts::work(dec(work)),
                pricing_ref: "pricing:default".into(),
                escrow_id: None,
            },
        }
    }

    fn result(rec: &ActionRecord, status: ResultStatus, consumed: &str) -> ActionResult {
        ActionResult {
            action_ref: rec.content_hash().unwrap(),
            status,
            output: output_of(serde_json::json!({ "score": 0.9 })),
            resource_consumed: ResourceAmounts::work(dec(consumed)),
            error: (status != ResultStatus::Success).then(|| ResultError {
                code: "ERR_EXECUTION_FAULT".into(),
                message: "failed".into(),
            }),
            elapsed_ms: 5,
            ledger_proof: None,
        }
    }

    pub fn success_result(rec: &ActionRecord, consumed: &str) -> ActionResult {
        result(rec, ResultStatus::Success, consumed)
    }

    pub fn failure_result(rec: &ActionRecord, consumed: &str) -> ActionResult {
        result(rec, ResultStatus::Failure, consumed)
    }
}
