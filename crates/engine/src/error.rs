//! Error taxonomy for the pipeline.
//!
//! [`ErrorKind`] carries the stable machine codes returned to callers.
//! Admission failures are plain data ([`AdmissionError`]); execution and
//! settlement failures become part of the action's Result instead of
//! escaping as errors. [`EngineError`] is reserved for conditions that
//! stop the pipeline itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use r7_ledger::LedgerError;

/// Failure kinds with stable machine-readable codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RuleViolation,
    RoleUnauthorized,
    RequestMalformed,
    ReferenceInvalid,
    ResourceInsufficient,
    ResultInvalid,
    ReputationComputationError,
    WitnessDeficit,
    LedgerWriteFailure,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::RuleViolation => "ERR_RULE_VIOLATION",
            ErrorKind::RoleUnauthorized => "ERR_ROLE_UNAUTHORIZED",
            ErrorKind::RequestMalformed => "ERR_REQUEST_MALFORMED",
            ErrorKind::ReferenceInvalid => "ERR_REFERENCE_INVALID",
            ErrorKind::ResourceInsufficient => "ERR_RESOURCE_INSUFFICIENT",
            ErrorKind::ResultInvalid => "ERR_RESULT_INVALID",
            ErrorKind::ReputationComputationError => "ERR_REPUTATION_COMPUTATION",
            ErrorKind::WitnessDeficit => "ERR_WITNESS_DEFICIT",
            ErrorKind::LedgerWriteFailure => "ERR_LEDGER_WRITE",
        }
    }

    /// Admission kinds stop an action before execution and are returned
    /// directly to the caller.
    pub fn is_admission(self) -> bool {
        matches!(
            self,
            ErrorKind::RuleViolation
                | ErrorKind::RoleUnauthorized
                | ErrorKind::RequestMalformed
                | ErrorKind::ReferenceInvalid
                | ErrorKind::ResourceInsufficient
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An action was refused admission. No escrow exists and nothing executed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct AdmissionError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl AdmissionError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        AdmissionError {
            kind,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

/// Conditions that stop the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Retries against the ledger were exhausted. The action stays in its
    /// current state (escrow locked) until an operator resumes it.
    #[error("ERR_LEDGER_WRITE: ledger append to '{topic}' failed after {attempts} attempt(s): {source}")]
    LedgerStall {
        topic: String,
        attempts: u32,
        #[source]
        source: LedgerError,
    },

    /// A non-retryable ledger error.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown action: {record_hash}")]
    UnknownAction { record_hash: String },

    #[error("action {record_hash} is {actual}, expected {expected}")]
    InvalidState {
        record_hash: String,
        actual: String,
        expected: String,
    },

    #[error("unknown escrow: {escrow_id}")]
    UnknownEscrow { escrow_id: String },

    /// A settlement plan would create or destroy resource units.
    #[error("escrow {escrow_id} does not balance: {detail}")]
    Conservation { escrow_id: String, detail: String },

    /// A pricing schedule cannot price or split an amount.
    #[error("pricing error: {detail}")]
    Pricing { detail: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Machine code, for the errors that map onto the taxonomy.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            EngineError::Admission(e) => Some(e.code()),
            EngineError::LedgerStall { .. } | EngineError::Ledger(_) => {
                Some(ErrorKind::LedgerWriteFailure.code())
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_kinds() {
        assert!(ErrorKind::ResourceInsufficient.is_admission());
        assert!(ErrorKind::RequestMalformed.is_admission());
        assert!(!ErrorKind::ResultInvalid.is_admission());
        assert!(!ErrorKind::WitnessDeficit.is_admission());
    }

    #[test]
    fn admission_error_display_leads_with_code() {
        let e = AdmissionError::new(ErrorKind::RuleViolation, "rule 'no_delete' matched");
        assert_eq!(e.to_string(), "ERR_RULE_VIOLATION: rule 'no_delete' matched");
    }

    #[test]
    fn stall_maps_to_ledger_write_code() {
        let e = EngineError::LedgerStall {
            topic: "r7.settlement".into(),
            attempts: 5,
            source: LedgerError::Unavailable("down".into()),
        };
        assert_eq!(e.code(), Some("ERR_LEDGER_WRITE"));
        assert!(e.to_string().starts_with("ERR_LEDGER_WRITE"));
    }
}
