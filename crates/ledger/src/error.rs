/// All errors that can be returned by a [`crate::Ledger`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// No record with the given hash.
    #[error("ledger record not found: {hash}")]
    NotFound { hash: String },

    /// `append` named a parent hash that is not in the ledger.
    #[error("parent record not found: {parent}")]
    ParentNotFound { parent: String },

    /// The ledger service is temporarily unreachable. Callers may retry.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// A backend-specific, non-retryable error (serialization, corruption).
    #[error("ledger backend error: {0}")]
    Backend(String),
}

impl LedgerError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}
