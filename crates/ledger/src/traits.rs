use async_trait::async_trait;

use crate::error::LedgerError;
use crate::record::{InclusionProof, LedgerEvent, LedgerRecord};

/// The append-only ledger the pipeline writes every stage transition to.
///
/// ## Chaining
///
/// `append` takes an optional parent hash. When given, the parent must
/// already be in the ledger (`LedgerError::ParentNotFound` otherwise). The
/// pipeline chains each stage record to the previous one for the same
/// action, starting from the submission record.
///
/// ## Failure model
///
/// Implementations report temporary unavailability as
/// `LedgerError::Unavailable`; callers retry those with backoff. A failed
/// `append` must not leave a record behind.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so a single ledger can
/// be shared across concurrently processed actions.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Append an object under a topic and return its record hash.
    async fn append(
        &self,
        object: serde_json::Value,
        topic: &str,
        parent_hash: Option<&str>,
    ) -> Result<String, LedgerError>;

    /// Read a record by hash.
    ///
    /// Returns `Err(LedgerError::NotFound)` if the hash is unknown.
    async fn get(&self, hash: &str) -> Result<LedgerRecord, LedgerError>;

    /// Produce an inclusion proof for a record against the current root.
    async fn prove(&self, hash: &str) -> Result<InclusionProof, LedgerError>;

    /// Events whose topic matches `topic_pattern` at height `>= since_height`,
    /// in height order. Callers page by passing the last seen height + 1.
    async fn events(
        &self,
        topic_pattern: &str,
        since_height: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError>;
}
