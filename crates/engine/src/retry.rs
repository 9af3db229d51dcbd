//! Ledger appends with retry and exponential backoff.

use r7_ledger::Ledger;

use crate::config::RetryConfig;
use crate::error::EngineError;

/// Append `object` under `topic`, retrying transient failures.
///
/// Non-transient errors return immediately. When every attempt fails the
/// caller gets [`EngineError::LedgerStall`] and must leave its own state
/// as it was before the append.
pub async fn append_with_retry(
    ledger: &dyn Ledger,
    retry: &RetryConfig,
    topic: &str,
    object: serde_json::Value,
    parent_hash: Option<&str>,
) -> Result<String, EngineError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match ledger.append(object.clone(), topic, parent_hash).await {
            Ok(hash) => {
                if attempt > 1 {
                    tracing::info!(topic, attempt, "ledger append succeeded after retry");
                }
                return Ok(hash);
            }
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                let wait = retry.backoff(attempt);
                tracing::warn!(
                    topic,
                    attempt,
                    backoff_ms = wait.as_millis() as u64,
                    "ledger append failed, retrying: {e}"
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) if e.is_transient() => {
                tracing::error!(topic, attempts = attempt, "ledger append retries exhausted: {e}");
                return Err(EngineError::LedgerStall {
                    topic: topic.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) => return Err(EngineError::Ledger(e)),
        }
    }
}
