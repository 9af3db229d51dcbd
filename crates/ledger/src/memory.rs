//! In-process ledger backed by a vector of hash-chained records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::LedgerError;
use crate::proof::{merkle_path, merkle_root};
use crate::record::{topic_matches, InclusionProof, LedgerEvent, LedgerRecord};
use crate::traits::Ledger;

#[derive(Default)]
struct Inner {
    records: Vec<LedgerRecord>,
    by_hash: HashMap<String, usize>,
}

/// In-memory [`Ledger`].
///
/// Supports failure injection so callers can exercise their retry and
/// rollback paths: [`MemoryLedger::fail_next_appends`] makes the next N
/// appends fail with `Unavailable`, [`MemoryLedger::set_unavailable`]
/// makes every append fail until cleared.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
    pending_failures: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_appends(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record in height order.
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn injected_failure(&self) -> Option<LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Some(LedgerError::Unavailable("ledger marked unavailable".into()));
        }
        let took = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        took.ok()
            .map(|_| LedgerError::Unavailable("injected append failure".into()))
    }
}

fn record_hash(
    height: u64,
    topic: &str,
    parent_hash: Option<&str>,
    object: &serde_json::Value,
) -> Result<String, LedgerError> {
    let canonical = serde_json::json!({
        "height": height,
        "topic": topic,
        "parent": parent_hash,
        "object": object,
    });
    let bytes = serde_json::to_vec(&canonical).map_err(|e| LedgerError::Backend(e.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(
        &self,
        object: serde_json::Value,
        topic: &str,
        parent_hash: Option<&str>,
    ) -> Result<String, LedgerError> {
        if let Some(err) = self.injected_failure() {
            tracing::debug!(topic, "memory ledger rejecting append: {err}");
            return Err(err);
        }

        let mut inner = self.lock();
        if let Some(parent) = parent_hash {
            if !inner.by_hash.contains_key(parent) {
                return Err(LedgerError::ParentNotFound {
                    parent: parent.to_string(),
                });
            }
        }

        let index = inner.records.len();
        let height = index as u64;
        let hash = record_hash(height, topic, parent_hash, &object)?;
        let recorded_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();

        inner.by_hash.insert(hash.clone(), index);
        inner.records.push(LedgerRecord {
            hash: hash.clone(),
            height,
            topic: topic.to_string(),
            parent_hash: parent_hash.map(str::to_string),
            object,
            recorded_at,
        });
        Ok(hash)
    }

    async fn get(&self, hash: &str) -> Result<LedgerRecord, LedgerError> {
        let inner = self.lock();
        inner
            .by_hash
            .get(hash)
            .and_then(|&i| inner.records.get(i))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound {
                hash: hash.to_string(),
            })
    }

    async fn prove(&self, hash: &str) -> Result<InclusionProof, LedgerError> {
        let inner = self.lock();
        let index = *inner.by_hash.get(hash).ok_or_else(|| LedgerError::NotFound {
            hash: hash.to_string(),
        })?;
        let leaves: Vec<String> = inner.records.iter().map(|r| r.hash.clone()).collect();
        Ok(InclusionProof {
            record_hash: hash.to_string(),
            height: index as u64,
            root: merkle_root(&leaves),
            path: merkle_path(&leaves, index),
        })
    }

    async fn events(
        &self,
        topic_pattern: &str,
        since_height: u64,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let inner = self.lock();
        Ok(inner
            .records
            .iter()
            .skip(since_height as usize)
            .filter(|r| topic_matches(topic_pattern, &r.topic))
            .map(LedgerEvent::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let ledger = MemoryLedger::new();
        ledger.fail_next_appends(2);
        for _ in 0..2 {
            let err = ledger
                .append(serde_json::json!({}), "t", None)
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        assert!(ledger.append(serde_json::json!({}), "t", None).await.is_ok());
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn unavailable_blocks_until_cleared() {
        let ledger = MemoryLedger::new();
        ledger.set_unavailable(true);
        assert!(ledger.append(serde_json::json!(1), "t", None).await.is_err());
        assert!(ledger.is_empty());
        ledger.set_unavailable(false);
        assert!(ledger.append(serde_json::json!(1), "t", None).await.is_ok());
    }

    #[tokio::test]
    async fn identical_objects_get_distinct_hashes() {
        let ledger = MemoryLedger::new();
        let a = ledger.append(serde_json::json!({"x": 1}), "t", None).await.unwrap();
        let b = ledger.append(serde_json::json!({"x": 1}), "t", None).await.unwrap();
        assert_ne!(a, b);
    }
}
