use std::collections::HashSet;
use std::future::Future;

use super::{object, TestResult};
use crate::{Ledger, LedgerError};

pub(super) async fn run_append_tests<L, F, Fut>(factory: &F) -> Vec<TestResult>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    vec![
        TestResult::from_result(
            "append",
            "append_returns_unique_hashes",
            append_returns_unique_hashes(factory).await,
        ),
        TestResult::from_result(
            "append",
            "append_assigns_dense_heights",
            append_assigns_dense_heights(factory).await,
        ),
        TestResult::from_result(
            "append",
            "append_with_known_parent_links",
            append_with_known_parent_links(factory).await,
        ),
        TestResult::from_result(
            "append",
            "append_with_unknown_parent_fails",
            append_with_unknown_parent_fails(factory).await,
        ),
    ]
}

async fn append_returns_unique_hashes<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    let mut seen = HashSet::new();
    for _ in 0..5 {
        // Same object every time; the ledger position must still make it unique.
        let hash = ledger
            .append(object(0), "r7.test", None)
            .await
            .map_err(|e| format!("append: {e}"))?;
        if !seen.insert(hash.clone()) {
            return Err(format!("duplicate record hash {hash}"));
        }
    }
    Ok(())
}

async fn append_assigns_dense_heights<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    for n in 0..4u64 {
        let hash = ledger
            .append(object(n), "r7.test", None)
            .await
            .map_err(|e| format!("append: {e}"))?;
        let record = ledger.get(&hash).await.map_err(|e| format!("get: {e}"))?;
        if record.height != n {
            return Err(format!("expected height {n}, got {}", record.height));
        }
    }
    Ok(())
}

async fn append_with_known_parent_links<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    let parent = ledger
        .append(object(1), "r7.submitted", None)
        .await
        .map_err(|e| format!("append parent: {e}"))?;
    let child = ledger
        .append(object(2), "r7.validated", Some(&parent))
        .await
        .map_err(|e| format!("append child: {e}"))?;
    let record = ledger.get(&child).await.map_err(|e| format!("get: {e}"))?;
    match record.parent_hash.as_deref() {
        Some(p) if p == parent => Ok(()),
        other => Err(format!("expected parent {parent}, got {:?}", other)),
    }
}

async fn append_with_unknown_parent_fails<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    match ledger.append(object(1), "r7.test", Some("missing")).await {
        Err(LedgerError::ParentNotFound { parent }) if parent == "missing" => {}
        other => return Err(format!("expected ParentNotFound, got {:?}", other)),
    }
    // The rejected append must not leave a record behind.
    let events = ledger
        .events("*", 0)
        .await
        .map_err(|e| format!("events: {e}"))?;
    if events.is_empty() {
        Ok(())
    } else {
        Err(format!("rejected append left {} record(s)", events.len()))
    }
}
