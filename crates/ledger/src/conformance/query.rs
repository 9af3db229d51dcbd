use std::future::Future;

use super::{object, TestResult};
use crate::{Ledger, LedgerError};

pub(super) async fn run_query_tests<L, F, Fut>(factory: &F) -> Vec<TestResult>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    vec![
        TestResult::from_result(
            "query",
            "get_returns_appended_object",
            get_returns_appended_object(factory).await,
        ),
        TestResult::from_result(
            "query",
            "get_unknown_is_not_found",
            get_unknown_is_not_found(factory).await,
        ),
    ]
}

async fn get_returns_appended_object<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    let hash = ledger
        .append(object(7), "r7.result", None)
        .await
        .map_err(|e| format!("append: {e}"))?;
    let record = ledger.get(&hash).await.map_err(|e| format!("get: {e}"))?;
    if record.object != object(7) {
        return Err(format!("object mismatch: {}", record.object));
    }
    if record.topic != "r7.result" {
        return Err(format!("topic mismatch: {}", record.topic));
    }
    if record.hash != hash {
        return Err(format!("hash mismatch: {} vs {}", record.hash, hash));
    }
    Ok(())
}

async fn get_unknown_is_not_found<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    match ledger.get("nope").await {
        Err(LedgerError::NotFound { hash }) if hash == "nope" => Ok(()),
        other => Err(format!("expected NotFound, got {:?}", other)),
    }
}
