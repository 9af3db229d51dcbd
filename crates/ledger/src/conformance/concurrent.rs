use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use super::{object, TestResult};
use crate::Ledger;

/// Number of concurrent appenders.
const N: u64 = 16;

pub(super) async fn run_concurrent_tests<L, F, Fut>(factory: &F) -> Vec<TestResult>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    vec![TestResult::from_result(
        "concurrent",
        "concurrent_appends_all_land_with_dense_heights",
        concurrent_appends_all_land_with_dense_heights(factory).await,
    )]
}

/// N tasks append at once. Every append must succeed and the resulting
/// heights must be exactly 0..N with no gaps or repeats.
async fn concurrent_appends_all_land_with_dense_heights<L, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = Arc::new(factory().await);

    let mut handles = Vec::new();
    for i in 0..N {
        let l = ledger.clone();
        handles.push(tokio::spawn(async move {
            l.append(object(i), "r7.concurrent", None).await
        }));
    }

    let mut hashes = HashSet::new();
    for handle in handles {
        let hash = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("append: {e}"))?;
        hashes.insert(hash);
    }
    if hashes.len() != N as usize {
        return Err(format!("expected {N} distinct hashes, got {}", hashes.len()));
    }

    let events = ledger
        .events("r7.concurrent", 0)
        .await
        .map_err(|e| format!("events: {e}"))?;
    let heights: Vec<u64> = events.iter().map(|e| e.height).collect();
    let expected: Vec<u64> = (0..N).collect();
    if heights == expected {
        Ok(())
    } else {
        Err(format!("heights not dense: {:?}", heights))
    }
}
