use std::future::Future;

use super::{object, TestResult};
use crate::Ledger;

pub(super) async fn run_events_tests<L, F, Fut>(factory: &F) -> Vec<TestResult>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    vec![
        TestResult::from_result(
            "events",
            "events_filter_by_topic_prefix",
            events_filter_by_topic_prefix(factory).await,
        ),
        TestResult::from_result(
            "events",
            "events_page_by_height",
            events_page_by_height(factory).await,
        ),
    ]
}

async fn seed<L: Ledger>(ledger: &L) -> Result<(), String> {
    for (i, topic) in ["r7.submitted", "r7.result", "r7.settlement", "other.topic"]
        .iter()
        .enumerate()
    {
        ledger
            .append(object(i as u64), topic, None)
            .await
            .map_err(|e| format!("append {topic}: {e}"))?;
    }
    Ok(())
}

async fn events_filter_by_topic_prefix<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    seed(&ledger).await?;
    let events = ledger
        .events("r7.*", 0)
        .await
        .map_err(|e| format!("events: {e}"))?;
    let topics: Vec<&str> = events.iter().map(|e| e.topic.as_str()).collect();
    if topics == ["r7.submitted", "r7.result", "r7.settlement"] {
        Ok(())
    } else {
        Err(format!("unexpected topics {:?}", topics))
    }
}

async fn events_page_by_height<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    seed(&ledger).await?;
    let events = ledger
        .events("*", 2)
        .await
        .map_err(|e| format!("events: {e}"))?;
    let heights: Vec<u64> = events.iter().map(|e| e.height).collect();
    if heights == [2, 3] {
        Ok(())
    } else {
        Err(format!("expected heights [2, 3], got {:?}", heights))
    }
}
