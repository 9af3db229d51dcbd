//! Conformance test suite for `Ledger` implementations.
//!
//! A backend-agnostic suite any `Ledger` implementation can run to verify
//! the behavior the R7 pipeline relies on:
//!
//! - **Append**: hashes are unique, parents must exist, heights are dense
//! - **Query**: `get` round-trips objects, unknown hashes are `NotFound`
//! - **Proof**: every record proves against the current root
//! - **Events**: topic filtering and height paging
//! - **Concurrency**: parallel appends all land, with no lost or duplicate heights
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory that
//! creates a fresh, empty ledger for each test:
//!
//! ```ignore
//! use r7_ledger::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn my_backend_conformance() {
//!     let report = run_conformance_suite(|| async { MyLedger::connect_empty().await }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod append;
mod concurrent;
mod events;
mod prove;
mod query;

use std::fmt;
use std::future::Future;

use crate::Ledger;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "append", "prove").
    pub category: String,
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Ledger conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in self.results.iter().filter(|r| !r.passed) {
            writeln!(
                f,
                "  FAIL [{}/{}]: {}",
                r.category,
                r.name,
                r.message.as_deref().unwrap_or("(no message)")
            )?;
        }
        Ok(())
    }
}

/// Run the full conformance suite against a ledger backend.
///
/// The `factory` is called once per test so tests never share state.
pub async fn run_conformance_suite<L, F, Fut>(factory: F) -> ConformanceReport
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let mut results = Vec::new();

    results.extend(append::run_append_tests(&factory).await);
    results.extend(query::run_query_tests(&factory).await);
    results.extend(prove::run_prove_tests(&factory).await);
    results.extend(events::run_events_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

fn object(n: u64) -> serde_json::Value {
    serde_json::json!({ "kind": "conformance", "n": n })
}
