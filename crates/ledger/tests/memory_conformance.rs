use r7_ledger::conformance::run_conformance_suite;
use r7_ledger::MemoryLedger;

#[tokio::test]
async fn memory_ledger_passes_conformance() {
    let report = run_conformance_suite(|| async { MemoryLedger::new() }).await;
    assert!(report.total > 0);
    assert_eq!(report.failed, 0, "{report}");
}
