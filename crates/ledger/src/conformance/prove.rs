use std::future::Future;

use super::{object, TestResult};
use crate::{merkle_root, Ledger, LedgerError};

pub(super) async fn run_prove_tests<L, F, Fut>(factory: &F) -> Vec<TestResult>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    vec![
        TestResult::from_result(
            "prove",
            "every_record_proves_against_root",
            every_record_proves_against_root(factory).await,
        ),
        TestResult::from_result(
            "prove",
            "proof_root_matches_all_records",
            proof_root_matches_all_records(factory).await,
        ),
        TestResult::from_result(
            "prove",
            "prove_unknown_is_not_found",
            prove_unknown_is_not_found(factory).await,
        ),
    ]
}

async fn append_n<L: Ledger>(ledger: &L, n: u64) -> Result<Vec<String>, String> {
    let mut hashes = Vec::new();
    for i in 0..n {
        hashes.push(
            ledger
                .append(object(i), "r7.test", None)
                .await
                .map_err(|e| format!("append: {e}"))?,
        );
    }
    Ok(hashes)
}

async fn every_record_proves_against_root<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    let hashes = append_n(&ledger, 7).await?;
    for (i, hash) in hashes.iter().enumerate() {
        let proof = ledger.prove(hash).await.map_err(|e| format!("prove: {e}"))?;
        if proof.height != i as u64 {
            return Err(format!("proof height {} for record {i}", proof.height));
        }
        if !proof.verify() {
            return Err(format!("proof for record {i} does not verify"));
        }
    }
    Ok(())
}

async fn proof_root_matches_all_records<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    let hashes = append_n(&ledger, 4).await?;
    let proof = ledger
        .prove(&hashes[2])
        .await
        .map_err(|e| format!("prove: {e}"))?;
    let expected = merkle_root(&hashes);
    if proof.root == expected {
        Ok(())
    } else {
        Err(format!("root {} != expected {}", proof.root, expected))
    }
}

async fn prove_unknown_is_not_found<L, F, Fut>(factory: &F) -> Result<(), String>
where
    L: Ledger,
    F: Fn() -> Fut,
    Fut: Future<Output = L>,
{
    let ledger = factory().await;
    match ledger.prove("nope").await {
        Err(LedgerError::NotFound { .. }) => Ok(()),
        other => Err(format!("expected NotFound, got {:?}", other)),
    }
}
