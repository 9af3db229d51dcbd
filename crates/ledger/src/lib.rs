//! r7-ledger: the append-only ledger collaborator of the R7 pipeline.
//!
//! The engine never talks to a concrete ledger; it talks to the [`Ledger`]
//! trait. This crate provides that trait, the record and inclusion-proof
//! types, an in-memory hash-chained implementation, and a conformance suite
//! any backend can run against itself.

pub mod conformance;
mod error;
mod memory;
mod proof;
mod record;
mod traits;

pub use error::LedgerError;
pub use memory::MemoryLedger;
pub use proof::{merkle_root, verify_inclusion};
pub use record::{topic_matches, InclusionProof, LedgerEvent, LedgerRecord, ProofStep, Side};
pub use traits::Ledger;
