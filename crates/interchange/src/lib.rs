//! r7-interchange: Shared wire types for the R7 action pipeline.
//!
//! Provides typed structs for every object that crosses a component or
//! service boundary (Action Record, Result, Reputation Delta, Rule Set,
//! trust/value tensors) plus canonical content hashing. The JSON shape is
//! camelCase to match the published wire format; decimal quantities travel
//! as strings so hashes stay byte-stable.
//!
//! The engine, the ledger adapters and the CLI all depend on this crate for
//! parsing, then work on the typed values directly.

pub mod deserialize;
pub mod hash;
pub mod rules;
pub mod types;

pub use deserialize::{parse_action_record, parse_rule_set, InterchangeError};
pub use hash::{attestation_message, content_hash, sha256_hex};
pub use rules::*;
pub use types::*;
