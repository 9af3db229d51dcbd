//! Canonical content hashing.
//!
//! Every hash-identified object (Action Record, Rule Set, Reputation Delta,
//! output payloads) is hashed as SHA-256 over its compact JSON encoding.
//! Struct fields serialize in declaration order and every map in the wire
//! types is a `BTreeMap`, so the encoding is canonical.

use serde::Serialize;
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compute the content hash of any wire value.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(value)?;
    Ok(sha256_hex(&canonical))
}

/// The exact byte string a witness signs when attesting a reputation delta.
///
/// Binds the witness identity, the delta's content hash and the attestation
/// time; a signature over one delta can never be replayed onto another.
pub fn attestation_message(witness_id: &str, delta_hash: &str, at: OffsetDateTime) -> String {
    let ts = at
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("r7-attest:{}:{}:{}", witness_id, delta_hash, ts)
}
