use serde::{Deserialize, Serialize};

/// A record as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    /// SHA-256 over the canonical encoding of (height, topic, parent, object).
    pub hash: String,
    /// Zero-based position in the ledger.
    pub height: u64,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
    pub object: serde_json::Value,
    /// RFC 3339 timestamp string.
    pub recorded_at: String,
}

/// An event surfaced by [`crate::Ledger::events`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub height: u64,
    pub topic: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<String>,
}

impl From<&LedgerRecord> for LedgerEvent {
    fn from(record: &LedgerRecord) -> Self {
        LedgerEvent {
            height: record.height,
            topic: record.topic.clone(),
            hash: record.hash.clone(),
            parent_hash: record.parent_hash.clone(),
        }
    }
}

/// Which side of the running hash a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// One level of a Merkle inclusion path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: String,
    pub side: Side,
}

/// Merkle inclusion proof for a record against the root at proof time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionProof {
    pub record_hash: String,
    pub height: u64,
    pub root: String,
    pub path: Vec<ProofStep>,
}

impl InclusionProof {
    /// Flatten the path into `"L:<hash>"` / `"R:<hash>"` strings for the
    /// `ledgerProof.inclusionProof` wire field.
    pub fn encoded_path(&self) -> Vec<String> {
        self.path
            .iter()
            .map(|step| match step.side {
                Side::Left => format!("L:{}", step.sibling),
                Side::Right => format!("R:{}", step.sibling),
            })
            .collect()
    }

    /// Check this proof against its own root.
    pub fn verify(&self) -> bool {
        crate::proof::verify_inclusion(&self.record_hash, &self.path, &self.root)
    }
}

/// Topic pattern match used by `events`: exact match, `*` for everything,
/// or a trailing `*` for a prefix match (`"r7.settlement.*"`).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_patterns() {
        assert!(topic_matches("*", "r7.result"));
        assert!(topic_matches("r7.*", "r7.result"));
        assert!(topic_matches("r7.result", "r7.result"));
        assert!(!topic_matches("r7.result", "r7.results"));
        assert!(!topic_matches("r7.settle*", "r7.result"));
    }

    #[test]
    fn encoded_path_prefixes_side() {
        let proof = InclusionProof {
            record_hash: "x".into(),
            height: 0,
            root: "r".into(),
            path: vec![
                ProofStep {
                    sibling: "a".into(),
                    side: Side::Left,
                },
                ProofStep {
                    sibling: "b".into(),
                    side: Side::Right,
                },
            ],
        };
        assert_eq!(proof.encoded_path(), vec!["L:a", "R:b"]);
    }
}
