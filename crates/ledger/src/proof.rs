//! Merkle tree over record hashes.
//!
//! Leaves are record hashes in height order. An interior node is the
//! SHA-256 of its children's hex strings concatenated left then right. A
//! node without a sibling is carried up unchanged, so every path step is a
//! real sibling.

use sha2::{Digest, Sha256};

use crate::record::{ProofStep, Side};

fn node_hash(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn next_level(level: &[String]) -> Vec<String> {
    level
        .chunks(2)
        .map(|pair| match pair.get(1) {
            Some(right) => node_hash(&pair[0], right),
            None => pair[0].clone(),
        })
        .collect()
}

/// Root over the given leaves. The root of an empty tree is the hash of
/// the empty string.
pub fn merkle_root(leaves: &[String]) -> String {
    if leaves.is_empty() {
        return format!("{:x}", Sha256::digest(b""));
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level.remove(0)
}

/// Sibling path from leaf `index` up to the root.
pub(crate) fn merkle_path(leaves: &[String], mut index: usize) -> Vec<ProofStep> {
    let mut path = Vec::new();
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let sibling = if index % 2 == 0 { index + 1 } else { index - 1 };
        if let Some(hash) = level.get(sibling) {
            path.push(ProofStep {
                sibling: hash.clone(),
                side: if sibling < index {
                    Side::Left
                } else {
                    Side::Right
                },
            });
        }
        level = next_level(&level);
        index /= 2;
    }
    path
}

/// Recompute the root from a leaf and its path and compare.
pub fn verify_inclusion(leaf: &str, path: &[ProofStep], root: &str) -> bool {
    let computed = path
        .iter()
        .fold(leaf.to_string(), |acc, step| match step.side {
            Side::Left => node_hash(&step.sibling, &acc),
            Side::Right => node_hash(&acc, &step.sibling),
        });
    computed == root
}
