//! # State Commitment Proofs
//!
//! Binary SHA-256 Merkle commitment over `(query key, response)` leaves.
//!
//! - key   = SHA256(path || 0x00 || data)
//! - leaf  = SHA256(0x00 || key || SHA256(value))
//! - inner = SHA256(0x01 || left || right), odd nodes pair with themselves
//!
//! Leaf and inner hashes are domain-separated so an inner node can never be
//! presented as a leaf.

use bincode::Options;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{Hash, InterchainQueryError};

const LEAF_PREFIX: u8 = 0x00;
const INNER_PREFIX: u8 = 0x01;

/// Upper bound on an encoded proof (a 64-level path is ~2.2 KiB).
const MAX_PROOF_LEN: u64 = 16 * 1024;

/// Position of the sibling hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    /// Sibling is on the left.
    Left,
    /// Sibling is on the right.
    Right,
}

/// One step of a membership proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    /// Sibling hash.
    pub hash: Hash,
    /// Where the sibling sits.
    pub position: Position,
}

impl ProofNode {
    /// Sibling on the left.
    pub fn left(hash: Hash) -> Self {
        Self {
            hash,
            position: Position::Left,
        }
    }

    /// Sibling on the right.
    pub fn right(hash: Hash) -> Self {
        Self {
            hash,
            position: Position::Right,
        }
    }
}

/// Membership proof for one leaf.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentProof {
    /// Path from leaf to root.
    pub path: Vec<ProofNode>,
}

impl CommitmentProof {
    /// Serialize for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, InterchainQueryError> {
        proof_options()
            .serialize(self)
            .map_err(|e| InterchainQueryError::ProofInvalid(format!("encode: {e}")))
    }

    /// Parse from the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InterchainQueryError> {
        proof_options()
            .deserialize(bytes)
            .map_err(|e| InterchainQueryError::ProofInvalid(format!("decode: {e}")))
    }
}

fn proof_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .reject_trailing_bytes()
        .with_limit(MAX_PROOF_LEN)
}

fn sha256(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Commitment key for a query.
pub fn commitment_key(path: &str, data: &[u8]) -> Hash {
    sha256(&[path.as_bytes(), &[0x00], data])
}

/// Leaf hash for a committed `(key, value)` pair.
pub fn leaf_hash(key: &Hash, value: &[u8]) -> Hash {
    let value_hash = sha256(&[value]);
    sha256(&[&[LEAF_PREFIX], key, &value_hash])
}

fn inner_hash(left: &Hash, right: &Hash) -> Hash {
    sha256(&[&[INNER_PREFIX], left, right])
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            inner_hash(left, right)
        })
        .collect()
}

/// Root over an ordered list of leaves. Empty tree has the zero root.
pub fn compute_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Build the membership proof for `leaves[index]`.
pub fn build_proof(leaves: &[Hash], index: usize) -> Result<CommitmentProof, InterchainQueryError> {
    if index >= leaves.len() {
        return Err(InterchainQueryError::ProofInvalid(format!(
            "leaf {index} out of range ({} leaves)",
            leaves.len()
        )));
    }

    let mut path = Vec::new();
    let mut level = leaves.to_vec();
    let mut index = index;

    while level.len() > 1 {
        let node = if index % 2 == 0 {
            // Last odd node pairs with itself.
            ProofNode::right(*level.get(index + 1).unwrap_or(&level[index]))
        } else {
            ProofNode::left(level[index - 1])
        };
        path.push(node);
        level = next_level(&level);
        index /= 2;
    }

    Ok(CommitmentProof { path })
}

/// Fold a proof from `leaf` and compare against `root`.
pub fn verify_membership(leaf: &Hash, proof: &CommitmentProof, root: &Hash) -> bool {
    let computed = proof.path.iter().fold(*leaf, |current, node| match node.position {
        Position::Left => inner_hash(&node.hash, &current),
        Position::Right => inner_hash(&current, &node.hash),
    });
    computed == *root
}
