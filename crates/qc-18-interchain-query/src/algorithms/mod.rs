//! # Algorithms
//!
//! Envelope wire format, state commitments, response schemas and proof
//! verification.

pub mod commitment;
pub mod envelope_codec;
pub mod proof_verifier;
pub mod schema;

pub use commitment::{
    build_proof, commitment_key, compute_root, leaf_hash, verify_membership, CommitmentProof,
    Position, ProofNode,
};
pub use envelope_codec::{decode, decode_request, encode, encode_request, peek_header};
pub use proof_verifier::CommitmentProofVerifier;
pub use schema::{decode_response, AllBalancesResponse, DecodedResponse, ALL_BALANCES_PATH};
