//! # Proof Verifier
//!
//! Checks a host result against the trusted consensus snapshot:
//!
//! 1. `proven_height` is trusted (`HeightUnknown`)
//! 2. the proof commits `response_data` under the root at that height
//!    (`ProofInvalid`)
//! 3. `response_data` has the shape of the query path (`SchemaMismatch`)

use tracing::debug;

use super::commitment::{commitment_key, leaf_hash, verify_membership, CommitmentProof};
use super::schema::decode_response;
use crate::domain::{
    invariant_height_trusted, InterchainQueryError, QueryRequest, QueryResult,
    TrustedConsensusState,
};
use crate::ports::ProofVerifier;

/// Verifies results produced by the SHA-256 commitment scheme.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommitmentProofVerifier;

impl CommitmentProofVerifier {
    /// Create a verifier.
    pub fn new() -> Self {
        Self
    }
}

impl ProofVerifier for CommitmentProofVerifier {
    fn verify(
        &self,
        request: &QueryRequest,
        result: &QueryResult,
        trusted: &TrustedConsensusState,
    ) -> Result<(), InterchainQueryError> {
        if result.request_id != request.id {
            return Err(InterchainQueryError::ProofInvalid(format!(
                "result for {} presented for {}",
                result.request_id, request.id
            )));
        }
        if let Some(requested) = request.height {
            if result.proven_height != requested {
                return Err(InterchainQueryError::ProofInvalid(format!(
                    "proven at {} but requested {}",
                    result.proven_height, requested
                )));
            }
        }

        let root = invariant_height_trusted(result.proven_height, trusted)?;

        let proof = CommitmentProof::from_bytes(&result.proof)?;
        let key = commitment_key(&request.path, &request.data);
        let leaf = leaf_hash(&key, &result.response_data);
        if !verify_membership(&leaf, &proof, root) {
            return Err(InterchainQueryError::ProofInvalid(format!(
                "response does not match root {} at height {}",
                hex::encode(root),
                result.proven_height
            )));
        }

        decode_response(&request.path, &result.response_data)?;

        debug!(
            query_id = %request.id,
            height = result.proven_height,
            chain_id = %trusted.chain_id,
            "Result proof verified"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::commitment::{build_proof, compute_root};
    use crate::algorithms::schema::ALL_BALANCES_PATH;
    use crate::domain::{ChannelId, QueryId};

    const BALANCES: &[u8] =
        br#"{"balances":[{"denom":"atom","amount":"100"}],"pagination":{"next_key":null,"total":"1"}}"#;

    fn request() -> QueryRequest {
        QueryRequest::new(
            QueryId::new(ChannelId::new(0), 1),
            ALL_BALANCES_PATH,
            b"eyJhZGRyZXNzIjoiYWRkcmVzcyJ9".to_vec(),
        )
    }

    /// Commit `response` for `request` next to one unrelated leaf.
    fn commit(request: &QueryRequest, response: &[u8], height: u64) -> (QueryResult, TrustedConsensusState) {
        let leaf = leaf_hash(&commitment_key(&request.path, &request.data), response);
        let other = leaf_hash(&commitment_key("/other", b""), b"x");
        let leaves = vec![other, leaf];
        let root = compute_root(&leaves);
        let proof = build_proof(&leaves, 1).unwrap().to_bytes().unwrap();
        let result = QueryResult {
            request_id: request.id.clone(),
            response_data: response.to_vec(),
            proof,
            proven_height: height,
        };
        (result, TrustedConsensusState::new("receiver").with_root(height, root))
    }

    #[test]
    fn test_valid_result() {
        let req = request();
        let (result, trusted) = commit(&req, BALANCES, 100);
        assert!(CommitmentProofVerifier.verify(&req, &result, &trusted).is_ok());
    }

    #[test]
    fn test_height_above_trusted() {
        let req = request();
        let (mut result, trusted) = commit(&req, BALANCES, 100);
        result.proven_height = 150;
        assert!(matches!(
            CommitmentProofVerifier.verify(&req, &result, &trusted),
            Err(InterchainQueryError::HeightUnknown { height: 150, latest: 100 })
        ));
    }

    #[test]
    fn test_tampered_response() {
        let req = request();
        let (mut result, trusted) = commit(&req, BALANCES, 100);
        result.response_data = br#"{"balances":[{"denom":"atom","amount":"999999"}],"pagination":{}}"#.to_vec();
        assert!(matches!(
            CommitmentProofVerifier.verify(&req, &result, &trusted),
            Err(InterchainQueryError::ProofInvalid(_))
        ));
    }

    #[test]
    fn test_root_mismatch() {
        let req = request();
        let (result, _) = commit(&req, BALANCES, 100);
        let trusted = TrustedConsensusState::new("receiver").with_root(100, [9u8; 32]);
        assert!(matches!(
            CommitmentProofVerifier.verify(&req, &result, &trusted),
            Err(InterchainQueryError::ProofInvalid(_))
        ));
    }

    #[test]
    fn test_schema_checked_after_proof() {
        let req = request();
        let (result, trusted) = commit(&req, b"not json", 100);
        assert!(matches!(
            CommitmentProofVerifier.verify(&req, &result, &trusted),
            Err(InterchainQueryError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_pinned_height_must_match() {
        let req = request().at_height(90);
        let (result, trusted) = commit(&req, BALANCES, 100);
        assert!(matches!(
            CommitmentProofVerifier.verify(&req, &result, &trusted),
            Err(InterchainQueryError::ProofInvalid(_))
        ));
    }

    #[test]
    fn test_result_for_other_request() {
        let req = request();
        let (mut result, trusted) = commit(&req, BALANCES, 100);
        result.request_id = QueryId::new(ChannelId::new(0), 2);
        assert!(CommitmentProofVerifier.verify(&req, &result, &trusted).is_err());
    }
}
