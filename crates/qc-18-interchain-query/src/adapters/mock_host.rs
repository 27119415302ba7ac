//! Mock Host Chain Adapter
//!
//! Implements the `ChainNode` port with an in-memory key/value state that is
//! committed per height, so queries come back with real commitment proofs.

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::algorithms::commitment::{build_proof, commitment_key, compute_root, leaf_hash, ProofNode};
use crate::domain::{Hash, Height, InterchainQueryError, QueryRequest, TrustedConsensusState};
use crate::ports::outbound::{ChainNode, StateQueryResponse};

/// Committed state at one height, ordered by commitment key.
#[derive(Clone, Debug, Default)]
struct Snapshot {
    entries: BTreeMap<Hash, Vec<u8>>,
    root: Hash,
}

impl Snapshot {
    fn commit(entries: BTreeMap<Hash, Vec<u8>>) -> Self {
        let leaves: Vec<Hash> = entries.iter().map(|(k, v)| leaf_hash(k, v)).collect();
        let root = compute_root(&leaves);
        Self { entries, root }
    }

    fn leaves(&self) -> Vec<Hash> {
        self.entries.iter().map(|(k, v)| leaf_hash(k, v)).collect()
    }
}

#[derive(Default)]
struct HostState {
    working: BTreeMap<Hash, Vec<u8>>,
    snapshots: BTreeMap<Height, Snapshot>,
    latest: Height,
    txs: Vec<Hash>,
    corrupt_proofs: u32,
}

/// Host chain with deterministic, height-versioned state.
pub struct MockHostChain {
    chain_id: String,
    state: RwLock<HostState>,
}

impl MockHostChain {
    /// Empty chain at height 0.
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            state: RwLock::new(HostState::default()),
        }
    }

    /// Chain id.
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Stage the answer to `(path, data)` for the next commit.
    pub fn set_query_response(&self, path: &str, data: &[u8], response: impl Into<Vec<u8>>) {
        let key = commitment_key(path, data);
        self.state.write().working.insert(key, response.into());
    }

    /// Commit staged state as the next block.
    pub fn commit(&self) -> Height {
        let next = self.state.read().latest + 1;
        self.commit_at(next)
    }

    /// Commit staged state at `height`, skipping any heights in between.
    /// Heights at or below the latest are ignored.
    pub fn commit_at(&self, height: Height) -> Height {
        let mut state = self.state.write();
        if height <= state.latest {
            return state.latest;
        }
        let snapshot = Snapshot::commit(state.working.clone());
        info!(
            chain_id = %self.chain_id,
            height,
            root = %hex::encode(snapshot.root),
            "Committed block"
        );
        state.snapshots.insert(height, snapshot);
        state.latest = height;
        height
    }

    /// Root committed at a height.
    pub fn root_at(&self, height: Height) -> Option<Hash> {
        self.state.read().snapshots.get(&height).map(|s| s.root)
    }

    /// What a light client following this chain would trust.
    pub fn trusted_state(&self) -> TrustedConsensusState {
        let state = self.state.read();
        let mut trusted = TrustedConsensusState::new(self.chain_id.clone());
        for (height, snapshot) in &state.snapshots {
            trusted.insert_root(*height, snapshot.root);
        }
        trusted
    }

    /// Hand out broken proofs for the next `n` queries.
    pub fn corrupt_next_proofs(&self, n: u32) {
        self.state.write().corrupt_proofs = n;
    }

    /// Transactions accepted so far.
    pub fn submitted_txs(&self) -> Vec<Hash> {
        self.state.read().txs.clone()
    }
}

#[async_trait]
impl ChainNode for MockHostChain {
    async fn submit_tx(&self, request: &QueryRequest) -> Result<Hash, InterchainQueryError> {
        let bytes = serde_json::to_vec(request)
            .map_err(|e| InterchainQueryError::MalformedEnvelope(e.to_string()))?;
        let tx_hash: Hash = Sha256::digest(&bytes).into();
        self.state.write().txs.push(tx_hash);
        debug!(query_id = %request.id, tx = %hex::encode(tx_hash), "Query tx accepted");
        Ok(tx_hash)
    }

    async fn query_state(
        &self,
        path: &str,
        data: &[u8],
        height: Option<Height>,
    ) -> Result<StateQueryResponse, InterchainQueryError> {
        let mut state = self.state.write();
        let latest = state.latest;
        let height = height.unwrap_or(latest);
        let snapshot = state
            .snapshots
            .get(&height)
            .ok_or(InterchainQueryError::HeightUnknown { height, latest })?;

        let key = commitment_key(path, data);
        let index = snapshot
            .entries
            .keys()
            .position(|k| *k == key)
            .ok_or_else(|| {
                InterchainQueryError::Network(format!("no value for {path} at height {height}"))
            })?;
        let response = snapshot.entries[&key].clone();
        let mut proof = build_proof(&snapshot.leaves(), index)?;

        if state.corrupt_proofs > 0 {
            state.corrupt_proofs -= 1;
            match proof.path.first_mut() {
                Some(node) => node.hash[0] ^= 0xff,
                None => proof.path.push(ProofNode::right([0xee; 32])),
            }
            debug!(path, height, "Serving corrupted proof");
        }

        Ok(StateQueryResponse {
            response,
            proof: proof.to_bytes()?,
            height,
        })
    }

    async fn latest_height(&self) -> Result<Height, InterchainQueryError> {
        Ok(self.state.read().latest)
    }
}
