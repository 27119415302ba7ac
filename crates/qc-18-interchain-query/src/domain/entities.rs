//! # Domain Entities
//!
//! Requests, results, pending entries and channel state.

use super::errors::{Hash, InterchainQueryError};
use super::value_objects::{
    ChannelId, ChannelOrdering, Height, Initiator, PortId, QueryId, QueryState, ICQ_VERSION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cross-chain query request observed on the origin chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Unique id, monotonically increasing per channel.
    pub id: QueryId,
    /// ABCI query route, e.g. `/cosmos.bank.v1beta1.Query/AllBalances`.
    pub path: String,
    /// Opaque request bytes.
    pub data: Vec<u8>,
    /// Target height on the host; latest when `None`.
    pub height: Option<Height>,
    /// Submission time (unix millis). Zero means "stamp on submit".
    pub submitted_at_ms: u64,
    /// Origin application that asked for the query.
    pub initiator: Initiator,
}

impl QueryRequest {
    /// Create a request at the latest host height.
    pub fn new(id: QueryId, path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            path: path.into(),
            data: data.into(),
            height: None,
            submitted_at_ms: 0,
            initiator: Initiator::default(),
        }
    }

    /// Pin the query to a host height.
    pub fn at_height(mut self, height: Height) -> Self {
        self.height = Some(height);
        self
    }

    /// Set the submitting application.
    pub fn with_initiator(mut self, initiator: Initiator) -> Self {
        self.initiator = initiator;
        self
    }

    /// Set the submission timestamp.
    pub fn submitted_at(mut self, millis: u64) -> Self {
        self.submitted_at_ms = millis;
        self
    }
}

/// A proven answer produced by the host chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Request this result answers.
    pub request_id: QueryId,
    /// Opaque response bytes.
    pub response_data: Vec<u8>,
    /// Commitment proof against the host state root.
    pub proof: Vec<u8>,
    /// Height the proof was generated at.
    pub proven_height: Height,
}

/// Error acknowledgement sent by the host instead of a result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAck {
    /// Request that was rejected.
    pub request_id: QueryId,
    /// Human readable reason.
    pub reason: String,
}

/// Unit exchanged over a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryEnvelope {
    /// Origin -> host.
    Request(QueryRequest),
    /// Host -> origin.
    Result(QueryResult),
    /// Host -> origin, request rejected.
    Error(ErrorAck),
}

impl QueryEnvelope {
    /// Query this envelope belongs to.
    pub fn query_id(&self) -> &QueryId {
        match self {
            Self::Request(r) => &r.id,
            Self::Result(r) => &r.request_id,
            Self::Error(e) => &e.request_id,
        }
    }
}

/// An in-flight query tracked by the pending store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingEntry {
    /// Original request.
    pub request: QueryRequest,
    /// Lifecycle state.
    pub state: QueryState,
    /// Dispatch attempts that failed (timeouts or rejected proofs).
    pub retries: u32,
    /// Results rejected by verification; bounded by `max_retries`.
    pub proof_retries: u32,
    /// Deadline (unix millis).
    pub deadline_ms: u64,
    /// Most recent retryable failure.
    pub last_error: Option<InterchainQueryError>,
}

impl PendingEntry {
    /// Create a freshly dispatched entry.
    pub fn new(request: QueryRequest, deadline_ms: u64) -> Self {
        Self {
            request,
            state: QueryState::Sent,
            retries: 0,
            proof_retries: 0,
            deadline_ms,
            last_error: None,
        }
    }

    /// Query id.
    pub fn id(&self) -> &QueryId {
        &self.request.id
    }

    /// Deadline passed while still in flight.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        !self.state.is_terminal() && now_ms > self.deadline_ms
    }
}

/// Finalized query, kept for `query_state` lookups and idempotence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRecord {
    /// Original request.
    pub request: QueryRequest,
    /// Terminal state.
    pub state: QueryState,
    /// Retries consumed.
    pub retries: u32,
    /// Of which were rejected results.
    pub proof_retries: u32,
    /// Verified result, if any.
    pub result: Option<QueryResult>,
}

/// Terminal lifecycle outcome pushed to the origin application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Result verified against the trusted root.
    Verified {
        /// Original request
        request: QueryRequest,
        /// Verified result
        result: QueryResult,
    },
    /// Rejected, closed, or out of retries.
    Failed {
        /// Original request
        request: QueryRequest,
        /// Final reason
        reason: InterchainQueryError,
        /// Retries consumed
        retries: u32,
    },
    /// Deadline passed before verification.
    Expired {
        /// Original request
        request: QueryRequest,
        /// Deadline (unix millis)
        deadline_ms: u64,
    },
}

impl QueryOutcome {
    /// Query this outcome concerns.
    pub fn id(&self) -> &QueryId {
        &self.request().id
    }

    /// Original request.
    pub fn request(&self) -> &QueryRequest {
        match self {
            Self::Verified { request, .. }
            | Self::Failed { request, .. }
            | Self::Expired { request, .. } => request,
        }
    }

    /// Terminal state this outcome reports.
    pub fn state(&self) -> QueryState {
        match self {
            Self::Verified { .. } => QueryState::Verified,
            Self::Failed { .. } => QueryState::Failed,
            Self::Expired { .. } => QueryState::Expired,
        }
    }
}

/// Transport-side sequencing state for one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelState {
    /// Local channel.
    pub channel_id: ChannelId,
    /// Channel on the counterparty.
    pub counterparty_channel_id: ChannelId,
    /// Sequence assigned to the next outbound packet.
    pub next_sequence_send: u64,
    /// Highest acknowledged packet sequence.
    pub last_acked_sequence: u64,
}

impl ChannelState {
    /// Fresh channel state.
    pub fn new(channel_id: ChannelId, counterparty_channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            counterparty_channel_id,
            next_sequence_send: 1,
            last_acked_sequence: 0,
        }
    }

    /// Reserve the next packet sequence.
    pub fn reserve_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence_send;
        self.next_sequence_send += 1;
        sequence
    }

    /// Record an acknowledgement.
    pub fn acknowledge(&mut self, sequence: u64) {
        self.last_acked_sequence = self.last_acked_sequence.max(sequence);
    }
}

/// Handshake parameters of an open channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEnd {
    /// Local channel.
    pub channel_id: ChannelId,
    /// Counterparty channel.
    pub counterparty_channel_id: ChannelId,
    /// Local (controller) port.
    pub port_id: PortId,
    /// Counterparty (host) port.
    pub counterparty_port_id: PortId,
    /// Negotiated version.
    pub version: String,
    /// Packet ordering.
    pub ordering: ChannelOrdering,
}

impl ChannelEnd {
    /// Module-to-host ICQ channel with the standard ports and version.
    pub fn icq(channel_id: ChannelId, counterparty_channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            counterparty_channel_id,
            port_id: PortId::controller(),
            counterparty_port_id: PortId::host(),
            version: ICQ_VERSION.to_string(),
            ordering: ChannelOrdering::Unordered,
        }
    }

    /// Bind the local end to a different port (e.g. a wasm contract).
    pub fn with_port(mut self, port_id: PortId) -> Self {
        self.port_id = port_id;
        self
    }
}

/// Read-only snapshot of what the origin trusts about the host chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustedConsensusState {
    /// Host chain id.
    pub chain_id: String,
    /// Latest height with a trusted root.
    pub latest_height: Height,
    /// Trusted state roots by height.
    pub roots: BTreeMap<Height, Hash>,
}

impl TrustedConsensusState {
    /// Empty snapshot for a chain.
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            latest_height: 0,
            roots: BTreeMap::new(),
        }
    }

    /// Add a trusted root, advancing the latest height.
    pub fn with_root(mut self, height: Height, root: Hash) -> Self {
        self.insert_root(height, root);
        self
    }

    /// Add a trusted root in place.
    pub fn insert_root(&mut self, height: Height, root: Hash) {
        self.roots.insert(height, root);
        self.latest_height = self.latest_height.max(height);
    }

    /// Trusted root at a height.
    pub fn root_at(&self, height: Height) -> Option<&Hash> {
        self.roots.get(&height)
    }
}
