//! # Domain Errors
//!
//! Error taxonomy for Interchain Queries.
//!
//! Codec and store errors are returned synchronously to the caller of
//! `submit` / `on_result`. Terminal lifecycle outcomes travel through the
//! origin callback queue and carry one of these as their reason.

use super::value_objects::{ChannelId, Height, QueryId, QueryState};
use thiserror::Error;

/// Hash type (32-byte SHA-256).
pub type Hash = [u8; 32];

/// Interchain query error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterchainQueryError {
    /// Envelope is truncated, has a bad magic, or an unsupported version.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A query with this id is already known.
    #[error("Duplicate request: {0}")]
    DuplicateRequest(QueryId),

    /// Request sequence is not the next one expected on its channel.
    #[error("Sequence gap on {channel}: expected {expected}, got {got}")]
    SequenceGap {
        /// Channel the request was submitted on
        channel: ChannelId,
        /// Next sequence the channel expects
        expected: u64,
        /// Sequence that was submitted
        got: u64,
    },

    /// State machine violation.
    #[error("Invalid transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Query id
        id: QueryId,
        /// Current state
        from: QueryState,
        /// Attempted state
        to: QueryState,
    },

    /// Result for a query that is unknown or already terminal.
    #[error("Unknown request: {0}")]
    UnknownRequest(QueryId),

    /// Proof does not validate the response against the trusted root.
    #[error("Invalid proof: {0}")]
    ProofInvalid(String),

    /// No trusted root for the proven height.
    #[error("Height unknown: proven at {height}, latest trusted {latest}")]
    HeightUnknown {
        /// Height the result claims
        height: Height,
        /// Latest trusted height of the counterparty
        latest: Height,
    },

    /// Response data does not decode to the shape of its query path.
    #[error("Schema mismatch for {path}: {reason}")]
    SchemaMismatch {
        /// Query path
        path: String,
        /// Decoder message
        reason: String,
    },

    /// Deadline passed before the query was verified.
    #[error("Query {id} expired at {deadline_ms}")]
    Expired {
        /// Query id
        id: QueryId,
        /// Deadline (unix millis)
        deadline_ms: u64,
    },

    /// Channel has not been opened on this dispatcher or transport.
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// Channel was closed while the query was pending.
    #[error("Channel closed: {0}")]
    ChannelClosed(ChannelId),

    /// Channel handshake parameters are not ICQ-compatible.
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Host chain does not allow this query path.
    #[error("Query path not allowed: {0}")]
    QueryNotAllowed(String),

    /// Host answered with an error acknowledgement.
    #[error("Host rejected {id}: {reason}")]
    HostRejected {
        /// Query id
        id: QueryId,
        /// Reason reported by the host
        reason: String,
    },

    /// Transport or node failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration failed validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl InterchainQueryError {
    /// Errors the dispatcher retries until `max_retries` is exhausted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProofInvalid(_)
                | Self::HeightUnknown { .. }
                | Self::SchemaMismatch { .. }
                | Self::Network(_)
        )
    }
}
