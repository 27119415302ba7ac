//! # Inbound Ports
//!
//! API trait defining what the Interchain Query subsystem can do.

use async_trait::async_trait;

use crate::domain::{
    ChannelEnd, ChannelId, ErrorAck, InterchainQueryError, QueryId, QueryOutcome, QueryRecord,
    QueryRequest, QueryResult, QueryState, TrustedConsensusState,
};

/// What `on_result` did with a delivered result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultDisposition {
    /// Verified and reported to the origin.
    Verified,
    /// Same result was already verified; nothing changed.
    AlreadyVerified,
    /// Verification failed; request dispatched again.
    Retrying {
        /// Retries consumed so far
        retries: u32,
        /// Why verification failed
        reason: InterchainQueryError,
    },
    /// Verification failed and retries are exhausted, or the failure is final.
    Failed {
        /// Final reason
        reason: InterchainQueryError,
    },
}

/// Interchain query API - inbound port.
#[async_trait]
pub trait InterchainQueryApi: Send + Sync {
    /// Register an open channel.
    fn open_channel(&self, end: ChannelEnd) -> Result<(), InterchainQueryError>;

    /// Dispatch a request observed on the origin chain.
    ///
    /// Returns the state the entry reached (`AwaitingProof`, or `Failed` when
    /// every send attempt timed out).
    async fn submit(&self, request: QueryRequest) -> Result<QueryState, InterchainQueryError>;

    /// Handle a result returned by the host.
    async fn on_result(
        &self,
        result: QueryResult,
        trusted: &TrustedConsensusState,
    ) -> Result<ResultDisposition, InterchainQueryError>;

    /// Handle an error acknowledgement returned by the host.
    fn on_error_ack(&self, ack: ErrorAck) -> Result<(), InterchainQueryError>;

    /// Expire overdue entries and report them to the origin.
    fn sweep(&self) -> Vec<QueryOutcome>;

    /// Close a channel, failing everything still pending on it.
    fn close_channel(&self, channel: &ChannelId) -> Result<usize, InterchainQueryError>;

    /// Finalized record of a query.
    fn query_state(&self, id: &QueryId) -> Option<QueryRecord>;
}
