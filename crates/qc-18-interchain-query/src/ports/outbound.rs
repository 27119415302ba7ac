//! # Outbound Ports
//!
//! Collaborators the relay core calls but does not implement: the chain node,
//! the relayer-backed transport, proof verification and wall-clock time.

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::domain::{
    ChannelId, ChannelState, Hash, Height, InterchainQueryError, QueryRequest, QueryResult,
    TrustedConsensusState,
};

/// Raw answer of a chain node to a state query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateQueryResponse {
    /// Response bytes.
    pub response: Vec<u8>,
    /// Commitment proof bytes.
    pub proof: Vec<u8>,
    /// Height the query ran at.
    pub height: Height,
}

/// Chain node interface - outbound port.
#[async_trait]
pub trait ChainNode: Send + Sync {
    /// Broadcast a query-request transaction, returning its hash.
    async fn submit_tx(&self, request: &QueryRequest) -> Result<Hash, InterchainQueryError>;

    /// Run an ABCI-style query; `None` means latest height.
    async fn query_state(
        &self,
        path: &str,
        data: &[u8],
        height: Option<Height>,
    ) -> Result<StateQueryResponse, InterchainQueryError>;

    /// Latest committed height.
    async fn latest_height(&self) -> Result<Height, InterchainQueryError>;
}

/// Outcome of handing an envelope to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Counterparty acknowledged receipt.
    Acknowledged {
        /// Packet sequence assigned by the transport.
        packet_sequence: u64,
    },
    /// No acknowledgement in time.
    TimedOut,
}

/// Envelope received from a counterparty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEnvelope {
    /// Local channel the envelope arrived on.
    pub channel: ChannelId,
    /// Encoded envelope.
    pub bytes: Vec<u8>,
}

/// Infinite stream of inbound envelopes. Ends only when the transport is gone;
/// call [`Transport::receive`] again to resubscribe after a reconnect.
pub type InboundStream = Pin<Box<dyn Stream<Item = InboundEnvelope> + Send>>;

/// Channel transport - outbound port, backed by the relayer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver an encoded envelope on a channel.
    async fn send(
        &self,
        channel: &ChannelId,
        envelope: Vec<u8>,
    ) -> Result<SendOutcome, InterchainQueryError>;

    /// Subscribe to inbound envelopes on every channel of this endpoint.
    fn receive(&self) -> InboundStream;

    /// Sequencing snapshot for a channel.
    fn channel_state(&self, channel: &ChannelId) -> Option<ChannelState>;

    /// Stop carrying traffic on a channel.
    fn close(&self, channel: &ChannelId);
}

/// Proof verification - outbound port.
pub trait ProofVerifier: Send + Sync {
    /// Check `result` for `request` against a trusted snapshot.
    fn verify(
        &self,
        request: &QueryRequest,
        result: &QueryResult,
        trusted: &TrustedConsensusState,
    ) -> Result<(), InterchainQueryError>;

    /// Convenience boolean form of [`ProofVerifier::verify`].
    fn is_valid(
        &self,
        request: &QueryRequest,
        result: &QueryResult,
        trusted: &TrustedConsensusState,
    ) -> bool {
        self.verify(request, result, trusted).is_ok()
    }
}

/// Wall-clock source in unix milliseconds.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now_ms(&self) -> u64;
}
