//! # QC-18 Interchain Query
//!
//! Relays cross-chain state queries over ICQ channels and verifies the
//! proven answers before handing them to the origin application.
//!
//! **Subsystem ID:** 18
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//! **Channel version:** `icq-1` (controller port `interquery`, host port `icqhost`)
//!
//! ## Purpose
//!
//! - Dispatch query requests in strict per-channel sequence order
//! - Execute allowed queries on the host chain and return commitment proofs
//! - Verify results against a trusted consensus snapshot
//! - Retry, expire and fail queries with bounded, observable outcomes
//!
//! ## Lifecycle
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | Sent | AwaitingProof | Transport acknowledgement |
//! | AwaitingProof | Verified | Proof checks out |
//! | Sent, AwaitingProof | Failed | Retries exhausted, host error, channel closed |
//! | Sent, AwaitingProof | Expired | Deadline passed |
//!
//! ## Module Structure
//!
//! ```text
//! qc-18-interchain-query/
//! ├── domain/          # QueryRequest, PendingEntry, ChannelEnd, errors, invariants
//! ├── algorithms/      # Envelope codec, commitment proofs, schemas, verifier
//! ├── ports/           # InterchainQueryApi, Transport, ChainNode, Clock
//! ├── adapters/        # InMemoryTransport, MockHostChain, clocks
//! ├── application/     # PendingQueryStore, RelayDispatcher, QueryHost
//! ├── config.rs        # InterchainQueryConfig, HostConfig
//! └── telemetry.rs     # tracing setup
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;

// Re-exports
pub use adapters::{InMemoryTransport, ManualClock, MockHostChain, SystemClock};
pub use algorithms::{
    decode, decode_response, encode, CommitmentProof, CommitmentProofVerifier, DecodedResponse,
    ALL_BALANCES_PATH,
};
pub use application::{spawn_sweeper, OutcomeReceiver, PendingQueryStore, QueryHost, RelayDispatcher};
pub use config::{HostConfig, InterchainQueryConfig};
pub use domain::{
    ChannelEnd, ChannelId, ChannelState, ErrorAck, Hash, Height, Initiator, InterchainQueryError,
    PendingEntry, PortId, QueryEnvelope, QueryId, QueryOutcome, QueryRecord, QueryRequest,
    QueryResult, QueryState, TrustedConsensusState,
};
pub use ports::{
    ChainNode, Clock, InboundEnvelope, InboundStream, InterchainQueryApi, ProofVerifier,
    ResultDisposition, SendOutcome, StateQueryResponse, Transport,
};
pub use telemetry::{init_tracing, LogConfig, TelemetryError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    #[allow(clippy::const_is_empty)]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
