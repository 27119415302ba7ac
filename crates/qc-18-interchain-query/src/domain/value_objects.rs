//! # Domain Value Objects
//!
//! Identifiers and the query lifecycle state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Block height on a counterparty chain.
pub type Height = u64;

/// Channel version negotiated for interchain queries.
pub const ICQ_VERSION: &str = "icq-1";

/// Port bound by the host module on the queried chain.
pub const HOST_PORT: &str = "icqhost";

/// Port bound by the controller module on the querying chain.
pub const CONTROLLER_PORT: &str = "interquery";

/// Channel identifier, e.g. `channel-0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(String);

impl ChannelId {
    /// Channel id in the canonical `channel-{n}` form.
    pub fn new(counter: u64) -> Self {
        Self(format!("channel-{counter}"))
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Port identifier, e.g. `icqhost` or `wasm.<contract>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(String);

impl PortId {
    /// Host port.
    pub fn host() -> Self {
        Self(HOST_PORT.to_string())
    }

    /// Default controller port.
    pub fn controller() -> Self {
        Self(CONTROLLER_PORT.to_string())
    }

    /// Port bound by a wasm contract.
    pub fn wasm(contract: &str) -> Self {
        Self(format!("wasm.{contract}"))
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Unique query identifier: `(channel, sequence)`.
///
/// Module-initiated and contract-initiated queries share this namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId {
    /// Channel the query was sent on.
    pub channel: ChannelId,
    /// Per-channel sequence, starting at 1.
    pub sequence: u64,
}

impl QueryId {
    /// Create a query id.
    pub fn new(channel: ChannelId, sequence: u64) -> Self {
        Self { channel, sequence }
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel, self.sequence)
    }
}

/// Who asked for the query on the origin chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Initiator {
    /// A native module (e.g. `interquery`).
    Module(String),
    /// A wasm contract, by address.
    Contract(String),
}

impl Default for Initiator {
    fn default() -> Self {
        Self::Module(CONTROLLER_PORT.to_string())
    }
}

/// Channel ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelOrdering {
    /// Packets may be delivered in any order.
    #[default]
    Unordered,
    /// Packets are delivered in send order.
    Ordered,
}

/// Pending query lifecycle.
///
/// ```text
/// Sent ──► AwaitingProof ──► Verified
///   │            │
///   ├────────────┴──► Failed
///   └────────────┴──► Expired
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryState {
    /// Handed to the transport, not yet acknowledged.
    #[default]
    Sent,
    /// Delivered to the host, waiting for a proven result.
    AwaitingProof,
    /// Result verified and delivered to the origin.
    Verified,
    /// Rejected or out of retries.
    Failed,
    /// Deadline passed before verification.
    Expired,
}

impl QueryState {
    /// Check if transition is valid.
    pub fn can_transition_to(&self, next: QueryState) -> bool {
        match (self, next) {
            (Self::Sent, Self::AwaitingProof) => true,
            (Self::AwaitingProof, Self::Verified) => true,
            (Self::Sent | Self::AwaitingProof, Self::Failed) => true,
            (Self::Sent | Self::AwaitingProof, Self::Expired) => true,
            _ => false,
        }
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Failed | Self::Expired)
    }
}
