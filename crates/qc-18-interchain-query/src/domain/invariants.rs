//! # Domain Invariants
//!
//! Rules every query lifecycle must respect.

use super::entities::{ChannelEnd, TrustedConsensusState};
use super::errors::{Hash, InterchainQueryError};
use super::value_objects::{ChannelId, Height, HOST_PORT, ICQ_VERSION};

/// Default number of failed dispatch attempts before a query fails.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// First sequence on a freshly opened channel.
pub const INITIAL_SEQUENCE: u64 = 1;

/// Invariant: per-channel monotonic sequencing.
///
/// A request must carry exactly the next sequence its channel expects.
pub fn invariant_next_sequence(
    channel: &ChannelId,
    expected: u64,
    got: u64,
) -> Result<(), InterchainQueryError> {
    if got != expected {
        return Err(InterchainQueryError::SequenceGap {
            channel: channel.clone(),
            expected,
            got,
        });
    }
    Ok(())
}

/// Invariant: ICQ channels speak `icq-1` to the host port.
pub fn invariant_icq_channel(end: &ChannelEnd) -> Result<(), InterchainQueryError> {
    if end.version != ICQ_VERSION {
        return Err(InterchainQueryError::InvalidChannel(format!(
            "{}: version {} (expected {})",
            end.channel_id, end.version, ICQ_VERSION
        )));
    }
    if end.counterparty_port_id.as_str() != HOST_PORT {
        return Err(InterchainQueryError::InvalidChannel(format!(
            "{}: counterparty port {} (expected {})",
            end.channel_id, end.counterparty_port_id, HOST_PORT
        )));
    }
    Ok(())
}

/// Invariant: a proof can only be checked against a height we trust.
///
/// Returns the trusted root at `height`.
pub fn invariant_height_trusted(
    height: Height,
    trusted: &TrustedConsensusState,
) -> Result<&Hash, InterchainQueryError> {
    let unknown = || InterchainQueryError::HeightUnknown {
        height,
        latest: trusted.latest_height,
    };
    if height > trusted.latest_height {
        return Err(unknown());
    }
    trusted.root_at(height).ok_or_else(unknown)
}
