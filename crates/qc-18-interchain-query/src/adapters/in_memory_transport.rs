//! In-Memory Transport Adapter
//!
//! Implements the `Transport` port by linking two endpoints in-process, the
//! way a relayer links two chains. Supports fault injection (dropped
//! acknowledgements, stalled sends) for exercising timeout handling.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::domain::{ChannelId, ChannelState, InterchainQueryError};
use crate::ports::{InboundEnvelope, InboundStream, SendOutcome, Transport};

/// Inbound buffer per subscriber.
const INBOUND_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Faults {
    drop_acks: u32,
    stall: bool,
}

struct Endpoint {
    name: String,
    channels: Mutex<HashMap<ChannelId, ChannelState>>,
    closed: Mutex<HashSet<ChannelId>>,
    inbound: broadcast::Sender<InboundEnvelope>,
    peer_inbound: broadcast::Sender<InboundEnvelope>,
    faults: Mutex<Faults>,
    delivered: AtomicU64,
}

/// One side of an in-process channel pair.
#[derive(Clone)]
pub struct InMemoryTransport {
    endpoint: Arc<Endpoint>,
}

impl InMemoryTransport {
    /// Two linked endpoints (`origin`, `host`) with one open channel.
    pub fn pair(origin_channel: ChannelId, host_channel: ChannelId) -> (Self, Self) {
        let (origin_tx, _) = broadcast::channel(INBOUND_CAPACITY);
        let (host_tx, _) = broadcast::channel(INBOUND_CAPACITY);

        let origin = Self::endpoint("origin", origin_tx.clone(), host_tx.clone());
        let host = Self::endpoint("host", host_tx, origin_tx);
        Self::link_channel(&origin, &host, origin_channel, host_channel);
        (origin, host)
    }

    fn endpoint(
        name: &str,
        inbound: broadcast::Sender<InboundEnvelope>,
        peer_inbound: broadcast::Sender<InboundEnvelope>,
    ) -> Self {
        Self {
            endpoint: Arc::new(Endpoint {
                name: name.to_string(),
                channels: Mutex::new(HashMap::new()),
                closed: Mutex::new(HashSet::new()),
                inbound,
                peer_inbound,
                faults: Mutex::new(Faults::default()),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Open another channel between two linked endpoints.
    pub fn link_channel(a: &Self, b: &Self, a_channel: ChannelId, b_channel: ChannelId) {
        a.endpoint.channels.lock().insert(
            a_channel.clone(),
            ChannelState::new(a_channel.clone(), b_channel.clone()),
        );
        b.endpoint
            .channels
            .lock()
            .insert(b_channel.clone(), ChannelState::new(b_channel, a_channel));
    }

    /// Report the next `n` sends as timed out without delivering them.
    pub fn drop_next_acks(&self, n: u32) {
        self.endpoint.faults.lock().drop_acks = n;
    }

    /// Make every send hang until cancelled.
    pub fn set_stalled(&self, stalled: bool) {
        self.endpoint.faults.lock().stall = stalled;
    }

    /// Envelopes delivered to the peer so far.
    pub fn delivered_count(&self) -> u64 {
        self.endpoint.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(
        &self,
        channel: &ChannelId,
        envelope: Vec<u8>,
    ) -> Result<SendOutcome, InterchainQueryError> {
        let (packet_sequence, counterparty) = {
            if self.endpoint.closed.lock().contains(channel) {
                return Err(InterchainQueryError::ChannelClosed(channel.clone()));
            }
            let mut channels = self.endpoint.channels.lock();
            let state = channels
                .get_mut(channel)
                .ok_or_else(|| InterchainQueryError::UnknownChannel(channel.clone()))?;
            (state.reserve_sequence(), state.counterparty_channel_id.clone())
        };

        let (stall, drop_ack) = {
            let mut faults = self.endpoint.faults.lock();
            let drop_ack = faults.drop_acks > 0;
            if drop_ack {
                faults.drop_acks -= 1;
            }
            (faults.stall, drop_ack)
        };
        if stall {
            debug!(endpoint = %self.endpoint.name, %channel, "Send stalled");
            std::future::pending::<()>().await;
        }
        if drop_ack {
            // Waits out the missing ack before reporting it.
            tokio::task::yield_now().await;
            warn!(endpoint = %self.endpoint.name, %channel, packet_sequence, "Ack dropped");
            return Ok(SendOutcome::TimedOut);
        }

        let inbound = InboundEnvelope {
            channel: counterparty,
            bytes: envelope,
        };
        if self.endpoint.peer_inbound.send(inbound).is_err() {
            // Nobody is listening on the other side, so nothing can acknowledge.
            warn!(endpoint = %self.endpoint.name, %channel, "No receiver on counterparty");
            return Ok(SendOutcome::TimedOut);
        }

        self.endpoint.delivered.fetch_add(1, Ordering::SeqCst);
        if let Some(state) = self.endpoint.channels.lock().get_mut(channel) {
            state.acknowledge(packet_sequence);
        }
        debug!(endpoint = %self.endpoint.name, %channel, packet_sequence, "Envelope delivered");
        Ok(SendOutcome::Acknowledged { packet_sequence })
    }

    fn receive(&self) -> InboundStream {
        let name = self.endpoint.name.clone();
        let stream = BroadcastStream::new(self.endpoint.inbound.subscribe()).filter_map(
            move |item| match item {
                Ok(envelope) => Some(envelope),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(endpoint = %name, skipped, "Inbound subscriber lagged");
                    None
                }
            },
        );
        Box::pin(stream)
    }

    fn channel_state(&self, channel: &ChannelId) -> Option<ChannelState> {
        if self.endpoint.closed.lock().contains(channel) {
            return None;
        }
        self.endpoint.channels.lock().get(channel).cloned()
    }

    fn close(&self, channel: &ChannelId) {
        self.endpoint.closed.lock().insert(channel.clone());
        debug!(endpoint = %self.endpoint.name, %channel, "Channel closed");
    }
}
