//! # Relay Dispatcher
//!
//! Drives the query lifecycle on the origin side:
//!
//! ```text
//! submit ──► Sent ──ack──► AwaitingProof ──verified──► Verified
//!             │                 │
//!             ├──retries out────┴──► Failed
//!             └──deadline───────────► Expired
//! ```
//!
//! Send timeouts and rejected results draw on separate budgets of
//! `max_retries` each; re-dispatch is a bounded loop. Sends on one channel go
//! out in sequence order through that channel's send lane. Terminal outcomes
//! are pushed on an unbounded channel consumed by the origin application.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::store::PendingQueryStore;
use crate::algorithms::envelope_codec::{decode, encode};
use crate::config::InterchainQueryConfig;
use crate::domain::{
    invariant_icq_channel, invariant_next_sequence, ChannelEnd, ChannelId, ErrorAck,
    InterchainQueryError, PendingEntry, QueryEnvelope, QueryId, QueryOutcome, QueryRecord,
    QueryRequest, QueryResult, QueryState, TrustedConsensusState, INITIAL_SEQUENCE,
};
use crate::ports::{
    Clock, InboundEnvelope, InboundStream, InterchainQueryApi, ProofVerifier, ResultDisposition,
    SendOutcome, Transport,
};

/// Receiving end of the origin callback queue.
pub type OutcomeReceiver = mpsc::UnboundedReceiver<QueryOutcome>;

/// Origin-side relay dispatcher.
pub struct RelayDispatcher<T: Transport, V: ProofVerifier> {
    /// Configuration.
    config: InterchainQueryConfig,
    /// Channel transport.
    transport: Arc<T>,
    /// Result verification.
    verifier: V,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// In-flight and finalized queries.
    store: PendingQueryStore,
    /// Open channels.
    channels: DashMap<ChannelId, ChannelEnd>,
    /// Next expected request sequence per channel.
    next_sequence: DashMap<ChannelId, u64>,
    /// Held for the whole dispatch of one request per channel.
    send_lanes: DashMap<ChannelId, Arc<Mutex<()>>>,
    /// Origin callback queue.
    outcomes: mpsc::UnboundedSender<QueryOutcome>,
    /// Verified queries so far.
    verified: AtomicU64,
}

impl<T: Transport, V: ProofVerifier> RelayDispatcher<T, V> {
    /// Create a dispatcher and the queue its outcomes are delivered on.
    pub fn new(
        config: InterchainQueryConfig,
        transport: Arc<T>,
        verifier: V,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, OutcomeReceiver), InterchainQueryError> {
        config.validate()?;
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            config,
            transport,
            verifier,
            clock,
            store: PendingQueryStore::new(),
            channels: DashMap::new(),
            next_sequence: DashMap::new(),
            send_lanes: DashMap::new(),
            outcomes,
            verified: AtomicU64::new(0),
        };
        Ok((dispatcher, receiver))
    }

    /// Configuration in use.
    pub fn config(&self) -> &InterchainQueryConfig {
        &self.config
    }

    /// Queries verified so far.
    pub fn verified_count(&self) -> u64 {
        self.verified.load(Ordering::SeqCst)
    }

    /// Queries still in flight.
    pub fn pending_count(&self) -> usize {
        self.store.len()
    }

    /// Next sequence `submit` will accept on a channel.
    pub fn next_sequence(&self, channel: &ChannelId) -> Option<u64> {
        self.next_sequence.get(channel).map(|next| *next)
    }

    async fn handle_inbound(&self, inbound: InboundEnvelope, trusted: TrustedConsensusState) {
        let envelope = match decode(&inbound.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %inbound.channel, error = %e, "Dropping malformed envelope");
                return;
            }
        };
        if envelope.query_id().channel != inbound.channel {
            warn!(
                channel = %inbound.channel,
                query_id = %envelope.query_id(),
                "Envelope arrived on the wrong channel"
            );
            return;
        }

        match envelope {
            QueryEnvelope::Result(result) => {
                let id = result.request_id.clone();
                match self.on_result(result, &trusted).await {
                    Ok(disposition) => debug!(query_id = %id, ?disposition, "Result handled"),
                    Err(e) => warn!(query_id = %id, error = %e, "Result rejected"),
                }
            }
            QueryEnvelope::Error(ack) => {
                let id = ack.request_id.clone();
                if let Err(e) = self.on_error_ack(ack) {
                    warn!(query_id = %id, error = %e, "Error ack rejected");
                }
            }
            QueryEnvelope::Request(request) => {
                warn!(query_id = %request.id, "Request envelope on the controller side");
            }
        }
    }

    /// Dispatch while holding the channel's send lane.
    async fn dispatch_in_turn(
        &self,
        request: &QueryRequest,
        envelope: &[u8],
    ) -> Result<QueryState, InterchainQueryError> {
        let Some(lane) = self.lane(&request.id.channel) else {
            return self.current_state(&request.id);
        };
        let _turn = lane.lock().await;
        self.dispatch(request, envelope).await
    }

    fn lane(&self, channel: &ChannelId) -> Option<Arc<Mutex<()>>> {
        self.send_lanes.get(channel).map(|lane| Arc::clone(lane.value()))
    }

    /// Send until acknowledged, `max_retries` sends fail, or the entry is
    /// finalized elsewhere. Returns the state the entry is in afterwards.
    async fn dispatch(
        &self,
        request: &QueryRequest,
        envelope: &[u8],
    ) -> Result<QueryState, InterchainQueryError> {
        let id = &request.id;
        let channel = &id.channel;
        let send_timeout = self.config.send_timeout(channel);
        let mut failed_sends = 0u32;

        loop {
            let sent = tokio::time::timeout(
                send_timeout,
                self.transport.send(channel, envelope.to_vec()),
            )
            .await;

            let reason = match sent {
                Ok(Ok(SendOutcome::Acknowledged { packet_sequence })) => {
                    debug!(query_id = %id, packet_sequence, "Request acknowledged");
                    return self.mark_delivered(id);
                }
                Ok(Ok(SendOutcome::TimedOut)) => {
                    InterchainQueryError::Network(format!("no acknowledgement on {channel}"))
                }
                Err(_) => InterchainQueryError::Network(format!(
                    "send on {channel} exceeded {}ms",
                    send_timeout.as_millis()
                )),
                Ok(Err(e)) if e.is_retryable() => e,
                Ok(Err(e)) => return Ok(self.fail(id, e)),
            };

            let retries = match self.store.record_retry(id, reason.clone()) {
                Ok(retries) => retries,
                // Finalized by the sweeper or a channel close while sending.
                Err(_) => return self.current_state(id),
            };
            failed_sends += 1;
            if failed_sends >= self.config.max_retries {
                return Ok(self.fail(id, reason));
            }
            warn!(query_id = %id, failed_sends, retries, error = %reason, "Dispatch attempt failed, retrying");
        }
    }

    /// Sent -> AwaitingProof, tolerating a result that already moved it on.
    fn mark_delivered(&self, id: &QueryId) -> Result<QueryState, InterchainQueryError> {
        match self.store.transition(id, QueryState::AwaitingProof) {
            Ok(entry) => Ok(entry.state),
            Err(InterchainQueryError::InvalidTransition { from, .. }) => Ok(from),
            Err(e) => Err(e),
        }
    }

    fn current_state(&self, id: &QueryId) -> Result<QueryState, InterchainQueryError> {
        self.store
            .record(id)
            .map(|record| record.state)
            .ok_or_else(|| InterchainQueryError::UnknownRequest(id.clone()))
    }

    /// Fail an entry and report it. Returns the state the entry ends in.
    fn fail(&self, id: &QueryId, reason: InterchainQueryError) -> QueryState {
        match self.store.fail(id, reason.clone()) {
            Ok(entry) => {
                warn!(query_id = %id, retries = entry.retries, error = %reason, "Query failed");
                self.emit(QueryOutcome::Failed {
                    request: entry.request,
                    reason,
                    retries: entry.retries,
                });
                QueryState::Failed
            }
            Err(InterchainQueryError::InvalidTransition { from, .. }) => from,
            Err(_) => QueryState::Failed,
        }
    }

    fn expire(&self, entry: PendingEntry) -> QueryOutcome {
        warn!(
            query_id = %entry.id(),
            deadline_ms = entry.deadline_ms,
            retries = entry.retries,
            "Query expired"
        );
        let outcome = QueryOutcome::Expired {
            request: entry.request,
            deadline_ms: entry.deadline_ms,
        };
        self.emit(outcome.clone());
        outcome
    }

    fn emit(&self, outcome: QueryOutcome) {
        let id = outcome.id().clone();
        if self.outcomes.send(outcome).is_err() {
            warn!(query_id = %id, "Origin callback queue closed, outcome dropped");
        }
    }

    async fn retry_after(
        &self,
        entry: &PendingEntry,
        reason: InterchainQueryError,
    ) -> Result<ResultDisposition, InterchainQueryError> {
        let id = entry.id();
        let retries = match self.store.record_rejection(id, reason.clone()) {
            Ok(retries) => retries,
            Err(_) => return Err(InterchainQueryError::UnknownRequest(id.clone())),
        };
        if retries >= self.config.max_retries {
            self.fail(id, reason.clone());
            return Ok(ResultDisposition::Failed { reason });
        }

        warn!(query_id = %id, retries, error = %reason, "Result rejected, re-dispatching");
        let envelope = encode(&QueryEnvelope::Request(entry.request.clone()))?;
        match self.dispatch_in_turn(&entry.request, &envelope).await? {
            QueryState::Failed | QueryState::Expired => Ok(ResultDisposition::Failed { reason }),
            _ => Ok(ResultDisposition::Retrying { retries, reason }),
        }
    }
}

#[async_trait]
impl<T: Transport, V: ProofVerifier> InterchainQueryApi for RelayDispatcher<T, V> {
    fn open_channel(&self, end: ChannelEnd) -> Result<(), InterchainQueryError> {
        invariant_icq_channel(&end)?;
        let state = self
            .transport
            .channel_state(&end.channel_id)
            .ok_or_else(|| InterchainQueryError::UnknownChannel(end.channel_id.clone()))?;
        if state.counterparty_channel_id != end.counterparty_channel_id {
            return Err(InterchainQueryError::InvalidChannel(format!(
                "{} is connected to {}, not {}",
                end.channel_id, state.counterparty_channel_id, end.counterparty_channel_id
            )));
        }

        info!(
            channel = %end.channel_id,
            counterparty = %end.counterparty_channel_id,
            port = %end.port_id,
            version = %end.version,
            "Channel opened"
        );
        self.next_sequence
            .entry(end.channel_id.clone())
            .or_insert(INITIAL_SEQUENCE);
        self.send_lanes.entry(end.channel_id.clone()).or_default();
        self.channels.insert(end.channel_id.clone(), end);
        Ok(())
    }

    async fn submit(&self, mut request: QueryRequest) -> Result<QueryState, InterchainQueryError> {
        let channel = request.id.channel.clone();
        if !self.channels.contains_key(&channel) {
            return Err(InterchainQueryError::UnknownChannel(channel));
        }
        if request.submitted_at_ms == 0 {
            request.submitted_at_ms = self.clock.now_ms();
        }
        let deadline_ms = request
            .submitted_at_ms
            .saturating_add(self.config.query_timeout_ms());
        let envelope = encode(&QueryEnvelope::Request(request.clone()))?;

        // Sequence check and first send happen in one turn of the lane, so
        // requests reach the transport in sequence order.
        let lane = self
            .lane(&channel)
            .ok_or_else(|| InterchainQueryError::UnknownChannel(channel.clone()))?;
        let _turn = lane.lock().await;
        {
            let mut next = self
                .next_sequence
                .get_mut(&channel)
                .ok_or_else(|| InterchainQueryError::UnknownChannel(channel.clone()))?;
            if self.store.contains(&request.id) {
                return Err(InterchainQueryError::DuplicateRequest(request.id.clone()));
            }
            invariant_next_sequence(&channel, *next, request.id.sequence)?;
            self.store
                .put(PendingEntry::new(request.clone(), deadline_ms))?;
            *next += 1;
        }

        info!(
            query_id = %request.id,
            path = %request.path,
            initiator = ?request.initiator,
            deadline_ms,
            "Query submitted"
        );
        self.dispatch(&request, &envelope).await
    }

    async fn on_result(
        &self,
        result: QueryResult,
        trusted: &TrustedConsensusState,
    ) -> Result<ResultDisposition, InterchainQueryError> {
        let id = result.request_id.clone();
        let Some(entry) = self.store.get(&id) else {
            return match self.store.finalized(&id) {
                Some(record) if record.state == QueryState::Verified => {
                    debug!(query_id = %id, "Duplicate result ignored");
                    Ok(ResultDisposition::AlreadyVerified)
                }
                _ => Err(InterchainQueryError::UnknownRequest(id)),
            };
        };

        let now_ms = self.clock.now_ms();
        if entry.is_expired(now_ms) {
            if let Some(expired) = self.store.expire(&id, now_ms) {
                self.expire(expired);
            }
            return Err(InterchainQueryError::Expired {
                id,
                deadline_ms: entry.deadline_ms,
            });
        }

        // A result implies delivery even if the ack has not been seen yet.
        if entry.state == QueryState::Sent {
            self.mark_delivered(&id)?;
        }

        match self.verifier.verify(&entry.request, &result, trusted) {
            Ok(()) => match self.store.verify(&id, result.clone()) {
                Ok(done) => {
                    self.verified.fetch_add(1, Ordering::SeqCst);
                    info!(
                        query_id = %id,
                        height = result.proven_height,
                        retries = done.retries,
                        "Query verified"
                    );
                    self.emit(QueryOutcome::Verified {
                        request: done.request,
                        result,
                    });
                    Ok(ResultDisposition::Verified)
                }
                Err(InterchainQueryError::InvalidTransition {
                    from: QueryState::Verified,
                    ..
                }) => Ok(ResultDisposition::AlreadyVerified),
                Err(InterchainQueryError::InvalidTransition { .. }) => {
                    Err(InterchainQueryError::UnknownRequest(id))
                }
                Err(e) => Err(e),
            },
            Err(reason) if reason.is_retryable() => self.retry_after(&entry, reason).await,
            Err(reason) => {
                self.fail(&id, reason.clone());
                Ok(ResultDisposition::Failed { reason })
            }
        }
    }

    fn on_error_ack(&self, ack: ErrorAck) -> Result<(), InterchainQueryError> {
        let id = ack.request_id;
        if self.store.get(&id).is_none() {
            return Err(InterchainQueryError::UnknownRequest(id));
        }
        let reason = InterchainQueryError::HostRejected {
            id: id.clone(),
            reason: ack.reason,
        };
        match self.fail(&id, reason) {
            QueryState::Failed => Ok(()),
            _ => Err(InterchainQueryError::UnknownRequest(id)),
        }
    }

    fn sweep(&self) -> Vec<QueryOutcome> {
        self.store
            .sweep_expired(self.clock.now_ms())
            .into_iter()
            .map(|entry| self.expire(entry))
            .collect()
    }

    fn close_channel(&self, channel: &ChannelId) -> Result<usize, InterchainQueryError> {
        if self.channels.remove(channel).is_none() {
            return Err(InterchainQueryError::UnknownChannel(channel.clone()));
        }
        self.next_sequence.remove(channel);
        self.send_lanes.remove(channel);
        self.transport.close(channel);

        let reason = InterchainQueryError::ChannelClosed(channel.clone());
        let drained = self.store.drain_channel(channel, &reason);
        for entry in &drained {
            self.emit(QueryOutcome::Failed {
                request: entry.request.clone(),
                reason: reason.clone(),
                retries: entry.retries,
            });
        }
        info!(%channel, drained = drained.len(), "Channel closed");
        Ok(drained.len())
    }

    fn query_state(&self, id: &QueryId) -> Option<QueryRecord> {
        self.store.record(id)
    }
}

impl<T, V> RelayDispatcher<T, V>
where
    T: Transport + 'static,
    V: ProofVerifier + 'static,
{
    /// Consume inbound envelopes until the stream ends or shutdown fires.
    ///
    /// Each envelope is handled on its own task against the trusted state
    /// current at arrival, so a re-dispatch stalled on one channel does not
    /// hold up results for the others.
    pub async fn run_inbound(
        self: Arc<Self>,
        mut inbound: InboundStream,
        trusted: watch::Receiver<TrustedConsensusState>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Inbound relay loop started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = inbound.next() => match next {
                    Some(envelope) => {
                        let snapshot = trusted.borrow().clone();
                        let dispatcher = Arc::clone(&self);
                        tokio::spawn(async move {
                            dispatcher.handle_inbound(envelope, snapshot).await;
                        });
                    }
                    None => break,
                },
            }
        }
        info!("Inbound relay loop stopped");
    }
}

/// Run `sweep` every `interval` until shutdown fires.
pub fn spawn_sweeper<T, V>(
    dispatcher: Arc<RelayDispatcher<T, V>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Transport + 'static,
    V: ProofVerifier + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let expired = dispatcher.sweep();
                    if !expired.is_empty() {
                        debug!(count = expired.len(), "Sweep expired queries");
                    }
                }
            }
        }
        debug!("Sweeper stopped");
    })
}
