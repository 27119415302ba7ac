//! # Interchain Query Relay Scenarios
//!
//! End-to-end runs of an origin dispatcher and a host executor linked by the
//! in-memory transport.
//!
//! ## Topology
//!
//! ```text
//! RelayDispatcher ── channel-0 ══ channel-1 ── QueryHost ── MockHostChain
//!        │
//!        └── outcomes (origin application callback)
//! ```

use std::sync::Arc;
use std::time::Duration;

use qc_18_interchain_query::adapters::{InMemoryTransport, ManualClock, MockHostChain, SystemClock};
use qc_18_interchain_query::algorithms::schema::BALANCE_PATH;
use qc_18_interchain_query::algorithms::{decode_request, encode, CommitmentProofVerifier};
use qc_18_interchain_query::application::{spawn_sweeper, OutcomeReceiver, QueryHost, RelayDispatcher};
use qc_18_interchain_query::{
    decode_response, ChainNode, ChannelEnd, ChannelId, Clock, DecodedResponse, HostConfig,
    Initiator, InterchainQueryApi, InterchainQueryConfig, InterchainQueryError, PortId,
    QueryEnvelope, QueryId, QueryOutcome, QueryRequest, QueryState, ResultDisposition, Transport,
    TrustedConsensusState, ALL_BALANCES_PATH,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;

// =============================================================================
// TEST HELPERS
// =============================================================================

/// Request bytes from the motivating scenario, carried verbatim.
const QUERY_DATA: &[u8] = b"eyJhZGRyZXNzIjoiYWRkcmVzcyJ9";

const BALANCES: &str = r#"{"balances":[{"denom":"uatom","amount":"1000000"},{"denom":"stake","amount":"42"}],"pagination":{"next_key":null,"total":"2"}}"#;

const PROOF_HEIGHT: u64 = 100;

type Dispatcher = RelayDispatcher<InMemoryTransport, CommitmentProofVerifier>;

struct Network {
    dispatcher: Arc<Dispatcher>,
    outcomes: OutcomeReceiver,
    origin: Arc<InMemoryTransport>,
    host_transport: InMemoryTransport,
    host_chain: Arc<MockHostChain>,
    host: Arc<QueryHost<MockHostChain>>,
    trusted: watch::Sender<TrustedConsensusState>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Network {
    /// Linked origin and host with the balance committed at `PROOF_HEIGHT`.
    /// The origin inbound loop always runs; the host loop only if `serve_host`.
    fn start(
        config: InterchainQueryConfig,
        host_config: HostConfig,
        clock: Arc<dyn Clock>,
        serve_host: bool,
    ) -> Self {
        let (origin, host_transport) = InMemoryTransport::pair(ChannelId::new(0), ChannelId::new(1));
        let origin = Arc::new(origin);

        let host_chain = Arc::new(MockHostChain::new("host-1"));
        host_chain.set_query_response(ALL_BALANCES_PATH, QUERY_DATA, BALANCES);
        host_chain.commit_at(PROOF_HEIGHT);
        let host = Arc::new(QueryHost::new(Arc::clone(&host_chain), host_config));

        let (dispatcher, outcomes) = RelayDispatcher::new(
            config,
            Arc::clone(&origin),
            CommitmentProofVerifier::new(),
            clock,
        )
        .expect("valid config");
        let dispatcher = Arc::new(dispatcher);
        dispatcher
            .open_channel(ChannelEnd::icq(ChannelId::new(0), ChannelId::new(1)))
            .expect("channel opens");

        let (trusted, trusted_rx) = watch::channel(host_chain.trusted_state());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        // Subscribe before anything is sent.
        let origin_inbound = origin.receive();
        let host_inbound = host_transport.receive();

        let d = Arc::clone(&dispatcher);
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            d.run_inbound(origin_inbound, trusted_rx, rx).await;
        }));

        if serve_host {
            let h = Arc::clone(&host);
            let t = host_transport.clone();
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                h.serve(&t, host_inbound, rx).await;
            }));
        }

        Self {
            dispatcher,
            outcomes,
            origin,
            host_transport,
            host_chain,
            host,
            trusted,
            shutdown,
            tasks,
        }
    }

    fn serving() -> Self {
        Self::start(
            InterchainQueryConfig::for_testing(),
            HostConfig::default(),
            Arc::new(SystemClock),
            true,
        )
    }

    async fn next_outcome(&mut self) -> QueryOutcome {
        timeout(Duration::from_secs(2), self.outcomes.recv())
            .await
            .expect("outcome within timeout")
            .expect("outcome queue open")
    }

    async fn assert_quiet(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(self.outcomes.try_recv().is_err(), "unexpected extra outcome");
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = timeout(Duration::from_secs(1), task).await;
        }
    }
}

fn balance_request(seq: u64) -> QueryRequest {
    QueryRequest::new(
        QueryId::new(ChannelId::new(0), seq),
        ALL_BALANCES_PATH,
        QUERY_DATA.to_vec(),
    )
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[tokio::test]
async fn test_all_balances_round_trip() {
    let mut net = Network::serving();
    let request = balance_request(1);
    let id = request.id.clone();
    assert_eq!(id.to_string(), "channel-0/1");

    // The origin chain records the query transaction before the relay picks it up.
    let origin_chain = MockHostChain::new("origin-1");
    let tx_hash = origin_chain.submit_tx(&request).await.unwrap();
    assert_eq!(origin_chain.submitted_txs(), vec![tx_hash]);

    assert_eq!(
        net.dispatcher.submit(request).await.unwrap(),
        QueryState::AwaitingProof
    );
    assert_eq!(
        net.dispatcher.query_state(&id).unwrap().state,
        QueryState::AwaitingProof
    );

    match net.next_outcome().await {
        QueryOutcome::Verified { request, result } => {
            assert_eq!(request.id, id);
            assert_eq!(result.proven_height, PROOF_HEIGHT);
            match decode_response(ALL_BALANCES_PATH, &result.response_data).unwrap() {
                DecodedResponse::AllBalances(balances) => {
                    assert_eq!(balances.balances.len(), 2);
                    assert_eq!(balances.balances[0].denom, "uatom");
                    assert_eq!(balances.balances[0].amount, "1000000");
                    assert_eq!(balances.pagination.total, "2");
                }
                other => panic!("Expected balances, got {:?}", other),
            }
        }
        other => panic!("Expected Verified, got {:?}", other),
    }
    net.assert_quiet().await;

    let record = net.dispatcher.query_state(&id).unwrap();
    assert_eq!(record.state, QueryState::Verified);
    assert_eq!(record.retries, 0);
    assert!(record.result.is_some());
    assert_eq!(net.dispatcher.verified_count(), 1);
    assert_eq!(net.dispatcher.pending_count(), 0);
    net.stop().await;
}

#[tokio::test]
async fn test_sequence_gap_rejected() {
    let net = Network::serving();
    net.dispatcher.submit(balance_request(1)).await.unwrap();

    let err = net.dispatcher.submit(balance_request(3)).await.unwrap_err();
    assert_eq!(
        err,
        InterchainQueryError::SequenceGap {
            channel: ChannelId::new(0),
            expected: 2,
            got: 3,
        }
    );
    assert!(net.dispatcher.query_state(&QueryId::new(ChannelId::new(0), 3)).is_none());
    net.stop().await;
}

#[tokio::test]
async fn test_in_order_submissions_all_verify() {
    let mut net = Network::serving();
    for seq in 1..=5 {
        net.dispatcher.submit(balance_request(seq)).await.unwrap();
    }

    let mut verified = Vec::new();
    for _ in 0..5 {
        let outcome = net.next_outcome().await;
        assert_eq!(outcome.state(), QueryState::Verified);
        verified.push(outcome.id().sequence);
    }
    verified.sort_unstable();
    assert_eq!(verified, vec![1, 2, 3, 4, 5]);
    assert_eq!(net.dispatcher.verified_count(), 5);
    net.stop().await;
}

#[tokio::test]
async fn test_redelivered_result_is_noop() {
    let mut net = Network::serving();
    net.dispatcher.submit(balance_request(1)).await.unwrap();

    let result = match net.next_outcome().await {
        QueryOutcome::Verified { result, .. } => result,
        other => panic!("Expected Verified, got {:?}", other),
    };

    let trusted = net.host_chain.trusted_state();
    assert_eq!(
        net.dispatcher.on_result(result.clone(), &trusted).await.unwrap(),
        ResultDisposition::AlreadyVerified
    );

    // Same result over the wire.
    let bytes = encode(&QueryEnvelope::Result(result)).unwrap();
    net.host_transport.send(&ChannelId::new(1), bytes).await.unwrap();

    net.assert_quiet().await;
    assert_eq!(net.dispatcher.verified_count(), 1);
    net.stop().await;
}

#[tokio::test]
async fn test_late_proof_after_expiry() {
    let clock = Arc::new(ManualClock::default());
    let config = InterchainQueryConfig::for_testing();
    let deadline_after = config.query_timeout_ms();
    let mut net = Network::start(config, HostConfig::default(), clock.clone(), false);
    let mut host_inbound = net.host_transport.receive();

    net.dispatcher.submit(balance_request(1)).await.unwrap();

    // Host answers, but only after the deadline.
    let delivered = timeout(Duration::from_secs(1), host_inbound.next())
        .await
        .unwrap()
        .unwrap();
    let reply = net.host.handle_request(&delivered.bytes).await.unwrap();
    let result = match reply {
        QueryEnvelope::Result(result) => result,
        other => panic!("Expected Result, got {:?}", other),
    };
    clock.advance(deadline_after + 1);

    let trusted = net.host_chain.trusted_state();
    assert!(matches!(
        net.dispatcher.on_result(result.clone(), &trusted).await,
        Err(InterchainQueryError::Expired { .. })
    ));
    assert_eq!(net.next_outcome().await.state(), QueryState::Expired);

    assert!(matches!(
        net.dispatcher.on_result(result, &trusted).await,
        Err(InterchainQueryError::UnknownRequest(_))
    ));
    net.assert_quiet().await;
    assert_eq!(
        net.dispatcher
            .query_state(&QueryId::new(ChannelId::new(0), 1))
            .unwrap()
            .state,
        QueryState::Expired
    );
    assert_eq!(net.dispatcher.verified_count(), 0);
    net.stop().await;
}

#[tokio::test]
async fn test_invalid_proofs_exhaust_retries() {
    let mut net = Network::serving();
    net.host_chain.corrupt_next_proofs(10);

    net.dispatcher.submit(balance_request(1)).await.unwrap();

    match net.next_outcome().await {
        QueryOutcome::Failed {
            reason, retries, ..
        } => {
            assert_eq!(retries, 3);
            assert!(matches!(reason, InterchainQueryError::ProofInvalid(_)));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
    net.assert_quiet().await;

    // Initial dispatch plus two re-dispatches; nothing after the third rejection.
    assert_eq!(net.origin.delivered_count(), 3);
    assert_eq!(net.host.answered_count(), 3);
    assert_eq!(
        net.dispatcher
            .query_state(&QueryId::new(ChannelId::new(0), 1))
            .unwrap()
            .state,
        QueryState::Failed
    );
    net.stop().await;
}

#[tokio::test]
async fn test_invalid_proof_recovers_on_retry() {
    let mut net = Network::serving();
    net.host_chain.corrupt_next_proofs(1);

    net.dispatcher.submit(balance_request(1)).await.unwrap();
    assert_eq!(net.next_outcome().await.state(), QueryState::Verified);

    let record = net
        .dispatcher
        .query_state(&QueryId::new(ChannelId::new(0), 1))
        .unwrap();
    assert_eq!(record.retries, 1);
    assert_eq!(net.origin.delivered_count(), 2);
    net.stop().await;
}

#[tokio::test]
async fn test_pinned_height_queries() {
    let mut net = Network::serving();
    let updated = r#"{"balances":[{"denom":"uatom","amount":"7"}],"pagination":{"next_key":null,"total":"1"}}"#;
    net.host_chain
        .set_query_response(ALL_BALANCES_PATH, QUERY_DATA, updated);
    net.host_chain.commit_at(PROOF_HEIGHT + 1);
    // The origin light client learns about the new block.
    net.trusted.send_replace(net.host_chain.trusted_state());

    net.dispatcher
        .submit(balance_request(1).at_height(PROOF_HEIGHT + 1))
        .await
        .unwrap();
    net.dispatcher
        .submit(balance_request(2).at_height(PROOF_HEIGHT))
        .await
        .unwrap();

    for _ in 0..2 {
        match net.next_outcome().await {
            QueryOutcome::Verified { request, result } => {
                assert_eq!(Some(result.proven_height), request.height);
                let expected_first = if request.id.sequence == 1 { "7" } else { "1000000" };
                match decode_response(ALL_BALANCES_PATH, &result.response_data).unwrap() {
                    DecodedResponse::AllBalances(balances) => {
                        assert_eq!(balances.balances[0].amount, expected_first);
                    }
                    other => panic!("Expected balances, got {:?}", other),
                }
            }
            other => panic!("Expected Verified, got {:?}", other),
        }
    }
    net.stop().await;
}

#[tokio::test]
async fn test_host_allow_list_rejection() {
    let mut net = Network::start(
        InterchainQueryConfig::for_testing(),
        HostConfig::allowing([BALANCE_PATH]),
        Arc::new(SystemClock),
        true,
    );
    net.dispatcher.submit(balance_request(1)).await.unwrap();

    match net.next_outcome().await {
        QueryOutcome::Failed { reason, .. } => match reason {
            InterchainQueryError::HostRejected { id, reason } => {
                assert_eq!(id, QueryId::new(ChannelId::new(0), 1));
                assert!(reason.contains(ALL_BALANCES_PATH));
            }
            other => panic!("Expected HostRejected, got {:?}", other),
        },
        other => panic!("Expected Failed, got {:?}", other),
    }
    assert_eq!(net.host.rejected_count(), 1);
    net.stop().await;
}

#[tokio::test]
async fn test_contract_initiated_query() {
    let mut net = Network::serving();
    let contract = "wasm14hj2tavq8fpesdwxxcu44rty3hh90vhujrvcmstl4zr3txmfvw9s4hmalr";
    let end = ChannelEnd::icq(ChannelId::new(0), ChannelId::new(1)).with_port(PortId::wasm(contract));
    assert_eq!(end.port_id.as_str(), format!("wasm.{contract}"));
    net.dispatcher.open_channel(end).unwrap();

    let request = balance_request(1).with_initiator(Initiator::Contract(contract.to_string()));
    net.dispatcher.submit(request).await.unwrap();

    let outcome = net.next_outcome().await;
    assert_eq!(outcome.state(), QueryState::Verified);
    assert_eq!(
        outcome.request().initiator,
        Initiator::Contract(contract.to_string())
    );
    // Result counter as a contract would expose it.
    assert_eq!(net.dispatcher.verified_count(), 1);
    net.stop().await;
}

#[tokio::test]
async fn test_close_channel_fails_pending() {
    let mut net = Network::start(
        InterchainQueryConfig::for_testing(),
        HostConfig::default(),
        Arc::new(SystemClock),
        false,
    );
    // Host is subscribed but never answers.
    let _host_inbound = net.host_transport.receive();

    net.dispatcher.submit(balance_request(1)).await.unwrap();
    net.dispatcher.submit(balance_request(2)).await.unwrap();
    assert_eq!(net.dispatcher.close_channel(&ChannelId::new(0)).unwrap(), 2);

    for _ in 0..2 {
        match net.next_outcome().await {
            QueryOutcome::Failed { reason, .. } => {
                assert_eq!(reason, InterchainQueryError::ChannelClosed(ChannelId::new(0)));
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
    }
    assert_eq!(net.dispatcher.pending_count(), 0);
    assert!(matches!(
        net.dispatcher.close_channel(&ChannelId::new(0)),
        Err(InterchainQueryError::UnknownChannel(_))
    ));
    net.stop().await;
}

#[tokio::test]
async fn test_sweeper_expires_unanswered_queries() {
    let mut net = Network::start(
        InterchainQueryConfig::for_testing(),
        HostConfig::default(),
        Arc::new(SystemClock),
        false,
    );
    let mut host_inbound = net.host_transport.receive();
    let sweeper = spawn_sweeper(
        Arc::clone(&net.dispatcher),
        net.dispatcher.config().sweep_interval(),
        net.shutdown.subscribe(),
    );

    net.dispatcher.submit(balance_request(1)).await.unwrap();
    let delivered = host_inbound.next().await.unwrap();
    assert_eq!(
        decode_request(&delivered.bytes).unwrap().id,
        QueryId::new(ChannelId::new(0), 1)
    );

    match net.next_outcome().await {
        QueryOutcome::Expired {
            request,
            deadline_ms,
        } => {
            assert_eq!(
                deadline_ms,
                request.submitted_at_ms + net.dispatcher.config().query_timeout_ms()
            );
        }
        other => panic!("Expected Expired, got {:?}", other),
    }
    assert_eq!(net.dispatcher.pending_count(), 0);

    net.tasks.push(sweeper);
    net.stop().await;
}

#[tokio::test]
async fn test_malformed_inbound_is_dropped() {
    let mut net = Network::serving();
    net.host_transport
        .send(&ChannelId::new(1), b"garbage".to_vec())
        .await
        .unwrap();

    net.dispatcher.submit(balance_request(1)).await.unwrap();
    assert_eq!(net.next_outcome().await.state(), QueryState::Verified);
    net.stop().await;
}

#[tokio::test]
async fn test_unanswered_sends_fail_after_retries() {
    let mut net = Network::start(
        InterchainQueryConfig::for_testing(),
        HostConfig::default(),
        Arc::new(SystemClock),
        false,
    );
    // Nobody subscribed on the host side: every send goes unacknowledged.
    assert_eq!(
        net.dispatcher.submit(balance_request(1)).await.unwrap(),
        QueryState::Failed
    );
    match net.next_outcome().await {
        QueryOutcome::Failed {
            reason, retries, ..
        } => {
            assert_eq!(retries, 3);
            assert!(matches!(reason, InterchainQueryError::Network(_)));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
    net.stop().await;
}
