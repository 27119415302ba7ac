//! # Query Host
//!
//! Host-side executor: answers request envelopes with a proven result from
//! the local chain node, or with an error envelope when the path is not on
//! the allow-list or the query fails.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::algorithms::envelope_codec::{decode_request, encode};
use crate::config::HostConfig;
use crate::domain::{ErrorAck, InterchainQueryError, QueryEnvelope, QueryRequest, QueryResult};
use crate::ports::{ChainNode, InboundEnvelope, InboundStream, SendOutcome, Transport};

/// Host-side query executor.
pub struct QueryHost<N: ChainNode> {
    node: Arc<N>,
    config: HostConfig,
    answered: AtomicU64,
    rejected: AtomicU64,
}

impl<N: ChainNode> QueryHost<N> {
    /// Create a host over a chain node.
    pub fn new(node: Arc<N>, config: HostConfig) -> Self {
        Self {
            node,
            config,
            answered: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Requests answered with a result.
    pub fn answered_count(&self) -> u64 {
        self.answered.load(Ordering::SeqCst)
    }

    /// Requests answered with an error.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Decode a request envelope and produce the reply envelope.
    ///
    /// Only undecodable input is an error; everything else is answered.
    pub async fn handle_request(&self, bytes: &[u8]) -> Result<QueryEnvelope, InterchainQueryError> {
        let request = decode_request(bytes)?;
        Ok(self.execute(request).await)
    }

    /// Run a request against the local node.
    pub async fn execute(&self, request: QueryRequest) -> QueryEnvelope {
        if !self.config.is_allowed(&request.path) {
            let reason = InterchainQueryError::QueryNotAllowed(request.path.clone());
            return self.reject(request, reason);
        }

        match self
            .node
            .query_state(&request.path, &request.data, request.height)
            .await
        {
            Ok(answer) => {
                self.answered.fetch_add(1, Ordering::SeqCst);
                debug!(
                    query_id = %request.id,
                    height = answer.height,
                    response_len = answer.response.len(),
                    "Query executed"
                );
                QueryEnvelope::Result(QueryResult {
                    request_id: request.id,
                    response_data: answer.response,
                    proof: answer.proof,
                    proven_height: answer.height,
                })
            }
            Err(e) => self.reject(request, e),
        }
    }

    fn reject(&self, request: QueryRequest, reason: InterchainQueryError) -> QueryEnvelope {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        warn!(query_id = %request.id, path = %request.path, error = %reason, "Query rejected");
        QueryEnvelope::Error(ErrorAck {
            request_id: request.id,
            reason: reason.to_string(),
        })
    }

    /// Answer requests from `inbound` over `transport` until the stream ends
    /// or shutdown fires.
    pub async fn serve<T: Transport>(
        &self,
        transport: &T,
        mut inbound: InboundStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Query host serving");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = inbound.next() => match next {
                    Some(envelope) => self.answer(transport, envelope).await,
                    None => break,
                },
            }
        }
        info!(
            answered = self.answered_count(),
            rejected = self.rejected_count(),
            "Query host stopped"
        );
    }

    async fn answer<T: Transport>(&self, transport: &T, inbound: InboundEnvelope) {
        let reply = match self.handle_request(&inbound.bytes).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(channel = %inbound.channel, error = %e, "Dropping undecodable request");
                return;
            }
        };
        let id = reply.query_id().clone();
        let bytes = match encode(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(query_id = %id, error = %e, "Failed to encode reply");
                return;
            }
        };

        match transport.send(&inbound.channel, bytes).await {
            Ok(SendOutcome::Acknowledged { packet_sequence }) => {
                debug!(query_id = %id, packet_sequence, "Reply delivered");
            }
            Ok(SendOutcome::TimedOut) => warn!(query_id = %id, "Reply not acknowledged"),
            Err(e) => warn!(query_id = %id, error = %e, "Reply send failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockHostChain;
    use crate::algorithms::envelope_codec::{decode, encode_request};
    use crate::algorithms::schema::ALL_BALANCES_PATH;
    use crate::domain::{ChannelId, QueryId};

    fn host() -> QueryHost<MockHostChain> {
        let node = MockHostChain::new("host-1");
        node.set_query_response(ALL_BALANCES_PATH, b"addr", b"{}".to_vec());
        node.commit_at(10);
        QueryHost::new(Arc::new(node), HostConfig::default())
    }

    fn request(path: &str) -> QueryRequest {
        QueryRequest::new(QueryId::new(ChannelId::new(0), 1), path, b"addr".to_vec())
    }

    #[tokio::test]
    async fn test_allowed_query_returns_result() {
        let host = host();
        let bytes = encode_request(&request(ALL_BALANCES_PATH)).unwrap();
        match host.handle_request(&bytes).await.unwrap() {
            QueryEnvelope::Result(result) => {
                assert_eq!(result.proven_height, 10);
                assert_eq!(result.response_data, b"{}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(host.answered_count(), 1);
    }

    #[tokio::test]
    async fn test_disallowed_query_returns_error() {
        let host = host();
        let reply = host
            .execute(request("/cosmos.staking.v1beta1.Query/Validators"))
            .await;
        match reply {
            QueryEnvelope::Error(ack) => assert!(ack.reason.contains("not allowed")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(host.rejected_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_query_returns_error() {
        let host = host();
        let reply = host.execute(request(ALL_BALANCES_PATH).at_height(99)).await;
        assert!(matches!(reply, QueryEnvelope::Error(_)));
    }

    #[tokio::test]
    async fn test_garbage_is_an_error() {
        let host = host();
        assert!(matches!(
            host.handle_request(b"not an envelope").await,
            Err(InterchainQueryError::MalformedEnvelope(_))
        ));
    }

    #[tokio::test]
    async fn test_reply_envelope_round_trips() {
        let host = host();
        let reply = host.execute(request(ALL_BALANCES_PATH)).await;
        let bytes = encode(&reply).unwrap();
        assert_eq!(decode(&bytes).unwrap(), reply);
    }
}
