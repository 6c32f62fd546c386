use async_trait::async_trait;
use camrelay_core::RelayError;
use tracing::{info, warn};

use crate::connection::ConnectionId;
use crate::error::SignalingError;
use crate::message::{ClientMessage, ServerMessage};

/// What the signaling endpoint needs from the rest of the stream plane.
/// `camrelay-server` implements this over its `StreamManager`/`PeerManager`
/// pair; this crate only knows the envelope shapes and the dispatch rule,
/// not WebRTC or ingest internals — the signaling transport is specified
/// only at the message layer.
#[async_trait]
pub trait SignalingHandler: Send + Sync {
    /// Handles an `offer`: ensure-live the named stream, negotiate a peer,
    /// and return the answer SDP. Any failure is rendered into the `error`
    /// envelope by the router.
    async fn handle_offer(
        &self,
        connection: ConnectionId,
        stream_id: &str,
        sdp: &str,
    ) -> Result<String, RelayError>;

    /// Handles a remote ICE `candidate`. Non-trickle operation is
    /// acceptable, so implementations may simply log this.
    fn handle_candidate(&self, connection: ConnectionId, candidate: &str);
}

/// Thin demuxer between one browser's message connection and the peer
/// manager: decodes the JSON envelope, tags it with the
/// connection identity, and dispatches by `type`.
pub struct SignalingRouter<H> {
    handler: H,
}

impl<H: SignalingHandler> SignalingRouter<H> {
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Dispatches one already-decoded inbound message. Returns `None` for
    /// message types that have no required reply (`candidate`).
    pub async fn dispatch(
        &self,
        connection: ConnectionId,
        message: ClientMessage,
    ) -> Option<ServerMessage> {
        match message {
            ClientMessage::Offer { sdp, stream_id } => {
                info!(%connection, stream = %stream_id, "offer received");
                match self.handler.handle_offer(connection, &stream_id, &sdp).await {
                    Ok(answer_sdp) => Some(ServerMessage::Answer(answer_sdp)),
                    Err(err) => {
                        warn!(%connection, stream = %stream_id, error = %err, "offer rejected");
                        Some(ServerMessage::Error(err.code().to_string()))
                    }
                }
            }
            ClientMessage::Candidate { candidate } => {
                self.handler.handle_candidate(connection, &candidate);
                None
            }
        }
    }

    /// Decodes a raw text frame and dispatches it, collapsing decode
    /// failures into an `error` envelope rather than dropping the
    /// connection — one malformed message should not end the session.
    pub async fn dispatch_text(
        &self,
        connection: ConnectionId,
        text: &str,
    ) -> Option<ServerMessage> {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.dispatch(connection, message).await,
            Err(err) => {
                let err = SignalingError::Decode(err);
                warn!(%connection, error = %err, "malformed signaling envelope");
                Some(ServerMessage::Error(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockHandler {
        candidates_seen: Arc<AtomicUsize>,
        answer: Result<String, RelayError>,
    }

    #[async_trait]
    impl SignalingHandler for MockHandler {
        async fn handle_offer(
            &self,
            _connection: ConnectionId,
            _stream_id: &str,
            _sdp: &str,
        ) -> Result<String, RelayError> {
            self.answer.clone()
        }

        fn handle_candidate(&self, _connection: ConnectionId, _candidate: &str) {
            self.candidates_seen.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn offer_success_yields_answer() {
        let router = SignalingRouter::new(MockHandler {
            candidates_seen: Arc::new(AtomicUsize::new(0)),
            answer: Ok("v=0 answer".to_string()),
        });
        let reply = router
            .dispatch(
                ConnectionId::new(),
                ClientMessage::Offer {
                    sdp: "v=0 offer".to_string(),
                    stream_id: "camA".to_string(),
                },
            )
            .await;
        assert!(matches!(reply, Some(ServerMessage::Answer(sdp)) if sdp == "v=0 answer"));
    }

    #[tokio::test]
    async fn offer_failure_yields_error_envelope() {
        let router = SignalingRouter::new(MockHandler {
            candidates_seen: Arc::new(AtomicUsize::new(0)),
            answer: Err(RelayError::CodecMismatch {
                ingest: None,
                requested: None,
            }),
        });
        let reply = router
            .dispatch(
                ConnectionId::new(),
                ClientMessage::Offer {
                    sdp: "v=0 offer".to_string(),
                    stream_id: "camA".to_string(),
                },
            )
            .await;
        assert!(matches!(reply, Some(ServerMessage::Error(code)) if code == "CodecMismatch"));
    }

    #[tokio::test]
    async fn candidate_has_no_reply() {
        let seen = Arc::new(AtomicUsize::new(0));
        let router = SignalingRouter::new(MockHandler {
            candidates_seen: seen.clone(),
            answer: Ok(String::new()),
        });
        let reply = router
            .dispatch(
                ConnectionId::new(),
                ClientMessage::Candidate {
                    candidate: "candidate:1 1 UDP 1 1.1.1.1 1 typ host".to_string(),
                },
            )
            .await;
        assert!(reply.is_none());
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn malformed_text_yields_error_without_panicking() {
        let router = SignalingRouter::new(MockHandler {
            candidates_seen: Arc::new(AtomicUsize::new(0)),
            answer: Ok(String::new()),
        });
        let reply = router.dispatch_text(ConnectionId::new(), "not json").await;
        assert!(matches!(reply, Some(ServerMessage::Error(_))));
    }
}
