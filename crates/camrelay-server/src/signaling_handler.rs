use std::sync::Arc;

use async_trait::async_trait;
use camrelay_core::RelayError;
use camrelay_signaling::{ConnectionId, SignalingHandler};
use camrelay_webrtc::PeerManager;
use tracing::debug;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::stream_manager::StreamManager;

/// Binds the message-layer [`SignalingHandler`] trait to this process's
/// `StreamManager`/`PeerManager` pair.
pub struct RelaySignalingHandler {
    stream_manager: Arc<StreamManager>,
    peer_manager: Arc<PeerManager>,
}

impl RelaySignalingHandler {
    #[must_use]
    pub fn new(stream_manager: Arc<StreamManager>, peer_manager: Arc<PeerManager>) -> Self {
        Self {
            stream_manager,
            peer_manager,
        }
    }
}

#[async_trait]
impl SignalingHandler for RelaySignalingHandler {
    async fn handle_offer(
        &self,
        connection: ConnectionId,
        stream_id: &str,
        sdp: &str,
    ) -> Result<String, RelayError> {
        let stream = self.stream_manager.ensure_live(stream_id).await?;

        let offer = RTCSessionDescription::offer(sdp.to_string()).map_err(|err| {
            debug!(%connection, error = %err, "malformed offer sdp");
            RelayError::PeerFailed
        })?;

        let (peer_id, answer) = self
            .peer_manager
            .negotiate(&stream, offer)
            .await
            .map_err(camrelay_webrtc::WebRtcError::into_relay_error)?;

        self.stream_manager.note_consumer_arrived(stream_id);
        debug!(%connection, peer = %peer_id, stream = stream_id, "peer negotiated");

        Ok(answer.sdp)
    }

    fn handle_candidate(&self, connection: ConnectionId, candidate: &str) {
        // Non-trickle operation: gathering completes before the
        // answer is sent, so a browser-side candidate has nothing left to
        // feed into. Logged for diagnostics only.
        debug!(%connection, candidate, "ice candidate received (non-trickle, logged only)");
    }
}
