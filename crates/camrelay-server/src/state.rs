use std::sync::Arc;
use std::time::Instant;

use camrelay_core::config::HlsConfig;
use camrelay_hls::HlsManager;
use camrelay_signaling::SignalingRouter;
use camrelay_webrtc::PeerManager;

use crate::signaling_handler::RelaySignalingHandler;
use crate::stream_manager::StreamManager;

/// Everything axum handlers need, shared process-wide: one process serves
/// every configured camera.
#[derive(Clone)]
pub struct AppState {
    pub stream_manager: Arc<StreamManager>,
    pub peer_manager: Arc<PeerManager>,
    pub hls_manager: Arc<HlsManager>,
    pub signaling: Arc<SignalingRouter<RelaySignalingHandler>>,
    pub hls_config: HlsConfig,
    pub started_at: Instant,
}
