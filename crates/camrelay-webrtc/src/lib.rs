//! WebRTC SFU-style egress: negotiates one `RTCPeerConnection`
//! per subscriber and forwards a stream's raw RTP packets onto it
//! untranscoded, never decoding or re-encoding media.

pub mod error;
pub mod manager;
pub mod media_engine;
pub mod peer;
pub mod sdp_codec;

pub use error::WebRtcError;
pub use manager::PeerManager;
pub use peer::{PeerId, WebRtcPeer};
