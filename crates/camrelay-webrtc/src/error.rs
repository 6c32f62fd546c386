use std::time::Duration;

use camrelay_core::{RelayError, VideoCodec};
use thiserror::Error;
use tracing::warn;

/// WebRTC egress errors. Callers in `camrelay-server` map these
/// onto the shared [`RelayError`] taxonomy for HTTP/signaling responses.
#[derive(Debug, Error)]
pub enum WebRtcError {
    #[error("peer capacity exceeded ({current}/{max})")]
    Capacity { current: usize, max: usize },

    #[error("source codec not established within {0:?}")]
    CodecWaitTimeout(Duration),

    /// The offer's video m-section is incompatible with the stream's ingest
    /// codec — this relay never transcodes, so a mismatch is terminal for
    /// the offer.
    #[error("offer advertised {offered:?}, incompatible with ingest codec {ingest}")]
    CodecMismatch {
        offered: Vec<VideoCodec>,
        ingest: VideoCodec,
    },

    #[error("sdp negotiation failed: {0}")]
    Negotiation(String),

    #[error("webrtc engine error: {0}")]
    Engine(#[from] webrtc::Error),

    #[error("no such peer")]
    NotFound,
}

impl WebRtcError {
    /// Rolls this error up into the workspace-wide taxonomy.
    #[must_use]
    pub fn into_relay_error(self) -> RelayError {
        match self {
            Self::Capacity { current, max } => {
                RelayError::Capacity(format!("{current}/{max} webrtc peers"))
            }
            Self::CodecWaitTimeout(_) => RelayError::StartTimeout,
            Self::CodecMismatch { offered, ingest } => RelayError::CodecMismatch {
                ingest: Some(ingest),
                requested: offered.first().copied(),
            },
            Self::Negotiation(msg) => {
                warn!(error = %msg, "sdp negotiation failed");
                RelayError::PeerFailed
            }
            Self::Engine(e) => {
                warn!(error = %e, "webrtc engine error");
                RelayError::PeerFailed
            }
            Self::NotFound => RelayError::NoSuchStream("peer".to_string()),
        }
    }
}
