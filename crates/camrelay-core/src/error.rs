use serde::Serialize;
use thiserror::Error;

use crate::VideoCodec;

/// The error taxonomy shared by every crate in the workspace, so
/// that the server's HTTP/signaling layers can map a single enum to status
/// codes and envelope payloads without re-deriving the mapping per crate.
#[derive(Debug, Error, Clone, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum RelayError {
    #[error("no such stream: {0}")]
    NoSuchStream(String),

    #[error("codec mismatch: ingest={ingest:?} requested={requested:?}")]
    CodecMismatch {
        ingest: Option<VideoCodec>,
        requested: Option<VideoCodec>,
    },

    #[error("no supported codec offered by source")]
    NoSupportedCodec,

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("ensure-live did not converge within the configured bound")]
    StartTimeout,

    #[error("rtsp authentication failed")]
    AuthFailed,

    #[error("transient ingest error: {0}")]
    TransientIngest(String),

    #[error("peer connection failed")]
    PeerFailed,

    #[error("hls write failed: {0}")]
    HlsWriteFailed(String),

    #[error("codec drifted across reconnect: was {previous:?}, now {current:?}")]
    CodecDrift {
        previous: VideoCodec,
        current: VideoCodec,
    },
}

impl RelayError {
    /// Stable machine-readable code, used both in the signaling `error`
    /// envelope payload and as a `code` field on the HTTP error body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoSuchStream(_) => "NoSuchStream",
            Self::CodecMismatch { .. } => "CodecMismatch",
            Self::NoSupportedCodec => "NoSupportedCodec",
            Self::Capacity(_) => "Capacity",
            Self::StartTimeout => "StartTimeout",
            Self::AuthFailed => "AuthFailed",
            Self::TransientIngest(_) => "TransientIngest",
            Self::PeerFailed => "PeerFailed",
            Self::HlsWriteFailed(_) => "HLSWriteFailed",
            Self::CodecDrift { .. } => "CodecDrift",
        }
    }

    /// HTTP status this error surfaces as. Kinds that are
    /// strictly local to one leg (`TransientIngest`, `HLSWriteFailed`) never
    /// reach an HTTP handler in practice, but still get a sane default.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::NoSuchStream(_) => 404,
            Self::CodecMismatch { .. } | Self::CodecDrift { .. } => 409,
            Self::NoSupportedCodec | Self::AuthFailed => 422,
            Self::Capacity(_) | Self::StartTimeout => 503,
            Self::TransientIngest(_) | Self::PeerFailed | Self::HlsWriteFailed(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
