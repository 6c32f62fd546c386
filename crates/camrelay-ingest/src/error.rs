use camrelay_core::RelayError;
use thiserror::Error;

/// Ingest-local error kinds. Maps onto the subset of the shared relay
/// error taxonomy that originates on the RTSP leg: `AuthFailed` is
/// terminal, everything tagged `transient` is retried per the client's
/// [`crate::ReconnectPolicy`] and never escapes the ingest task.
#[derive(Debug, Error, Clone)]
pub enum IngestError {
    #[error("rtsp authentication failed (401/403)")]
    AuthFailed,

    #[error("source offered no forwardable video codec")]
    NoSupportedCodec,

    #[error("codec drifted across reconnect: was {previous}, now {current}")]
    CodecDrift {
        previous: camrelay_core::VideoCodec,
        current: camrelay_core::VideoCodec,
    },

    #[error("transient transport/protocol error: {0}")]
    Transient(String),

    #[error("max reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error("invalid source url: {0}")]
    InvalidUrl(String),
}

impl IngestError {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed | Self::NoSupportedCodec | Self::CodecDrift { .. } | Self::InvalidUrl(_)
        )
    }

    /// Rolls this error up into the workspace-wide taxonomy, for
    /// ensure-live to surface once an ingest client has already given up.
    #[must_use]
    pub fn into_relay_error(self) -> RelayError {
        match self {
            Self::AuthFailed => RelayError::AuthFailed,
            Self::NoSupportedCodec => RelayError::NoSupportedCodec,
            Self::CodecDrift { previous, current } => RelayError::CodecDrift { previous, current },
            Self::Transient(msg) | Self::InvalidUrl(msg) => RelayError::TransientIngest(msg),
            Self::ReconnectExhausted => RelayError::StartTimeout,
        }
    }
}
