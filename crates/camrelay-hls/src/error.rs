use camrelay_core::RelayError;
use thiserror::Error;

/// HLS segmentation/muxing errors. Never propagated back to the
/// publisher — a write failure degrades one segment and is logged; a
/// subscriber never blocks or fails the publisher.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("failed to create output directory {0}: {1}")]
    OutputDir(std::path::PathBuf, std::io::Error),

    #[error("no such hls session for stream {0}")]
    NoSuchSession(String),

    #[error("hls disabled by configuration")]
    Disabled,
}

impl HlsError {
    #[must_use]
    pub fn into_relay_error(self) -> RelayError {
        match self {
            Self::NoSuchSession(id) => RelayError::NoSuchStream(id),
            Self::Disabled => RelayError::Capacity("hls disabled".to_string()),
            other => RelayError::HlsWriteFailed(other.to_string()),
        }
    }
}
