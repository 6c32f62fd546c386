use thiserror::Error;

/// Signaling-local error kinds. Anything originating deeper in
/// the stack (ensure-live, peer negotiation) arrives here already as a
/// [`camrelay_core::RelayError`] and is rendered straight into an `error`
/// envelope by [`crate::router::SignalingRouter`]; these variants cover the
/// message layer itself, which has no counterpart in the shared relay error taxonomy.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed signaling envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,
}
