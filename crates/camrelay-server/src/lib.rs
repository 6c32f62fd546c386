//! Orchestration binary for the relay: owns configuration, the
//! Stream Manager lifecycle controller (C9), and the HTTP/WebSocket surface
//! that fronts the `camrelay-ingest`/`camrelay-webrtc`/`camrelay-hls`
//! crates. Exposed as a library too, so integration tests can exercise the
//! axum `Router` directly (`tower::ServiceExt::oneshot`) without binding a
//! real socket.

use shadow_rs::shadow;

pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod signaling_handler;
pub mod state;
pub mod stream_manager;

shadow!(build);

pub const APP_VERSION: &str = shadow_rs::formatcp!(
    "{} ({} {}), build_env: {}, {}, {}",
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL,
    build::CARGO_VERSION
);
