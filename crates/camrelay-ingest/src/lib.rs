//! RTSP ingest client: opens one RTSP session per stream,
//! negotiates SDP, and pumps RTP packets into a [`camrelay_core::Stream`]
//! until asked to stop or permanently fail.

pub mod client;
pub mod error;
pub mod reconnect;
pub mod state;

pub use client::{IngestHandle, RtspIngestClient};
pub use error::IngestError;
pub use reconnect::ReconnectPolicy;
pub use state::IngestState;
