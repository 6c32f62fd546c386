//! Segmented MPEG-TS/HLS egress.
//!
//! Each live stream that has at least one HLS viewer gets its own
//! [`HlsMuxer`], fed the same `camrelay_core::RtpPacket`s every other
//! subscriber sees via `SubscriberPort`. The muxer depacketizes RTP back
//! into Annex-B NAL units, segments them on keyframe boundaries into
//! fixed-length MPEG-TS files, and maintains a rolling-window `m3u8`
//! playlist that `camrelay-server`'s HTTP routes serve directly from disk.
mod depay;
mod error;
mod manager;
mod muxer;
mod playlist;
mod ts;

pub use error::HlsError;
pub use manager::HlsManager;
pub use muxer::HlsMuxer;
pub use playlist::{Playlist, SegmentEntry};
