//! Shared data model for the stream plane: RTP packets, the pub/sub
//! [`Stream`] hub, the [`SubscriberPort`] capability, and the error/config
//! types every other `camrelay-*` crate builds on.

pub mod codec;
pub mod config;
pub mod error;
pub mod rtp;
pub mod stream;
pub mod subscriber;

pub use codec::VideoCodec;
pub use error::RelayError;
pub use rtp::RtpPacket;
pub use stream::{Stream, StreamId, StreamSnapshot};
pub use subscriber::{BoundedPacketSink, SubscriberId, SubscriberPort, SubscriptionHandle};
