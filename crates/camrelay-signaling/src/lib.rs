//! Signaling endpoint message layer: JSON envelope types
//! and the thin per-connection demuxer that dispatches them to whatever
//! owns peer negotiation. The actual WebSocket transport is an external
//! collaborator — `camrelay-server` opens the socket and feeds
//! frames to [`router::SignalingRouter`].

pub mod connection;
pub mod error;
pub mod message;
pub mod router;

pub use connection::ConnectionId;
pub use error::SignalingError;
pub use message::{ClientMessage, ServerMessage};
pub use router::{SignalingHandler, SignalingRouter};
