use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use camrelay_core::{BoundedPacketSink, RtpPacket, SubscriberPort, SubscriptionHandle, VideoCodec};
use parking_lot::Mutex;
use rtp::header::Header;
use rtp::packet::Packet;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

/// Connection-state projection of the underlying `RTCPeerConnection`,
/// updated from `on_peer_connection_state_change`. `new` until the first
/// callback fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Opaque identifier for one negotiated WebRTC peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(Uuid);

impl PeerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn to_rtp_packet(packet: &RtpPacket) -> Packet {
    Packet {
        header: Header {
            version: 2,
            marker: packet.marker,
            payload_type: packet.payload_type,
            sequence_number: packet.sequence_number,
            timestamp: packet.timestamp,
            ssrc: packet.ssrc,
            ..Default::default()
        },
        payload: packet.payload.clone(),
    }
}

/// One subscriber-side WebRTC leg: a peer connection plus the
/// single video track it forwards onto. Implements [`SubscriberPort`] so the
/// source [`camrelay_core::Stream`] can `publish` into it directly.
///
/// RTP packets never reach `write_rtp` synchronously from inside `deliver` —
/// that would mean the RTSP ingest task blocking on this peer's network
/// send. Instead `deliver` only pushes into a [`BoundedPacketSink`]; a pump
/// task owned by this struct drains it and does the actual async write.
pub struct WebRtcPeer {
    id: PeerId,
    pub(crate) pc: Arc<RTCPeerConnection>,
    codec: VideoCodec,
    sink: BoundedPacketSink,
    closed: AtomicBool,
    close_guard: AsyncMutex<()>,
    state: Mutex<PeerState>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl WebRtcPeer {
    pub(crate) fn new(
        id: PeerId,
        pc: Arc<RTCPeerConnection>,
        codec: VideoCodec,
        track: Arc<TrackLocalStaticRTP>,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let (sink, mut rx) = BoundedPacketSink::new(queue_capacity);
        let peer = Arc::new(Self {
            id,
            pc,
            codec,
            sink,
            closed: AtomicBool::new(false),
            close_guard: AsyncMutex::new(()),
            state: Mutex::new(PeerState::New),
            subscription: Mutex::new(None),
        });

        let pump_track = track;
        let pump_id = id;
        tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                let rtp_packet = to_rtp_packet(&packet);
                if let Err(err) = pump_track.write_rtp(&rtp_packet).await {
                    debug!(peer = %pump_id, error = %err, "track write failed, stopping pump");
                    break;
                }
            }
        });

        peer
    }

    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    #[must_use]
    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.sink.delivered()
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.sink.dropped()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: PeerState) {
        *self.state.lock() = state;
    }

    /// Records the subscriber-port handle issued once ICE reaches
    /// `connected`. Returns `false` (and leaves the existing handle in
    /// place) if one is already set, since the state-change callback can
    /// fire `connected` more than once across a renegotiation.
    pub(crate) fn set_subscription(&self, handle: SubscriptionHandle) -> bool {
        let mut guard = self.subscription.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(handle);
        true
    }

    /// Takes the subscription handle, if any was ever set. A peer that never
    /// reached `connected` yields `None` here, which is the correct signal
    /// to skip `Stream::unsubscribe` entirely on teardown.
    pub(crate) fn take_subscription(&self) -> Option<SubscriptionHandle> {
        self.subscription.lock().take()
    }

    /// Closes the underlying peer connection exactly once; safe to call
    /// concurrently from both the manager's reaper and an explicit API
    /// request — teardown can race with ICE failure.
    pub async fn close(&self) {
        let _guard = self.close_guard.lock().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_state(PeerState::Closed);
        if let Err(err) = self.pc.close().await {
            warn!(peer = %self.id, error = %err, "error closing peer connection");
        }
    }
}

impl SubscriberPort for WebRtcPeer {
    fn deliver(&self, packet: Arc<RtpPacket>) {
        if self.is_closed() {
            return;
        }
        self.sink.push(packet);
    }

    fn name(&self) -> String {
        format!("webrtc-peer/{}", self.id)
    }
}
