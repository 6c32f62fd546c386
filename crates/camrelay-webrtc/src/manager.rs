use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camrelay_core::config::WebRtcConfig;
use camrelay_core::{Stream, StreamId};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use webrtc::api::API;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use crate::error::WebRtcError;
use crate::media_engine::build_api;
use crate::peer::{PeerId, PeerState, WebRtcPeer};
use crate::sdp_codec::{offered_video_codecs, select_egress_codec};

const CODEC_POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Bound on buffered-but-unwritten packets per peer before the drop-newest
/// policy kicks in; generous enough to absorb a brief ICE/NACK
/// stall without building unbounded backlog.
const PEER_QUEUE_CAPACITY: usize = 256;

struct PeerEntry {
    peer: Arc<WebRtcPeer>,
    stream: Arc<Stream>,
}

/// Registry and lifecycle owner for every negotiated WebRTC peer.
/// One instance is shared process-wide via `camrelay-server`.
pub struct PeerManager {
    api: API,
    config: WebRtcConfig,
    peers: Arc<DashMap<PeerId, PeerEntry>>,
    /// Slots reserved against `config.max_peers`, incremented at the start
    /// of `negotiate` and decremented once the peer is fully torn down.
    /// Tracked separately from `peers.len()` so the capacity check and the
    /// eventual registry insert are atomic with respect to each other —
    /// `peers.len()` alone would let two concurrent negotiations both pass
    /// the check before either has inserted.
    peer_count: Arc<AtomicUsize>,
    cleanup_tx: mpsc::UnboundedSender<PeerId>,
    on_peer_closed: Arc<dyn Fn(PeerId, StreamId) + Send + Sync>,
}

/// Holds one reserved slot against `PeerManager::peer_count` until either
/// `commit` transfers ownership to a registry entry (decremented later by
/// `close_peer`/`force_remove`) or the guard is dropped on an early return,
/// releasing the slot immediately.
struct PeerSlotGuard<'a> {
    manager: &'a PeerManager,
    active: bool,
}

impl<'a> PeerSlotGuard<'a> {
    fn commit(mut self) {
        self.active = false;
    }
}

impl Drop for PeerSlotGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            self.manager.peer_count.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl PeerManager {
    /// `on_peer_closed` is an external hook fired after a peer's
    /// registry entry is fully removed and its connection closed — never
    /// while holding this manager's dashmap lock, so the Stream Manager can
    /// freely act on it (on-demand viewer accounting) without risking a
    /// reentrant deadlock.
    pub fn new<F>(config: WebRtcConfig, on_peer_closed: F) -> Result<Self, WebRtcError>
    where
        F: Fn(PeerId, StreamId) + Send + Sync + 'static,
    {
        let api = build_api()?;
        let peers: Arc<DashMap<PeerId, PeerEntry>> = Arc::new(DashMap::new());
        let peer_count = Arc::new(AtomicUsize::new(0));
        let (cleanup_tx, mut cleanup_rx) = mpsc::unbounded_channel::<PeerId>();
        let on_peer_closed: Arc<dyn Fn(PeerId, StreamId) + Send + Sync> = Arc::new(on_peer_closed);

        // Reaper task: runs the close/unsubscribe sequence outside of any
        // lock held by the ICE state-change callback that triggered it, so
        // a peer closing from inside its own callback can't deadlock against
        // this manager's dashmap.
        let reaper_peers = peers.clone();
        let reaper_peer_count = peer_count.clone();
        let reaper_hook = on_peer_closed.clone();
        tokio::spawn(async move {
            while let Some(id) = cleanup_rx.recv().await {
                if let Some((_, entry)) = reaper_peers.remove(&id) {
                    reaper_peer_count.fetch_sub(1, Ordering::AcqRel);
                    let stream_id = entry.stream.id().clone();
                    if let Some(handle) = entry.peer.take_subscription() {
                        entry.stream.unsubscribe(&handle);
                    }
                    entry.peer.close().await;
                    info!(
                        peer = %id,
                        delivered = entry.peer.delivered(),
                        dropped = entry.peer.dropped(),
                        "peer reaped"
                    );
                    (reaper_hook)(id, stream_id);
                }
            }
        });

        Ok(Self {
            api,
            config,
            peers,
            peer_count,
            cleanup_tx,
            on_peer_closed,
        })
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peer_count.load(Ordering::Acquire)
    }

    /// Negotiates a new subscriber peer against `stream`. Blocks
    /// up to `webrtc.codecWaitMs` for the stream's codec to be known before
    /// failing, per the "bounded grace interval" requirement.
    pub async fn negotiate(
        &self,
        stream: &Arc<Stream>,
        offer: RTCSessionDescription,
    ) -> Result<(PeerId, RTCSessionDescription), WebRtcError> {
        // Reserve a slot before doing any other work: the increment and the
        // ceiling check happen together, so two concurrent callers racing
        // at `max_peers - 1` can't both observe room and both proceed. The
        // guard releases the reservation automatically on any early return
        // below; `commit()` hands it off to the registry entry once this
        // peer is actually inserted.
        let reserved = self.peer_count.fetch_add(1, Ordering::AcqRel) + 1;
        if reserved > self.config.max_peers {
            self.peer_count.fetch_sub(1, Ordering::AcqRel);
            return Err(WebRtcError::Capacity {
                current: reserved - 1,
                max: self.config.max_peers,
            });
        }
        let slot = PeerSlotGuard {
            manager: self,
            active: true,
        };

        let ingest_codec = self.await_codec(stream).await?;

        // Codec selection: H.265 > H.264 priority among what the offer
        // advertises, and it must equal the ingest codec or we refuse
        // rather than transcode.
        let offered = offered_video_codecs(&offer.sdp)?;
        let codec = select_egress_codec(&offered, ingest_codec)?;

        let ice_servers: Vec<RTCIceServer> = self
            .config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(rtc_config).await?);

        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: codec.mime_type().to_string(),
                ..Default::default()
            },
            "video".to_owned(),
            "camrelay".to_owned(),
        ));

        let rtp_sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Interceptors (NACK, RTCP reports) need their read loop driven even
        // though we never consume the payload ourselves.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        let id = PeerId::new();
        let peer = WebRtcPeer::new(id, pc.clone(), codec, track, PEER_QUEUE_CAPACITY);

        self.peers.insert(
            id,
            PeerEntry {
                peer: peer.clone(),
                stream: stream.clone(),
            },
        );
        // Responsibility for the reserved slot now belongs to the registry
        // entry; `close_peer`/`force_remove` release it when this peer is
        // torn down.
        slot.commit();

        // Subscribing here, before ICE/DTLS has finished, would let live RTP
        // queue into this peer's sink while it's still `new`/`connecting`.
        // Defer the actual `Stream::subscribe` to the `connected` transition
        // below, so a peer only ever starts receiving media once it can
        // actually forward it.
        let cleanup_tx = self.cleanup_tx.clone();
        let stream_for_state = stream.clone();
        let peer_for_state = peer.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            match state {
                RTCPeerConnectionState::New => {
                    peer_for_state.set_state(PeerState::New);
                }
                RTCPeerConnectionState::Connecting => {
                    peer_for_state.set_state(PeerState::Connecting);
                }
                RTCPeerConnectionState::Connected => {
                    peer_for_state.set_state(PeerState::Connected);
                    if !peer_for_state.is_closed() {
                        let subscriber_handle = stream_for_state.subscribe(peer_for_state.clone());
                        if !peer_for_state.set_subscription(subscriber_handle.clone()) {
                            // Already subscribed by an earlier `connected`
                            // event (ICE can flap connected→disconnected→
                            // connected); don't double-subscribe.
                            stream_for_state.unsubscribe(&subscriber_handle);
                        }
                    }
                }
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                    peer_for_state.set_state(PeerState::Failed);
                    let _ = cleanup_tx.send(id);
                }
                RTCPeerConnectionState::Closed => {
                    peer_for_state.set_state(PeerState::Closed);
                    let _ = cleanup_tx.send(id);
                }
                _ => {}
            }
            Box::pin(async {})
        }));

        if let Err(err) = pc.set_remote_description(offer).await {
            self.force_remove(id).await;
            return Err(WebRtcError::Negotiation(err.to_string()));
        }

        let answer = match pc.create_answer(None).await {
            Ok(a) => a,
            Err(err) => {
                self.force_remove(id).await;
                return Err(WebRtcError::Negotiation(err.to_string()));
            }
        };

        let mut gather_complete = pc.gathering_complete_promise().await;
        if let Err(err) = pc.set_local_description(answer).await {
            self.force_remove(id).await;
            return Err(WebRtcError::Negotiation(err.to_string()));
        }
        let _ = gather_complete.recv().await;

        let local_desc = pc.local_description().await.ok_or_else(|| {
            WebRtcError::Negotiation("no local description after gathering".to_string())
        })?;

        Ok((id, local_desc))
    }

    pub async fn close_peer(&self, id: PeerId) {
        if let Some((_, entry)) = self.peers.remove(&id) {
            self.peer_count.fetch_sub(1, Ordering::AcqRel);
            let stream_id = entry.stream.id().clone();
            if let Some(handle) = entry.peer.take_subscription() {
                entry.stream.unsubscribe(&handle);
            }
            entry.peer.close().await;
            info!(
                peer = %id,
                delivered = entry.peer.delivered(),
                dropped = entry.peer.dropped(),
                "peer closed"
            );
            (self.on_peer_closed)(id, stream_id);
        }
    }

    /// Force-closes every peer currently subscribed to `stream_id`. Used by
    /// the Stream Manager when a stream's ingest goes `closed` out from
    /// under its viewers — most notably on `CodecDrift`: the peers' one
    /// supported codec source is gone, so they cannot be left dangling.
    pub async fn force_close_stream(&self, stream_id: &StreamId) -> usize {
        let ids: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|entry| entry.value().stream.id() == stream_id)
            .map(|entry| *entry.key())
            .collect();
        let count = ids.len();
        for id in ids {
            self.close_peer(id).await;
        }
        count
    }

    async fn force_remove(&self, id: PeerId) {
        if let Some((_, entry)) = self.peers.remove(&id) {
            self.peer_count.fetch_sub(1, Ordering::AcqRel);
            if let Some(handle) = entry.peer.take_subscription() {
                entry.stream.unsubscribe(&handle);
            }
            entry.peer.close().await;
        }
    }

    async fn await_codec(
        &self,
        stream: &Arc<Stream>,
    ) -> Result<camrelay_core::VideoCodec, WebRtcError> {
        let bound = self.config.codec_wait();
        let deadline = tokio::time::Instant::now() + bound;
        loop {
            if let Some(codec) = stream.get_codec() {
                return Ok(codec);
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(stream = %stream.id(), "codec wait timed out");
                return Err(WebRtcError::CodecWaitTimeout(bound));
            }
            tokio::time::sleep(CODEC_POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PeerManager {
        PeerManager::new(WebRtcConfig::default(), |_, _| {}).unwrap()
    }

    #[test]
    fn slot_guard_releases_reservation_on_drop_unless_committed() {
        let mgr = manager();

        mgr.peer_count.fetch_add(1, Ordering::AcqRel);
        {
            let guard = PeerSlotGuard {
                manager: &mgr,
                active: true,
            };
            drop(guard);
        }
        assert_eq!(mgr.peer_count(), 0, "uncommitted guard must release its slot");

        mgr.peer_count.fetch_add(1, Ordering::AcqRel);
        {
            let guard = PeerSlotGuard {
                manager: &mgr,
                active: true,
            };
            guard.commit();
        }
        assert_eq!(mgr.peer_count(), 1, "committed guard must not release its slot");
    }

    #[test]
    fn capacity_check_and_reservation_are_atomic() {
        let mut config = WebRtcConfig::default();
        config.max_peers = 1;
        let mgr = PeerManager::new(config, |_, _| {}).unwrap();

        // Mirrors `negotiate`'s reserve-then-check sequence directly, since
        // exercising the real ICE/SDP path needs a live network.
        let reserved = mgr.peer_count.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(reserved <= mgr.config.max_peers);

        let over = mgr.peer_count.fetch_add(1, Ordering::AcqRel) + 1;
        assert!(over > mgr.config.max_peers, "second reservation must see the ceiling exceeded");
        mgr.peer_count.fetch_sub(1, Ordering::AcqRel);

        assert_eq!(mgr.peer_count(), 1);
    }
}
