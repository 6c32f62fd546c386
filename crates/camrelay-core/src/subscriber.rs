use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::rtp::RtpPacket;
use crate::stream::StreamId;

/// Identifies one subscriber within a [`crate::Stream`]'s subscriber set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned by [`crate::Stream::subscribe`]; the only thing `unsubscribe`
/// needs. Cheap to clone, safe to hand to any thread including the
/// subscriber's own `deliver` callback (the common reentrant-unsubscribe case).
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    pub stream_id: StreamId,
    pub subscriber_id: SubscriberId,
}

/// The capability exposed by every egress consumer (WebRTC peer, HLS
/// muxer). `deliver` must never block the publisher and must
/// tolerate drops — implementations that can't keep up lose packets rather
/// than stall the stream.
pub trait SubscriberPort: Send + Sync {
    /// Hands one packet to the subscriber. Must return immediately; any
    /// queuing/backpressure handling is the implementation's job.
    fn deliver(&self, packet: Arc<RtpPacket>);

    /// Human-readable tag for logging; defaults to the subscriber id.
    fn name(&self) -> String {
        "subscriber".to_string()
    }
}

/// A bounded, drop-newest mailbox in front of a subscriber's real work.
///
/// This is the concrete mechanism behind the "drop newest at the
/// subscriber boundary" policy: each port owns a bounded channel; when full,
/// the packet that just arrived is the one discarded (not an old one),
/// because evicting the oldest would require blocking on a free slot or
/// doing O(n) shifting under the publisher's call stack. `try_send` is O(1)
/// and never blocks, which is what keeps the publisher wait-free.
pub struct BoundedPacketSink {
    tx: mpsc::Sender<Arc<RtpPacket>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl BoundedPacketSink {
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<RtpPacket>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn push(&self, packet: Arc<RtpPacket>) {
        match self.tx.try_send(packet) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(_full_or_closed) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn pkt(seq: u16) -> Arc<RtpPacket> {
        Arc::new(RtpPacket::new(seq, 0, 96, false, 1, Bytes::new()))
    }

    #[tokio::test]
    async fn drops_newest_when_full() {
        let (sink, mut rx) = BoundedPacketSink::new(1);
        sink.push(pkt(0));
        sink.push(pkt(1)); // dropped: queue already has one slot occupied
        assert_eq!(sink.delivered(), 1);
        assert_eq!(sink.dropped(), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence_number, 0);
    }
}
