use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::trace;

use crate::error::RelayError;
use crate::rtp::RtpPacket;
use crate::subscriber::{SubscriberId, SubscriberPort, SubscriptionHandle};
use crate::VideoCodec;

/// Opaque, process-unique identifier for a [`Stream`]: an opaque
/// string, unique per process. Cheap to clone and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Arc<str>);

impl StreamId {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Point-in-time read of a [`Stream`]'s public state, used for admin
/// listing and health endpoints.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub id: StreamId,
    pub codec: Option<VideoCodec>,
    pub packets_published: u64,
    pub bytes_published: u64,
    pub subscriber_count: usize,
    pub created_at: Instant,
}

struct SubscriberEntry {
    id: SubscriberId,
    port: Arc<dyn SubscriberPort>,
}

/// Set-once, read-mostly codec cell implementing the `set_codec`/
/// `get_codec` contract: first writer wins, a matching
/// late write is a no-op, a conflicting late write fails with
/// `CodecMismatch`.
struct CodecCell(RwLock<Option<VideoCodec>>);

impl CodecCell {
    fn new() -> Self {
        Self(RwLock::new(None))
    }

    fn get(&self) -> Option<VideoCodec> {
        *self.0.read()
    }

    fn set(&self, tag: VideoCodec) -> Result<(), RelayError> {
        let mut guard = self.0.write();
        match *guard {
            None => {
                *guard = Some(tag);
                Ok(())
            }
            Some(existing) if existing == tag => Ok(()),
            Some(existing) => Err(RelayError::CodecMismatch {
                ingest: Some(existing),
                requested: Some(tag),
            }),
        }
    }
}

/// The pub/sub hub: one publisher, N subscribers, per-stream
/// codec metadata. `publish` is the hot path and is designed to be
/// effectively wait-free: it snapshots the subscriber set under a brief read
/// lock, drops the lock, then calls `deliver` on each entry outside any
/// lock at all. This is what makes `unsubscribe` callable reentrantly from
/// inside a subscriber's own `deliver` (the common cleanup path) without
/// deadlocking against `publish`.
pub struct Stream {
    id: StreamId,
    codec: CodecCell,
    subscribers: RwLock<HashMap<SubscriberId, SubscriberEntry>>,
    packets_published: AtomicU64,
    bytes_published: AtomicU64,
    created_at: Instant,
}

impl Stream {
    #[must_use]
    pub fn new(id: impl Into<StreamId>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            codec: CodecCell::new(),
            subscribers: RwLock::new(HashMap::new()),
            packets_published: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
            created_at: Instant::now(),
        })
    }

    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    #[must_use]
    pub fn get_codec(&self) -> Option<VideoCodec> {
        self.codec.get()
    }

    pub fn set_codec(&self, tag: VideoCodec) -> Result<(), RelayError> {
        self.codec.set(tag)
    }

    /// Idempotent per port identity: calling subscribe again with a handle
    /// already issued for this stream just returns a fresh handle pointing
    /// at the same entry (the caller is expected to keep one handle per
    /// subscriber instance; we key by a fresh id each call since ports don't
    /// carry their own stable identity).
    pub fn subscribe(&self, port: Arc<dyn SubscriberPort>) -> SubscriptionHandle {
        let id = SubscriberId::new();
        self.subscribers
            .write()
            .insert(id, SubscriberEntry { id, port });
        trace!(stream = %self.id, subscriber = %id, "subscribed");
        SubscriptionHandle {
            stream_id: self.id.clone(),
            subscriber_id: id,
        }
    }

    /// Safe to call from any thread, including reentrantly from inside a
    /// subscriber's own `deliver` callback. Never blocks `publish` for more
    /// than the brief write-lock needed to remove one hashmap entry.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if handle.stream_id != self.id {
            return;
        }
        self.subscribers.write().remove(&handle.subscriber_id);
        trace!(stream = %self.id, subscriber = %handle.subscriber_id, "unsubscribed");
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Called by the single active publisher (the RTSP ingest client).
    /// Iterates a snapshot of the subscriber set; a failing subscriber is
    /// logged and never aborts delivery to the others.
    pub fn publish(&self, packet: RtpPacket) {
        self.packets_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);

        let packet = Arc::new(packet);

        // Snapshot-then-release: the only moment we hold the lock is this
        // clone of Arc pointers, so `deliver` below runs fully lock-free.
        let snapshot: Vec<Arc<dyn SubscriberPort>> = {
            let guard = self.subscribers.read();
            guard.values().map(|entry| entry.port.clone()).collect()
        };

        for port in snapshot {
            // A panic or logic error inside one subscriber's `deliver` must
            // not prevent delivery to the rest; we can't catch panics across
            // a trait object cheaply here, so the contract is enforced by
            // convention (implementations must not panic) and by isolating
            // failures that *are* reported as `Result` at a lower layer
            // (e.g. HLS write failures never propagate past the muxer).
            port.deliver(packet.clone());
        }

        if snapshot.is_empty() {
            trace!(stream = %self.id, "publish with no subscribers");
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            id: self.id.clone(),
            codec: self.get_codec(),
            packets_published: self.packets_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            subscriber_count: self.subscriber_count(),
            created_at: self.created_at,
        }
    }

    /// Force-closes the stream's subscriber set without destroying the
    /// `Stream` object itself; used when an RTSP reconnect detects
    /// `CodecDrift` and the stream must go `closed`: peers lose their
    /// source, so they are torn down rather than left dangling on a
    /// now-incompatible codec.
    pub fn clear_subscribers(&self) -> Vec<Arc<dyn SubscriberPort>> {
        let mut guard = self.subscribers.write();
        let ports = guard.values().map(|e| e.port.clone()).collect();
        guard.clear();
        ports
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("codec", &self.get_codec())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    struct CountingPort {
        count: AtomicUsize,
    }

    impl SubscriberPort for CountingPort {
        fn deliver(&self, _packet: Arc<RtpPacket>) {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn sample_packet() -> RtpPacket {
        RtpPacket::new(1, 1000, 96, false, 42, Bytes::from_static(b"x"))
    }

    #[test]
    fn codec_first_writer_wins() {
        let stream = Stream::new("camA");
        stream.set_codec(VideoCodec::H264).unwrap();
        // matching late write is a no-op
        stream.set_codec(VideoCodec::H264).unwrap();
        // conflicting late write fails
        assert!(stream.set_codec(VideoCodec::H265).is_err());
        assert_eq!(stream.get_codec(), Some(VideoCodec::H264));
    }

    #[test]
    fn publish_reaches_all_subscribers_and_survives_reentrant_unsubscribe() {
        let stream = Stream::new("camA");
        let port = Arc::new(CountingPort {
            count: AtomicUsize::new(0),
        });
        let handle = stream.subscribe(port.clone());
        stream.publish(sample_packet());
        assert_eq!(port.count.load(Ordering::Relaxed), 1);

        // Reentrant unsubscribe: calling it while "inside" a delivery path
        // (simulated sequentially here, since publish has already released
        // its lock by the time deliver ran) must not deadlock.
        stream.unsubscribe(&handle);
        assert_eq!(stream.subscriber_count(), 0);

        // Second publish reaches nobody, and does not panic.
        stream.publish(sample_packet());
        assert_eq!(port.count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn double_unsubscribe_is_a_no_op() {
        let stream = Stream::new("camA");
        let port = Arc::new(CountingPort {
            count: AtomicUsize::new(0),
        });
        let handle = stream.subscribe(port);
        stream.unsubscribe(&handle);
        stream.unsubscribe(&handle); // must not panic
        assert_eq!(stream.subscriber_count(), 0);
    }
}
