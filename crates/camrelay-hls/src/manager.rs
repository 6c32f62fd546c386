use std::sync::Arc;

use camrelay_core::config::HlsConfig;
use camrelay_core::{Stream, StreamId, SubscriptionHandle};
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::error::HlsError;
use crate::muxer::HlsMuxer;

struct SessionEntry {
    muxer: Arc<HlsMuxer>,
    stream: Arc<Stream>,
    handle: SubscriptionHandle,
}

/// Registry and lifecycle owner for every stream's live HLS session. One
/// instance is shared process-wide via `camrelay-server`, the same role
/// `PeerManager` plays for WebRTC egress.
pub struct HlsManager {
    config: HlsConfig,
    sessions: DashMap<StreamId, SessionEntry>,
    /// One lock per in-flight `ensure_muxer` creation, keyed by stream id.
    /// Guards the check-then-act window between the `sessions.get` miss and
    /// the eventual `sessions.insert` so two concurrent first-time callers
    /// for the same stream can't both construct and subscribe an `HlsMuxer`
    /// — only the second `insert` would survive, orphaning the first
    /// muxer's background task and its stream subscription forever.
    creating: DashMap<StreamId, Arc<AsyncMutex<()>>>,
}

impl HlsManager {
    #[must_use]
    pub fn new(config: HlsConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            creating: DashMap::new(),
        }
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns the existing session for `stream`, starting one if this is
    /// the first caller since the stream went live. The stream's codec must
    /// already be known (HLS starts after the first keyframe has told us
    /// what we're muxing).
    ///
    /// The fast path (session already exists) never touches `creating`.
    /// First-time creation for a given stream id is serialized through a
    /// per-stream lock so that two concurrent callers — e.g. two
    /// simultaneous playlist requests hitting `ensure_live` at once — can't
    /// both win the initial `sessions.get` miss and each build a muxer: the
    /// second to acquire the lock re-checks `sessions` and returns the
    /// first one's muxer instead of creating a duplicate.
    pub async fn ensure_muxer(&self, stream: &Arc<Stream>) -> Result<Arc<HlsMuxer>, HlsError> {
        if !self.config.enabled {
            return Err(HlsError::Disabled);
        }

        if let Some(entry) = self.sessions.get(stream.id()) {
            return Ok(entry.muxer.clone());
        }

        let lock = self
            .creating
            .entry(stream.id().clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check now that we hold the per-stream lock: another caller may
        // have already created and inserted the session while we waited.
        if let Some(entry) = self.sessions.get(stream.id()) {
            return Ok(entry.muxer.clone());
        }

        let codec = stream
            .get_codec()
            .ok_or_else(|| HlsError::NoSuchSession(stream.id().as_str().to_string()))?;

        let muxer = HlsMuxer::start(stream.id().clone(), codec, &self.config)
            .await
            .map_err(|err| HlsError::OutputDir(self.config.output_dir.clone(), err))?;

        let handle = stream.subscribe(muxer.clone());
        self.sessions.insert(
            stream.id().clone(),
            SessionEntry {
                muxer: muxer.clone(),
                stream: stream.clone(),
                handle,
            },
        );
        self.creating.remove(stream.id());

        info!(stream = %stream.id(), "hls session started");
        Ok(muxer)
    }

    #[must_use]
    pub fn playlist_path(&self, stream_id: &StreamId) -> Option<std::path::PathBuf> {
        self.sessions
            .get(stream_id)
            .map(|entry| entry.muxer.dir().join("playlist.m3u8"))
    }

    #[must_use]
    pub fn playlist_text(&self, stream_id: &StreamId) -> Option<String> {
        self.sessions
            .get(stream_id)
            .map(|entry| entry.muxer.playlist_text())
    }

    #[must_use]
    pub fn segment_path(&self, stream_id: &StreamId, filename: &str) -> Option<std::path::PathBuf> {
        self.sessions
            .get(stream_id)
            .map(|entry| entry.muxer.segment_path(filename))
    }

    /// Tears down the session for `stream_id`, unsubscribing from the stream
    /// and deleting the on-disk segment directory.
    pub async fn remove(&self, stream_id: &StreamId) {
        if let Some((_, entry)) = self.sessions.remove(stream_id) {
            entry.stream.unsubscribe(&entry.handle);
            entry.muxer.mark_closed();
            let dir = entry.muxer.dir().to_path_buf();
            let _ = tokio::fs::remove_dir_all(&dir).await;
            info!(stream = %stream_id, "hls session removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camrelay_core::VideoCodec;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn test_config() -> HlsConfig {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        HlsConfig {
            enabled: true,
            segment_duration_secs: 1.0,
            segment_count: 3,
            output_dir: std::env::temp_dir().join(format!(
                "camrelay-hls-manager-test-{}-{n}",
                std::process::id()
            )),
        }
    }

    fn live_stream() -> Arc<Stream> {
        let stream = Stream::new("camA");
        stream.set_codec(VideoCodec::H264).unwrap();
        stream
    }

    #[tokio::test]
    async fn ensure_muxer_reuses_existing_session() {
        let manager = HlsManager::new(test_config());
        let stream = live_stream();

        let first = manager.ensure_muxer(&stream).await.unwrap();
        let second = manager.ensure_muxer(&stream).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_first_callers_create_exactly_one_session() {
        let manager = Arc::new(HlsManager::new(test_config()));
        let stream = live_stream();

        // Two simultaneous first-time callers (mirrors two concurrent
        // `GET /hls/{stream}/playlist.m3u8` requests racing `ensure_live`)
        // must not both win the `sessions.get` miss and each build a muxer.
        let m1 = manager.clone();
        let s1 = stream.clone();
        let m2 = manager.clone();
        let s2 = stream.clone();
        let (a, b) = tokio::join!(
            tokio::spawn(async move { m1.ensure_muxer(&s1).await }),
            tokio::spawn(async move { m2.ensure_muxer(&s2).await }),
        );
        let muxer_a = a.unwrap().unwrap();
        let muxer_b = b.unwrap().unwrap();

        assert!(
            Arc::ptr_eq(&muxer_a, &muxer_b),
            "both callers must observe the same singleton muxer"
        );
        assert_eq!(
            manager.session_count(),
            1,
            "a second insert must never orphan the first session"
        );
        assert_eq!(stream.subscriber_count(), 1, "only one subscription should be registered");
    }

    #[tokio::test]
    async fn ensure_muxer_without_codec_fails_without_creating_a_session() {
        let manager = HlsManager::new(test_config());
        let stream = Stream::new("camB");

        let err = manager.ensure_muxer(&stream).await.unwrap_err();
        assert!(matches!(err, HlsError::NoSuchSession(_)));
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn disabled_config_never_creates_a_session() {
        let mut config = test_config();
        config.enabled = false;
        let manager = HlsManager::new(config);
        let stream = live_stream();

        let err = manager.ensure_muxer(&stream).await.unwrap_err();
        assert!(matches!(err, HlsError::Disabled));
        assert_eq!(manager.session_count(), 0);
    }
}
