use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use camrelay_core::config::{LifecycleConfig, PathConfig, RelayConfig};
use camrelay_core::{RelayError, Stream, StreamId, VideoCodec};
use camrelay_hls::HlsManager;
use camrelay_ingest::{IngestHandle, IngestState, ReconnectPolicy, RtspIngestClient};
use camrelay_webrtc::PeerManager;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

/// Everything the lifecycle controller owns for one `paths.<id>` entry.
/// A `Stream` itself never disappears once created at startup; only its
/// ingest task and subscriber-facing sessions cycle.
struct ManagedStream {
    stream: Arc<Stream>,
    path: PathConfig,
    ingest: AsyncMutex<Option<IngestHandle>>,
    intentional_stop: AtomicBool,
    grace: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    viewers: AtomicUsize,
}

/// Point-in-time view of one stream, for the admin `GET /streams` listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamInfo {
    pub id: String,
    pub on_demand: bool,
    pub ingest_state: String,
    pub codec: Option<VideoCodec>,
    pub subscriber_count: usize,
}

/// Implements the ensure-live / on-demand-teardown lifecycle controller.
/// Owns one [`Stream`] per configured path, created eagerly
/// at startup; `PeerManager`/`HlsManager` are wired in after construction
/// (via [`StreamManager::wire`]) since all three are mutually referential at
/// the process level and none can be built strictly before the others.
pub struct StreamManager {
    lifecycle: LifecycleConfig,
    streams: DashMap<StreamId, Arc<ManagedStream>>,
    peer_manager: OnceLock<Arc<PeerManager>>,
    hls_manager: OnceLock<Arc<HlsManager>>,
}

impl StreamManager {
    /// Fails with `RelayError::Capacity` if the configured path count
    /// exceeds `lifecycle.maxStreams` — spec's "configurable upper bound on
    /// streams total" dimension, enforced at boot rather than per-request
    /// since the registry is fixed at startup (paths are not added at
    /// runtime).
    pub fn new(config: &RelayConfig) -> Result<Arc<Self>, RelayError> {
        if config.paths.len() > config.lifecycle.max_streams {
            return Err(RelayError::Capacity(format!(
                "{} configured paths exceeds maxStreams={}",
                config.paths.len(),
                config.lifecycle.max_streams
            )));
        }

        let streams = DashMap::new();
        for (id, path) in &config.paths {
            let stream_id = StreamId::new(id.clone());
            streams.insert(
                stream_id.clone(),
                Arc::new(ManagedStream {
                    stream: Stream::new(stream_id),
                    path: path.clone(),
                    ingest: AsyncMutex::new(None),
                    intentional_stop: AtomicBool::new(false),
                    grace: parking_lot::Mutex::new(None),
                    viewers: AtomicUsize::new(0),
                }),
            );
        }
        Ok(Arc::new(Self {
            lifecycle: config.lifecycle.clone(),
            streams,
            peer_manager: OnceLock::new(),
            hls_manager: OnceLock::new(),
        }))
    }

    /// Must be called exactly once, before any `ensure_live`/`stop` call, to
    /// complete the construction cycle described above.
    pub fn wire(&self, peer_manager: Arc<PeerManager>, hls_manager: Arc<HlsManager>) {
        let _ = self.peer_manager.set(peer_manager);
        let _ = self.hls_manager.set(hls_manager);
    }

    #[must_use]
    pub fn get_stream(&self, id: &str) -> Option<Arc<Stream>> {
        self.streams.get(id).map(|e| e.stream.clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.streams.contains_key(id)
    }

    fn entry(&self, id: &str) -> Result<Arc<ManagedStream>, RelayError> {
        self.streams
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| RelayError::NoSuchStream(id.to_string()))
    }

    /// The ensure-live protocol: cancels any pending on-demand
    /// grace timeout, starts ingest if it is not already converging on
    /// `Playing`, then blocks (bounded by `lifecycle.startTimeoutSecs`) until
    /// either the codec is known or the attempt gives up.
    pub async fn ensure_live(&self, id: &str) -> Result<Arc<Stream>, RelayError> {
        let managed = self.entry(id)?;
        cancel_grace(&managed);

        {
            let guard = managed.ingest.lock().await;
            if let Some(handle) = guard.as_ref() {
                if handle.is_playing() && managed.stream.get_codec().is_some() {
                    return Ok(managed.stream.clone());
                }
            }
        }

        self.start_ingest(&managed).await;
        self.await_playing(&managed).await?;
        Ok(managed.stream.clone())
    }

    /// Administrative start (`POST /streams/:id/start`): same
    /// ensure-live protocol, exposed directly rather than as a side effect of
    /// a viewer arriving.
    pub async fn start(&self, id: &str) -> Result<(), RelayError> {
        let managed = self.entry(id)?;
        cancel_grace(&managed);
        self.start_ingest(&managed).await;
        self.await_playing(&managed).await
    }

    /// Administrative / idle-timeout stop: marks the next ingest closure as
    /// intentional, stops the ingest task, and tears down every egress
    /// session for the stream.
    pub async fn stop(&self, id: &str) -> Result<(), RelayError> {
        let managed = self.entry(id)?;
        cancel_grace(&managed);
        self.stop_ingest(&managed).await;
        Ok(())
    }

    async fn start_ingest(&self, managed: &Arc<ManagedStream>) {
        let mut guard = managed.ingest.lock().await;
        if let Some(handle) = guard.as_ref() {
            if handle.state() != IngestState::Closed {
                return;
            }
        }
        let url = match Url::parse(&managed.path.source) {
            Ok(url) => url,
            Err(err) => {
                warn!(stream = managed.stream.id().as_str(), error = %err, "invalid source url");
                return;
            }
        };
        managed.intentional_stop.store(false, Ordering::Release);
        let client = RtspIngestClient::new(
            managed.stream.id().as_str().to_string(),
            url,
            managed.path.rtsp_transport,
            ReconnectPolicy::default(),
        );
        let handle = client.start(managed.stream.clone());
        *guard = Some(handle);
        drop(guard);
        self.spawn_watcher(managed.clone());
    }

    async fn stop_ingest(&self, managed: &Arc<ManagedStream>) {
        managed.intentional_stop.store(true, Ordering::Release);
        let mut guard = managed.ingest.lock().await;
        if let Some(mut handle) = guard.take() {
            handle.stop().await;
        }
        drop(guard);
        self.teardown_egress(managed).await;
    }

    async fn teardown_egress(&self, managed: &Arc<ManagedStream>) {
        if let Some(pm) = self.peer_manager.get() {
            pm.force_close_stream(managed.stream.id()).await;
        }
        if let Some(hm) = self.hls_manager.get() {
            hm.remove(managed.stream.id()).await;
        }
        managed.stream.clear_subscribers();
    }

    async fn await_playing(&self, managed: &Arc<ManagedStream>) -> Result<(), RelayError> {
        let deadline = Instant::now() + self.lifecycle.start_timeout();
        loop {
            {
                let guard = managed.ingest.lock().await;
                if let Some(handle) = guard.as_ref() {
                    if handle.is_playing() && managed.stream.get_codec().is_some() {
                        return Ok(());
                    }
                    if handle.state() == IngestState::Closed {
                        return Err(handle
                            .last_error()
                            .map(camrelay_ingest::IngestError::into_relay_error)
                            .unwrap_or(RelayError::StartTimeout));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(RelayError::StartTimeout);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Watches one ingest lifetime for unexpected closure (anything other
    /// than an administrative stop) and force-tears-down egress when it
    /// happens — most notably `CodecDrift`: the
    /// stream's one supported codec source is gone, so its peers and HLS
    /// session cannot be left dangling on it.
    fn spawn_watcher(&self, managed: Arc<ManagedStream>) {
        let peer_manager = self.peer_manager.get().cloned();
        let hls_manager = self.hls_manager.get().cloned();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCH_INTERVAL).await;
                let closed = {
                    let guard = managed.ingest.lock().await;
                    matches!(guard.as_ref().map(IngestHandle::state), Some(IngestState::Closed))
                };
                if !closed {
                    continue;
                }
                let intentional = managed.intentional_stop.swap(false, Ordering::AcqRel);
                if !intentional {
                    warn!(stream = %managed.stream.id(), "ingest closed unexpectedly, tearing down egress");
                    if let Some(pm) = &peer_manager {
                        pm.force_close_stream(managed.stream.id()).await;
                    }
                    if let Some(hm) = &hls_manager {
                        hm.remove(managed.stream.id()).await;
                    }
                    managed.stream.clear_subscribers();
                }
                break;
            }
        });
    }

    /// Called once a consumer (WebRTC peer, HLS playlist hit) has
    /// successfully started watching `id`, right after `ensure_live`
    /// succeeds on its behalf.
    pub fn note_consumer_arrived(&self, id: &str) {
        if let Some(managed) = self.streams.get(id) {
            managed.viewers.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Called when a consumer departs. For `sourceOnDemand` paths, once the
    /// count reaches zero this starts the on-demand grace timer; a consumer
    /// arriving again before it fires cancels it via `ensure_live`'s
    /// `cancel_grace` call.
    pub fn note_consumer_departed(self: &Arc<Self>, id: &str) {
        let Some(managed) = self.streams.get(id).map(|e| e.clone()) else {
            return;
        };
        let previous = managed.viewers.fetch_sub(1, Ordering::AcqRel);
        if previous != 1 || !managed.path.source_on_demand {
            return;
        }

        let grace = self.lifecycle.on_demand_grace();
        let this = self.clone();
        let target = managed.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if target.viewers.load(Ordering::Acquire) == 0 {
                info!(stream = %target.stream.id(), "on-demand grace expired, stopping ingest");
                this.stop_ingest(&target).await;
            }
        });
        *managed.grace.lock() = Some(task);
    }

    /// Full stream-plane teardown for graceful process shutdown: stops
    /// every ingest client, force-closes every WebRTC peer, and removes
    /// every HLS session. Runs after the HTTP listener has already stopped
    /// accepting new connections.
    pub async fn shutdown(&self) {
        let managed: Vec<Arc<ManagedStream>> =
            self.streams.iter().map(|e| e.value().clone()).collect();
        for managed in managed {
            cancel_grace(&managed);
            self.stop_ingest(&managed).await;
        }
    }

    /// Snapshot for the admin `GET /streams` endpoint.
    pub async fn list(&self) -> Vec<StreamInfo> {
        let managed: Vec<Arc<ManagedStream>> =
            self.streams.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(managed.len());
        for managed in managed {
            let ingest_state = {
                let guard = managed.ingest.lock().await;
                guard
                    .as_ref()
                    .map(|h| format!("{:?}", h.state()))
                    .unwrap_or_else(|| "idle".to_string())
            };
            out.push(StreamInfo {
                id: managed.stream.id().to_string(),
                on_demand: managed.path.source_on_demand,
                ingest_state,
                codec: managed.stream.get_codec(),
                subscriber_count: managed.stream.subscriber_count(),
            });
        }
        out
    }
}

fn cancel_grace(managed: &ManagedStream) {
    if let Some(handle) = managed.grace.lock().take() {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camrelay_core::config::{HlsConfig, RtspTransport, WebRtcConfig};
    use std::collections::HashMap;

    fn config_with_paths(n: usize, max_streams: usize) -> RelayConfig {
        let mut paths = HashMap::new();
        for i in 0..n {
            paths.insert(
                format!("cam{i}"),
                PathConfig {
                    source: format!("rtsp://example.invalid/cam{i}"),
                    source_on_demand: true,
                    rtsp_transport: RtspTransport::Tcp,
                },
            );
        }
        RelayConfig {
            paths,
            webrtc: WebRtcConfig::default(),
            hls: HlsConfig::default(),
            lifecycle: LifecycleConfig {
                max_streams,
                ..LifecycleConfig::default()
            },
        }
    }

    #[test]
    fn construction_succeeds_within_max_streams() {
        let config = config_with_paths(2, 2);
        let manager = StreamManager::new(&config).unwrap();
        assert!(manager.contains("cam0"));
        assert!(manager.contains("cam1"));
    }

    #[test]
    fn construction_fails_over_max_streams() {
        let config = config_with_paths(3, 2);
        let err = StreamManager::new(&config).unwrap_err();
        assert!(matches!(err, RelayError::Capacity(_)));
    }
}
