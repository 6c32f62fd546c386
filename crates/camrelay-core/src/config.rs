//! Configuration inputs the stream plane consumes. Parsing the
//! TOML file itself belongs to the `camrelay-server` binary (an external
//! collaborator); this module just defines the shapes so every
//! crate agrees on them.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    Tcp,
    Udp,
}

impl Default for RtspTransport {
    fn default() -> Self {
        Self::Tcp
    }
}

fn default_true() -> bool {
    true
}

/// One entry of `paths.<id>`.
#[derive(Debug, Clone, Deserialize)]
pub struct PathConfig {
    pub source: String,
    #[serde(default, rename = "sourceOnDemand")]
    pub source_on_demand: bool,
    #[serde(default, rename = "rtspTransport")]
    pub rtsp_transport: RtspTransport,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebRtcConfig {
    #[serde(default = "default_max_peers", rename = "maxPeers")]
    pub max_peers: usize,
    #[serde(default, rename = "iceServers")]
    pub ice_servers: Vec<String>,
    /// Bound on how long a peer waits for the stream's codec to be set
    /// before failing negotiation.
    #[serde(default = "default_codec_wait_ms", rename = "codecWaitMs")]
    pub codec_wait_ms: u64,
}

fn default_max_peers() -> usize {
    500
}

fn default_codec_wait_ms() -> u64 {
    3_000
}

impl WebRtcConfig {
    #[must_use]
    pub fn codec_wait(&self) -> Duration {
        Duration::from_millis(self.codec_wait_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HlsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_segment_duration", rename = "segmentDuration")]
    pub segment_duration_secs: f64,
    #[serde(default = "default_segment_count", rename = "segmentCount")]
    pub segment_count: usize,
    #[serde(rename = "outputDir")]
    pub output_dir: PathBuf,
}

fn default_segment_duration() -> f64 {
    1.0
}

fn default_segment_count() -> usize {
    3
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            segment_duration_secs: default_segment_duration(),
            segment_count: default_segment_count(),
            output_dir: PathBuf::from("./hls-out"),
        }
    }
}

impl HlsConfig {
    #[must_use]
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs_f64(self.segment_duration_secs)
    }
}

/// On-demand grace period and ensure-live bound. Not itself
/// named as a `paths.*`/`webrtc.*`/`hls.*` key (those are the
/// per-feature knobs); this carries the lifecycle-controller timing that
/// every `paths.<id>` entry shares.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_grace_secs", rename = "onDemandGraceSecs")]
    pub on_demand_grace_secs: u64,
    #[serde(default = "default_start_timeout_secs", rename = "startTimeoutSecs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_max_streams", rename = "maxStreams")]
    pub max_streams: usize,
}

fn default_grace_secs() -> u64 {
    30
}

fn default_start_timeout_secs() -> u64 {
    5
}

fn default_max_streams() -> usize {
    64
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            on_demand_grace_secs: default_grace_secs(),
            start_timeout_secs: default_start_timeout_secs(),
            max_streams: default_max_streams(),
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub fn on_demand_grace(&self) -> Duration {
        Duration::from_secs(self.on_demand_grace_secs)
    }

    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub paths: HashMap<String, PathConfig>,
    #[serde(default)]
    pub webrtc: WebRtcConfig,
    #[serde(default)]
    pub hls: HlsConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            max_peers: default_max_peers(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            codec_wait_ms: default_codec_wait_ms(),
        }
    }
}
