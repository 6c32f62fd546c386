use std::path::{Path, PathBuf};

use camrelay_core::config::RelayConfig;
use clap::Parser;
use serde::Deserialize;

use crate::error::{BootError, BootResult};
use crate::APP_VERSION;

#[derive(Parser, Debug)]
#[command(author, about = "Multi-camera RTSP-to-WebRTC/HLS relay", long_version = APP_VERSION)]
pub struct AppArgs {
    /// Path to the relay's TOML configuration file.
    #[arg(long, default_value = "./camrelay.toml")]
    pub config: PathBuf,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level", rename = "logLevel")]
    pub log_level: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
        }
    }
}

/// Top-level `camrelay.toml` shape: the stream-plane config shared across
/// every crate, plus the HTTP-surface-only `[http]` table that is
/// this binary's own business.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

pub fn load(path: &Path) -> BootResult<ServerConfig> {
    let text =
        std::fs::read_to_string(path).map_err(|err| BootError::Read(path.to_path_buf(), err))?;
    toml::from_str(&text).map_err(|err| BootError::Parse(path.to_path_buf(), Box::new(err)))
}
