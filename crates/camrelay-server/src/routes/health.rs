use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::instrument;

use crate::state::AppState;
use crate::stream_manager::StreamInfo;

/// Health/stats JSON shape: `{streams, peers, uptime}`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub streams: Vec<StreamInfo>,
    pub peers: usize,
    pub uptime: u64,
}

#[instrument(level = "debug", skip(state))]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        streams: state.stream_manager.list().await,
        peers: state.peer_manager.peer_count(),
        uptime: state.started_at.elapsed().as_secs(),
    })
}
