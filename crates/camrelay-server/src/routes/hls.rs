use axum::extract::{Path, State};
use axum::http::{header, HeaderName};
use axum::response::IntoResponse;
use tracing::instrument;

use crate::error::{AppError, Result};
use crate::state::AppState;

const PLAYLIST_CONTENT_TYPE: [(HeaderName, &str); 1] =
    [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")];
const SEGMENT_CONTENT_TYPE: [(HeaderName, &str); 1] = [(header::CONTENT_TYPE, "video/MP2T")];

/// `GET /hls/{stream}/playlist.m3u8`: triggers ensure-live on
/// first hit, then lazily creates the muxer once the codec is known. A
/// request that lands before the first segment has flushed waits, bounded,
/// rather than handing back a playlist with zero segments; exceeding the
/// bound surfaces as `StartTimeout`.
#[instrument(level = "debug", skip(state))]
pub async fn playlist(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<impl IntoResponse> {
    let stream = state.stream_manager.ensure_live(&stream_id).await?;

    let muxer = state
        .hls_manager
        .ensure_muxer(&stream)
        .await
        .map_err(camrelay_hls::HlsError::into_relay_error)?;

    // Bracket the request narrowly: "arrived" only once we're certain to
    // return successfully, "departed" unconditionally right after, so a
    // stalled HLS poller never leaves the on-demand grace timer pinned open.
    state.stream_manager.note_consumer_arrived(&stream_id);

    let wait_bound = state.hls_config.segment_duration()
        * (state.hls_config.segment_count as u32 + 2);
    let outcome = if muxer.wait_until_ready(wait_bound).await {
        Ok((PLAYLIST_CONTENT_TYPE, muxer.playlist_text()))
    } else {
        Err(camrelay_core::RelayError::StartTimeout.into())
    };

    state.stream_manager.note_consumer_departed(&stream_id);
    outcome
}

/// `GET /hls/{stream}/{segment}`: 404 if the segment has already
/// been evicted from the rolling window.
#[instrument(level = "debug", skip(state))]
pub async fn segment(
    State(state): State<AppState>,
    Path((stream_id, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let stream = state
        .stream_manager
        .get_stream(&stream_id)
        .ok_or_else(|| camrelay_core::RelayError::NoSuchStream(stream_id.clone()))?;

    let path = state
        .hls_manager
        .segment_path(stream.id(), &filename)
        .ok_or_else(|| camrelay_core::RelayError::NoSuchStream(stream_id.clone()))?;

    let bytes = tokio::fs::read(&path).await.map_err(AppError::from)?;
    Ok((SEGMENT_CONTENT_TYPE, bytes))
}
