use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::instrument;

use crate::error::Result;
use crate::state::AppState;
use crate::stream_manager::StreamInfo;

/// `GET /streams`: the full admin snapshot, a natural counterpart to the
/// start/stop endpoints below.
#[instrument(level = "debug", skip(state))]
pub async fn list(State(state): State<AppState>) -> Json<Vec<StreamInfo>> {
    Json(state.stream_manager.list().await)
}

/// `POST /streams/{id}/start`: administratively force-start an
/// on-demand stream.
#[instrument(level = "debug", skip(state))]
pub async fn start(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.stream_manager.start(&stream_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /streams/{id}`: administratively stop a stream.
#[instrument(level = "debug", skip(state))]
pub async fn stop(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<impl IntoResponse> {
    state.stream_manager.stop(&stream_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
