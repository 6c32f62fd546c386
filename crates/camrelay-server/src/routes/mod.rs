mod admin;
mod health;
mod hls;
mod ws;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/hls/:stream/playlist.m3u8", get(hls::playlist))
        .route("/hls/:stream/:segment", get(hls::segment))
        .route("/streams", get(admin::list))
        .route("/streams/:id/start", post(admin::start))
        .route("/streams/:id", delete(admin::stop))
        .route("/health", get(health::health))
        .route("/ws", get(ws::upgrade))
        .with_state(state)
}
