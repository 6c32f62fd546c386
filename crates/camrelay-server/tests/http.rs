use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use camrelay_core::config::{HlsConfig, LifecycleConfig, RelayConfig, WebRtcConfig};
use camrelay_hls::HlsManager;
use camrelay_server::routes;
use camrelay_server::signaling_handler::RelaySignalingHandler;
use camrelay_server::state::AppState;
use camrelay_server::stream_manager::StreamManager;
use camrelay_signaling::SignalingRouter;
use camrelay_webrtc::PeerManager;
use tower::ServiceExt;

fn test_config() -> RelayConfig {
    RelayConfig {
        paths: HashMap::new(),
        webrtc: WebRtcConfig::default(),
        hls: HlsConfig {
            enabled: true,
            segment_duration_secs: 1.0,
            segment_count: 3,
            output_dir: std::env::temp_dir().join("camrelay-test-hls"),
        },
        lifecycle: LifecycleConfig::default(),
    }
}

fn test_state() -> AppState {
    let config = test_config();
    let stream_manager = StreamManager::new(&config).unwrap();
    let peer_manager = Arc::new(PeerManager::new(config.webrtc.clone(), |_, _| {}).unwrap());
    let hls_manager = Arc::new(HlsManager::new(config.hls.clone()));
    stream_manager.wire(peer_manager.clone(), hls_manager.clone());

    let handler = RelaySignalingHandler::new(stream_manager.clone(), peer_manager.clone());
    let signaling = Arc::new(SignalingRouter::new(handler));

    AppState {
        stream_manager,
        peer_manager,
        hls_manager,
        signaling,
        hls_config: config.hls,
        started_at: Instant::now(),
    }
}

#[tokio::test]
async fn health_reports_empty_registry() {
    let app = routes::build(test_state());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["peers"], 0);
    assert_eq!(json["streams"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn streams_admin_listing_starts_empty() {
    let app = routes::build(test_state());
    let response = app
        .oneshot(Request::builder().uri("/streams").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn playlist_for_unconfigured_stream_is_404() {
    let app = routes::build(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/hls/nope/playlist.m3u8")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stop_for_unconfigured_stream_is_404() {
    let app = routes::build(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/streams/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
