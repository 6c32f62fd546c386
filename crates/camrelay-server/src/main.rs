use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::http::header;
use axum::middleware::map_response;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use axum_prometheus::PrometheusMetricLayer;
use camrelay_hls::HlsManager;
use camrelay_server::config::{self, AppArgs};
use camrelay_server::error::BootError;
use camrelay_server::signaling_handler::RelaySignalingHandler;
use camrelay_server::state::AppState;
use camrelay_server::stream_manager::StreamManager;
use camrelay_server::{logging, routes, APP_VERSION};
use camrelay_signaling::SignalingRouter;
use camrelay_webrtc::PeerManager;
use clap::Parser;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::propagate_header::PropagateHeaderLayer;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace;
use tracing::{info, warn};

async fn set_version_header<B>(mut res: Response<B>) -> Response<B> {
    res.headers_mut()
        .insert("x-version-id", APP_VERSION.parse().unwrap());
    res
}

#[tokio::main]
async fn main() -> Result<(), BootError> {
    let args = AppArgs::parse();
    let config = config::load(&args.config)?;

    logging::setup(&config.http.log_level);
    info!(version = APP_VERSION, "starting camrelay");

    let stream_manager = StreamManager::new(&config.relay)?;

    let sm_for_hook = stream_manager.clone();
    let peer_manager = Arc::new(PeerManager::new(
        config.relay.webrtc.clone(),
        move |_peer_id, stream_id| {
            sm_for_hook.note_consumer_departed(stream_id.as_str());
        },
    )?);

    let hls_manager = Arc::new(HlsManager::new(config.relay.hls.clone()));

    stream_manager.wire(peer_manager.clone(), hls_manager.clone());

    let handler = RelaySignalingHandler::new(stream_manager.clone(), peer_manager.clone());
    let signaling = Arc::new(SignalingRouter::new(handler));

    let state = AppState {
        stream_manager: stream_manager.clone(),
        peer_manager,
        hls_manager,
        signaling,
        hls_config: config.relay.hls.clone(),
        started_at: Instant::now(),
    };

    // Paths not marked sourceOnDemand are expected to be continuously live;
    // ensure-live them eagerly rather than waiting for a first subscriber.
    for (id, path) in &config.relay.paths {
        if !path.source_on_demand {
            let sm = stream_manager.clone();
            let id = id.clone();
            tokio::spawn(async move {
                if let Err(err) = sm.start(&id).await {
                    warn!(stream = %id, error = %err, "initial start failed, ensure-live will retry on demand");
                }
            });
        }
    }

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .merge(routes::build(state))
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(prometheus_layer)
        .layer(map_response(set_version_header))
        .layer(
            trace::TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().include_headers(true))
                .on_request(trace::DefaultOnRequest::new().level(tracing::Level::DEBUG))
                .on_response(trace::DefaultOnResponse::new().level(tracing::Level::DEBUG)),
        )
        .layer(SetSensitiveHeadersLayer::new(std::iter::once(
            header::AUTHORIZATION,
        )))
        .layer(CompressionLayer::new())
        .layer(PropagateHeaderLayer::new(header::HeaderName::from_static(
            "x-request-id",
        )))
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = config
        .http
        .bind
        .parse()
        .map_err(|err| BootError::InvalidAddr(config.http.bind.clone(), err))?;

    info!("camrelay listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| BootError::Bind(addr, err))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| BootError::Bind(addr, err))?;

    info!("http listener stopped, tearing down stream plane");
    stream_manager.shutdown().await;

    info!("camrelay shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
