use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins when set, otherwise `default_level` (the config file's
/// `http.logLevel`) seeds the default filter.
pub fn setup(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("camrelay_server={default_level},camrelay_core={default_level},camrelay_ingest={default_level},camrelay_webrtc={default_level},camrelay_hls={default_level},camrelay_signaling={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .init();
}
