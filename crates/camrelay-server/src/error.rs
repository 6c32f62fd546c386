use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use camrelay_core::RelayError;
use serde::Serialize;
use thiserror::Error;

/// HTTP/signaling-facing error wrapper, boxed to keep `Result` small on the
/// hot paths. Most call sites only ever produce [`ErrorKind::Relay`]; the
/// rest exist for the handlers that touch the filesystem directly (HLS
/// playlist/segment serving).
#[derive(Error, Debug)]
#[error(transparent)]
pub struct AppError(Box<ErrorKind>);

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("{0}")]
    Relay(#[from] RelayError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl<E> From<E> for AppError
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        AppError(Box::new(ErrorKind::from(err)))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, code) = match &*self.0 {
            ErrorKind::Relay(err) => (
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                err.code(),
            ),
            ErrorKind::Io(_) => (StatusCode::NOT_FOUND, "IoError"),
        };
        (status, Json(ErrorBody { code, message })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Startup-only failures (config loading); distinct from [`AppError`]
/// because nothing here ever reaches an HTTP handler.
#[derive(Error, Debug)]
pub enum BootError {
    #[error("failed to read config file {0}: {1}")]
    Read(std::path::PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(std::path::PathBuf, Box<toml::de::Error>),

    #[error("failed to bind {0}: {1}")]
    Bind(std::net::SocketAddr, std::io::Error),

    #[error("invalid http bind address {0}: {1}")]
    InvalidAddr(String, std::net::AddrParseError),

    #[error(transparent)]
    Webrtc(#[from] camrelay_webrtc::WebRtcError),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

pub type BootResult<T> = std::result::Result<T, BootError>;
