use devlink_core::{CoreError, ErrorResponse};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

impl TunnelError {
    pub fn error_code(&self) -> &'static str {
        match self {
            TunnelError::Core(error) => error.error_code(),
            TunnelError::Io(_) => "IO_ERROR",
            TunnelError::WebSocket(_) => "WEBSOCKET_ERROR",
        }
    }

    /// Whether the peer simply went away, as opposed to a protocol fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TunnelError::Core(CoreError::UpstreamReset(_)) => true,
            TunnelError::Io(error) => matches!(
                error.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            TunnelError::WebSocket(
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
            ) => true,
            _ => false,
        }
    }
}

impl From<TunnelError> for ErrorResponse {
    fn from(err: TunnelError) -> Self {
        ErrorResponse::new(err.error_code(), err.to_string())
    }
}

pub type TunnelResult<T> = std::result::Result<T, TunnelError>;
