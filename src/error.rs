//! Error types

use thiserror::Error;

/// Failures surfaced by a session engine.
///
/// `WouldBlock` is not a real failure: it is the non-blocking I/O "try
/// again later" signal and is always recovered by the caller. Every other
/// variant is terminal for the operation that produced it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Non-blocking operation cannot make progress right now.
    #[error("operation would block")]
    WouldBlock,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("channel open failed: {0}")]
    ChannelOpen(String),

    #[error("channel I/O failed: {0}")]
    Channel(String),

    #[error("disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl EngineError {
    /// Convert an I/O error, mapping the would-block kind onto
    /// [`EngineError::WouldBlock`] so callers never have to inspect
    /// `io::ErrorKind` themselves.
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock => EngineError::WouldBlock,
            std::io::ErrorKind::TimedOut => EngineError::Timeout(err.to_string()),
            _ => EngineError::Io(err),
        }
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, EngineError::WouldBlock)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout(_))
    }
}

/// Worker-level error classification.
///
/// A failure before the connection is established is a `Connection` error,
/// whether it came from the transport, the handshake, or authentication.
/// After that, failures are classified by the operation that was in flight.
/// `State` marks programmer misuse (starting twice, joining from the
/// connection thread) and aborts startup rather than degrading silently.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("connection failed: {0}")]
    Connection(#[source] EngineError),

    #[error("send failed: {0}")]
    Send(#[source] EngineError),

    #[error("receive failed: {0}")]
    Receive(#[source] EngineError),

    #[error("invalid state: {0}")]
    State(String),
}

impl WorkerError {
    /// The engine failure underlying this error, if any.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            WorkerError::Connection(e) | WorkerError::Send(e) | WorkerError::Receive(e) => Some(e),
            WorkerError::State(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.engine_error().map(EngineError::is_timeout).unwrap_or(false)
    }
}
