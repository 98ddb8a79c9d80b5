//! Error types for seacat-client.

use thiserror::Error;

/// Main error type for all seacat operations.
#[derive(Debug, Error)]
pub enum SeacatError {
    /// I/O error while copying a request body.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (configuration loading only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to assemble an `http` response.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// Protocol error (short frame, oversized payload, bad field).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The frame pool has handed out every buffer it is allowed to create.
    #[error("No more available frames in the pool (high water mark {high_water_mark})")]
    ResourceExhausted { high_water_mark: usize },

    /// Waiting for a reply, a frame or scheduler room took too long.
    #[error("Timeout: {0}")]
    Timeout(&'static str),

    /// Nonzero return code from the transport engine.
    #[error("SeaCat return code {rc} in {call}")]
    Engine { call: &'static str, rc: i32 },

    /// Write attempted on a closed outbound stream.
    #[error("Outbound stream is already closed")]
    StreamClosed,

    /// Outbound stream was given a stream id twice.
    #[error("Outbound stream is already launched")]
    AlreadyLaunched,

    /// Reactor is shut down or the engine run task is gone.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using SeacatError.
pub type Result<T> = std::result::Result<T, SeacatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_message() {
        let err = SeacatError::Engine {
            call: "seacatcc.yield",
            rc: -9999,
        };
        assert_eq!(err.to_string(), "SeaCat return code -9999 in seacatcc.yield");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: SeacatError = io.into();
        assert!(matches!(err, SeacatError::Io(_)));
    }
}
