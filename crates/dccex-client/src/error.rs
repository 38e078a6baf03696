//! Error types for client operations.

use thiserror::Error;

/// Errors that can occur when talking to a command station.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport is no longer usable; further writes will fail.
    #[error("transport is closed")]
    TransportClosed,

    /// Failed to open the serial device.
    #[error("failed to open {device:?}: {source}")]
    Open {
        /// The device path that could not be opened.
        device: String,
        /// The underlying serial error.
        #[source]
        source: tokio_serial::Error,
    },

    /// Writing a command to the transport failed.
    #[error("failed to write command {command:?}: {source}")]
    Write {
        /// The serialized command that could not be written.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Building or inspecting a command failed.
    #[error(transparent)]
    Command(#[from] dccex_protocol::CommandError),

    /// The command station reported a failure during a success-monitored
    /// session.
    #[error("observed session failure after last command {command:?}")]
    SessionFailure {
        /// The last command written within the session.
        command: String,
    },

    /// A response had an unexpected parameter count or an unparseable
    /// field.
    #[error("invalid response {response:?}: {reason}")]
    InvalidResponse {
        /// The serialized response.
        response: String,
        /// What made it invalid.
        reason: String,
    },

    /// The operation was aborted by the caller's cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn invalid_response(response: impl ToString, reason: impl Into<String>) -> Self {
        Error::InvalidResponse {
            response: response.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
