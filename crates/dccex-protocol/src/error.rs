//! Error types for the command codec.

use thiserror::Error;

/// Errors that can occur when building or inspecting commands.
///
/// Incoming frames that fail to parse are dropped by the listener, so these
/// errors surface only on the outgoing/builder side.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The frame body was empty.
    #[error("invalid command length: {0:?}")]
    InvalidLength(String),

    /// A builder-supplied parameter was not a string.
    #[error("failed to cast parameter {0:?} to string")]
    NotAString(String),
}

/// Result type alias for codec operations.
pub type CommandResult<T> = Result<T, CommandError>;
