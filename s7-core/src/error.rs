use crate::return_code::ReturnCode;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for S7 operations
///
/// The error is `Clone` so that one fatal root cause can be delivered to every
/// request that was outstanding when the connection failed. I/O errors are
/// therefore held behind an `Arc`.
#[derive(Error, Debug, Clone)]
pub enum S7Error {
    #[error("Connection error: {0}")]
    Connection(Arc<std::io::Error>),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Item error: {0}")]
    Item(ReturnCode),

    #[error("Remote error: class 0x{class:02X}, code 0x{code:02X}")]
    Remote { class: u8, code: u8 },

    #[error("Timeout")]
    Timeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection attempt already in progress")]
    ConnectInProgress,
}

/// Coarse classification of [`S7Error`]
///
/// Transport and protocol failures are fatal to the connection; the other
/// categories leave the connection usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Socket failures, end of stream, operations on a closed connection
    Transport,
    /// Malformed frames or PDUs
    Protocol,
    /// Rejected locally before anything was transmitted
    Validation,
    /// The peer answered with an error code
    Remote,
    /// No reply before the deadline
    Timeout,
}

impl S7Error {
    /// Build a transport error from an I/O error kind and a message
    pub fn io(kind: std::io::ErrorKind, message: &str) -> Self {
        S7Error::Connection(Arc::new(std::io::Error::new(kind, message.to_string())))
    }

    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            S7Error::Connection(_) | S7Error::NotConnected | S7Error::ConnectInProgress => {
                ErrorCategory::Transport
            }
            S7Error::Protocol(_) | S7Error::FrameInvalid(_) => ErrorCategory::Protocol,
            S7Error::InvalidData(_) => ErrorCategory::Validation,
            S7Error::Item(_) | S7Error::Remote { .. } => ErrorCategory::Remote,
            S7Error::Timeout => ErrorCategory::Timeout,
        }
    }

    /// Whether the error forces the connection back to `Disconnected`
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport | ErrorCategory::Protocol
        )
    }
}

impl From<std::io::Error> for S7Error {
    fn from(err: std::io::Error) -> Self {
        S7Error::Connection(Arc::new(err))
    }
}

/// Result type alias for S7 operations
pub type S7Result<T> = Result<T, S7Error>;
