//! Error taxonomy for serial link operations

use std::io;
use thiserror::Error;

/// Errors raised while configuring, opening or using a serial link
#[derive(Debug, Error)]
pub enum LinkError {
    /// The line discipline could not be applied to the device
    #[error("failed to configure {path}: {reason}")]
    ConfigurationFailure { path: String, reason: String },

    /// The device node could not be opened for reading and writing
    #[error("serial device {path} unavailable: {source}")]
    DeviceUnavailable {
        path: String,
        #[source]
        source: io::Error,
    },

    /// A read or write on an open handle failed
    #[error("I/O failure during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Fewer bytes came back than were requested
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    /// The device closed the stream
    #[error("serial device disconnected")]
    Disconnected,
}

impl LinkError {
    pub fn configuration(path: &str, reason: impl Into<String>) -> Self {
        Self::ConfigurationFailure {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}

/// Errors that only mean "nothing arrived yet" and can be retried
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
