//! Error type shared by the codec, connections, registry and dispatcher.

use std::io;
use thiserror::Error;

/// Errors produced by the server core.
#[derive(Debug, Error)]
pub enum Error {
    /// Payload length does not fit the 32-bit length field.
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),

    /// Fewer bytes than a full header were handed to the decoder.
    #[error("header needs {expected} bytes, got {actual}")]
    ShortHeader { expected: usize, actual: usize },

    /// Declared frame length is above the configured maximum.
    #[error("packet of {length} bytes exceeds the maximum of {max}")]
    PacketTooLarge { length: u32, max: u32 },

    #[error("connection {0} not found")]
    ConnectionNotFound(u32),

    #[error("property '{0}' not found")]
    PropertyNotFound(String),

    #[error("property '{0}' holds a different type")]
    PropertyType(String),

    #[error("connection closed")]
    ConnectionClosed,

    /// A handler is already registered for this message kind.
    #[error("route for message kind {0} is already registered")]
    DuplicateRoute(u32),

    #[error("server already started")]
    ServerStarted,

    #[error("worker pool is not running")]
    WorkerPoolUnavailable,

    #[error("operation timed out")]
    Timeout,

    #[error("could not resolve bind address {0}")]
    AddrResolution(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
