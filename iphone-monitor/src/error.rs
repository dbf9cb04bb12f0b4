//! Common error types for iphone-monitor.
//!
//! Only startup failures (opening the port, the handshake, a bad
//! configuration) are meant to reach `main`. Everything that happens inside
//! the monitoring loop is logged and absorbed there.

use thiserror::Error;

use crate::handshake::HandshakeError;

/// Main error type for iphone-monitor operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The serial port could not be opened
    #[error("Serial port {port} unavailable: {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// The microcontroller never completed the startup exchange
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The link was used after it was closed
    #[error("Serial link is closed")]
    LinkClosed,
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
