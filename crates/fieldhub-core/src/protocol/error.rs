//! Hub communication errors

use thiserror::Error;

/// Errors that can occur while talking to the hub or the ingestion endpoint
#[derive(Error, Debug)]
pub enum HubError {
    #[error("Failed to open serial port {port}: {reason}")]
    TransportOpen { port: String, reason: String },

    #[error("Serial I/O error: {0}")]
    TransportIo(String),

    #[error("Not connected to hub")]
    NotConnected,

    #[error("No handshake response within {0} ms")]
    HandshakeTimeout(u64),

    #[error("Malformed frame: {0}")]
    Parse(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
