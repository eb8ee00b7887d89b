//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur while talking to an ELM327 adapter
#[derive(Debug, Error)]
pub enum ObdError {
    /// The serial port exists but we are not allowed to open it
    #[error("Permission denied opening {0}")]
    PermissionDenied(String),

    /// The port name does not refer to a usable serial device
    #[error("Invalid serial port address: {0}")]
    InvalidAddress(String),

    /// The port is already held by this or another process
    #[error("Serial port already open: {0}")]
    AlreadyOpen(String),

    /// Reset output did not identify an ELM327 (wrong device, garbled, or silent)
    #[error("ELM327 adapter not detected: {0}")]
    AdapterNotDetected(String),

    /// Timeout waiting for a line from the adapter
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// The adapter echoed something other than the command we sent
    #[error("Echo mismatch: sent {sent:?}, received {received:?}")]
    EchoMismatch { sent: String, received: String },

    /// Any other serial port failure
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Operation attempted on a link that has been disconnected
    #[error("OBD link is not connected")]
    NotConnected,
}

impl ObdError {
    /// Whether this error is a read timeout rather than a hard failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, ObdError::Timeout(_))
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
