//! OBD-II Error Types

use thiserror::Error;

/// Errors raised by the transport and discovery capabilities
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Adapter disabled, missing or not supported on this host
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// Host refused access to the adapter or device
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The link to the device could not be opened
    #[error("Failed to open link: {0}")]
    Open(String),
}

/// Errors produced while decoding an adapter reply.
///
/// These are local to one decode and never end a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Wrong acknowledgement, wrong PID echo or not enough data bytes
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// PID has no entry in the decoder registry
    #[error("PID {0:02X} has no decoder")]
    UnknownPid(u8),
}

/// Errors that can occur during OBD-II communication
#[derive(Debug, Error)]
pub enum ObdError {
    /// Adapter disabled or permission missing
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(TransportError),

    /// Link could not be opened or the adapter failed to initialize
    #[error("Connect failed: {0}")]
    ConnectFailure(String),

    /// Read or write failed mid-session
    #[error("I/O error: {0}")]
    Io(String),

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// No open session
    #[error("OBD adapter not connected")]
    NotConnected,

    /// A session is already open
    #[error("OBD adapter already connected")]
    AlreadyConnected,

    /// Another connect attempt is running
    #[error("Connect attempt already in progress")]
    ConnectInProgress,

    /// Reply could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl ObdError {
    /// Whether this error means the link is gone and polling must stop
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ObdError::Io(_) | ObdError::Timeout(_) | ObdError::NotConnected
        )
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_failure_classification() {
        assert!(ObdError::Timeout(2000).is_link_failure());
        assert!(ObdError::Io("broken pipe".into()).is_link_failure());
        assert!(ObdError::NotConnected.is_link_failure());
        assert!(!ObdError::Decode(DecodeError::UnknownPid(0x99)).is_link_failure());
        assert!(!ObdError::ConnectFailure("refused".into()).is_link_failure());
    }

    #[test]
    fn test_io_error_conversion() {
        let err: ObdError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        assert!(matches!(err, ObdError::Io(msg) if msg.contains("gone")));
    }
}
