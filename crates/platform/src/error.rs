//! Error types for Ember

use thiserror::Error;

/// Unified error type for all Ember operations
#[derive(Debug, Error)]
pub enum EmberError {
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed message contents
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Signature or key material failure
    #[error("Security error: {0}")]
    Security(String),

    /// The peer's algorithm lists do not contain the fixed suite
    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    /// Declared packet structure inconsistent with its contents
    #[error("Framing error: {0}")]
    Framing(String),

    /// Packet authentication tag mismatch
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Message type this implementation does not handle
    #[error("Unsupported message type {0}")]
    UnsupportedMessage(u8),

    /// A known message arrived in the wrong handshake state
    #[error("Handshake violation: {0}")]
    HandshakeViolation(String),

    /// Declared length exceeds the configured limit
    #[error("Resource exhaustion: declared length {declared} exceeds limit {limit}")]
    ResourceExhaustion {
        /// Length announced by the peer
        declared: usize,
        /// Largest length accepted
        limit: usize,
    },
}

impl EmberError {
    /// Whether the error terminates the connection.
    ///
    /// Only [`EmberError::UnsupportedMessage`] is survivable; everything else
    /// drops the connection and resets to the listening state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EmberError::UnsupportedMessage(_))
    }
}

/// Result type for Ember operations
pub type EmberResult<T> = Result<T, EmberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EmberError::Config("Invalid configuration".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration"
        );

        let err = EmberError::ResourceExhaustion {
            declared: 1_000_000,
            limit: 35000,
        };
        assert_eq!(
            err.to_string(),
            "Resource exhaustion: declared length 1000000 exceeds limit 35000"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EmberError = io_err.into();
        assert!(matches!(err, EmberError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_fatality() {
        assert!(!EmberError::UnsupportedMessage(200).is_fatal());
        assert!(EmberError::Framing("short".into()).is_fatal());
        assert!(EmberError::Authentication("tag".into()).is_fatal());
        assert!(EmberError::HandshakeViolation("order".into()).is_fatal());
        assert!(EmberError::ResourceExhaustion {
            declared: 2,
            limit: 1
        }
        .is_fatal());
    }

    #[test]
    fn test_result_type() {
        fn returns_result() -> EmberResult<i32> {
            Ok(42)
        }

        assert_eq!(returns_result().unwrap(), 42);
    }
}
