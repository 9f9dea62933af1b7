//! Error types for key exchange and file exchange.

use thiserror::Error;

/// Result type alias for SFX operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during SFX operations.
#[derive(Error, Debug)]
pub enum Error {
    /// DH parameter or key pair generation failed
    #[error("generation failed: {0}")]
    Generation(String),

    /// Peer public value rejected by validation
    #[error("invalid peer public key: {0}")]
    InvalidPeerKey(String),

    /// Unknown or already evicted session
    #[error("session not found")]
    NotFound,

    /// Session timed out before completion
    #[error("session expired")]
    Expired,

    /// Completion replayed against a finished session
    #[error("key exchange already completed")]
    AlreadyCompleted,

    /// Malformed base64, PEM or DER input
    #[error("malformed encoding: {0}")]
    Encoding(String),

    /// Cryptographic operation failed
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Buffer overflow/underflow
    #[error("buffer error: expected {expected} bytes, got {actual}")]
    Buffer { expected: usize, actual: usize },

    /// Session store is full
    #[error("session capacity of {0} reached")]
    Capacity(usize),

    /// No secure channel has been established for the session
    #[error("secure channel not found")]
    ChannelNotFound,

    /// Stored file does not exist
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// File name rejected (path separators, traversal, empty)
    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    /// Upload exceeds the configured limit
    #[error("payload too large: limit {limit} bytes, got {actual}")]
    PayloadTooLarge { limit: usize, actual: usize },

    /// File store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        Error::Generation(msg.into())
    }

    /// Create a new invalid peer key error
    pub fn invalid_peer_key(msg: impl Into<String>) -> Self {
        Error::InvalidPeerKey(msg.into())
    }

    /// Create a new encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }

    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error was caused by caller input rather than the server
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidPeerKey(_)
                | Error::NotFound
                | Error::Expired
                | Error::AlreadyCompleted
                | Error::Encoding(_)
                | Error::ChannelNotFound
                | Error::FileNotFound(_)
                | Error::InvalidFileName(_)
                | Error::PayloadTooLarge { .. }
        )
    }

    /// Short machine-readable category, used in audit details and logs.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Generation(_) => "generation_error",
            Error::InvalidPeerKey(_) => "invalid_peer_key",
            Error::NotFound => "not_found",
            Error::Expired => "expired",
            Error::AlreadyCompleted => "already_completed",
            Error::Encoding(_) => "malformed_encoding",
            Error::Crypto(_) | Error::Buffer { .. } => "crypto_error",
            Error::Capacity(_) => "capacity",
            Error::ChannelNotFound => "channel_not_found",
            Error::FileNotFound(_) => "file_not_found",
            Error::InvalidFileName(_) => "invalid_file_name",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::Storage(_) | Error::Io(_) => "storage_error",
            Error::Config(_) => "config_error",
        }
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Encoding(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AlreadyCompleted;
        assert_eq!(err.to_string(), "key exchange already completed");

        let err = Error::Capacity(10);
        assert_eq!(err.to_string(), "session capacity of 10 reached");
    }

    #[test]
    fn test_client_errors() {
        assert!(Error::NotFound.is_client_error());
        assert!(Error::Expired.is_client_error());
        assert!(Error::invalid_peer_key("out of range").is_client_error());
        assert!(!Error::generation("rng unavailable").is_client_error());
        assert!(!Error::Capacity(1).is_client_error());
    }

    #[test]
    fn test_category() {
        assert_eq!(Error::AlreadyCompleted.category(), "already_completed");
        assert_eq!(Error::encoding("bad pem").category(), "malformed_encoding");
    }
}
