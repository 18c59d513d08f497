//! Error types for mongoproxy
//!
//! One error hierarchy shared by the codecs and the relay. Network failures
//! and protocol decode failures are kept apart so the relay can tell a peer
//! hanging up from a malformed byte stream.

use thiserror::Error;

/// Result type alias using mongoproxy's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mongoproxy
#[derive(Error, Debug)]
pub enum Error {
    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Network Errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    // Protocol Errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stream unavailable, failed read or write, reset, timeout
    Io,
    /// Malformed frame or document
    Decode,
    Config,
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Network(_) => ErrorKind::Io,
            Error::Protocol(_) => ErrorKind::Decode,
            Error::Config(_) => ErrorKind::Config,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the peer closed its side of the connection between frames
    /// or reset it; these end a relay without being a fault of the proxy.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Network(NetworkError::ConnectionClosed) => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Network-related errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Protocol-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length {length} (minimum {minimum})")]
    InvalidFrameLength { length: u32, minimum: u32 },

    #[error("Frame of {length} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { length: u32, limit: u32 },

    #[error("Truncated input: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("Unknown element type 0x{code:02x} at offset {offset}")]
    UnknownElementType { code: u8, offset: usize },

    #[error("Unterminated C string at offset {0}")]
    InvalidCString(usize),

    #[error("Invalid UTF-8 at offset {0}")]
    InvalidUtf8(usize),

    #[error("Length mismatch at offset {offset}: declared {declared}, consumed {consumed}")]
    LengthMismatch {
        offset: usize,
        declared: usize,
        consumed: usize,
    },

    #[error("Missing document terminator at offset {0}")]
    MissingTerminator(usize),

    #[error("Documents nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
