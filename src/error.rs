//! Error handling module
//!
//! Defines custom error types for the Ravenmoor server.

use std::io;

use thiserror::Error;

/// Main error type for the Ravenmoor server
#[derive(Error, Debug)]
pub enum RavenmoorError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RavenmoorError {
    /// Whether this error must terminate the connection it was raised on.
    ///
    /// Fatal errors are the protocol-violation categories; everything else is
    /// contained at the dispatch boundary and the connection survives.
    pub fn is_fatal(&self) -> bool {
        match self {
            RavenmoorError::Protocol(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Session not found: {0}")]
    SessionNotFound(u64),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Inbound buffer ceiling exceeded: {buffered} bytes buffered (limit: {limit})")]
    BufferCeilingExceeded { buffered: usize, limit: usize },

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Accept error: {0}")]
    AcceptError(String),
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid handshake seed (zero)")]
    InvalidSeed,

    #[error("Corrupt stream: declared packet length {declared} below minimum")]
    CorruptLength { declared: usize },

    #[error("Disallowed first packet opcode: 0x{0:02X}")]
    DisallowedFirstOpcode(u8),

    #[error("Opcode 0x{0:02X} requires an attached actor")]
    ActorRequired(u8),

    #[error("Opcode 0x{0:02X} received for a deleted actor")]
    ActorDeleted(u8),

    #[error("Unregistered opcode: 0x{0:02X}")]
    UnregisteredOpcode(u8),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

impl ProtocolError {
    /// Fatal categories disconnect the session; the rest are recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidSeed
                | ProtocolError::CorruptLength { .. }
                | ProtocolError::DisallowedFirstOpcode(_)
                | ProtocolError::ActorRequired(_)
                | ProtocolError::ActorDeleted(_)
        )
    }
}

/// Result type alias for Ravenmoor operations
pub type Result<T> = std::result::Result<T, RavenmoorError>;
