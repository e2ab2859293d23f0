//! Error types for the cache server
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Server Error Enum ==
/// Unified error type for the cache server.
///
/// Command-level failures (bad arity, unknown command, bad flag) are not
/// errors at this level: they are reported inline to the client as RESP
/// error replies. This enum covers framing, I/O and startup failures.
#[derive(Error, Debug)]
pub enum HpcsError {
    /// Malformed framing on a connection (bad line terminator, bad length)
    #[error("invalid protocol")]
    InvalidProtocol,

    /// A frame began with a byte that is not one of the five type tags
    #[error("invalid type byte {0:#04x}")]
    InvalidType(u8),

    /// Invalid configuration at load time
    #[error("config error: {0}")]
    Config(String),

    /// Socket read/write/accept failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// == Result Type Alias ==
/// Convenience Result type for the cache server.
pub type Result<T> = std::result::Result<T, HpcsError>;
