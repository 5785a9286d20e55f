//! # Error Types
//!
//! Error handling for the packet protocol.
//!
//! Every fallible operation in the crate returns [`Result<T>`], whose error side is
//! [`ProtocolError`]. Variants fall into two propagation classes:
//!
//! ## Connection-fatal
//! - **Framing**: the declared encrypted-header length is not the fixed size
//! - **Clock skew**: the hourly header key disagrees between the two ends
//! - **Body decryption**: the per-packet body cipher rejected the ciphertext
//! - **I/O**: socket failures; the session is closed and removed from the registry
//!
//! ## Packet-local
//! - **Truncated packet**: a field read ran past the available bytes
//! - **Encoding**: a string field could not be encoded or decoded
//! - **Unknown packet type**: no handler is registered; the packet is dropped
//!
//! Use [`ProtocolError::is_connection_fatal`] to apply the policy.
//!
//! ## Example Usage
//! ```rust
//! use strata_protocol::core::packet::Packet;
//! use strata_protocol::error::ProtocolError;
//!
//! let mut packet = Packet::new(0x0001);
//! match packet.read_u32() {
//!     Err(ProtocolError::TruncatedPacket { .. }) => {}
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry-related error messages
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on session registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on session registry";

    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Header validation errors
    pub const ERR_BAD_KEY_LENGTH: &str = "Header carries an unexpected body key length";
    pub const ERR_BAD_IV_LENGTH: &str = "Header carries an unexpected body IV length";
    pub const ERR_BAD_BODY_LENGTH: &str = "Header carries an implausible body length";

    /// Codec errors
    pub const ERR_INVALID_BASE64: &str = "String field is not valid base64";
    pub const ERR_INVALID_UTF8: &str = "String field is not valid UTF-8";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Framing error: expected encrypted header of {expected} bytes, got {actual}")]
    Framing { expected: usize, actual: usize },

    #[error("Header decryption failed, peer clock may disagree on the hour: {0}")]
    ClockSkewDecryption(String),

    #[error("Truncated packet: needed {needed} bytes, {available} available")]
    TruncatedPacket { needed: usize, available: usize },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Unknown packet type: {0:#06x}")]
    UnknownPacketType(u16),

    #[error("Body decryption failed")]
    DecryptionFailure,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error must tear the connection down.
    ///
    /// Codec- and dispatch-level failures only reject the packet that caused them.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::TruncatedPacket { .. }
                | ProtocolError::Encoding(_)
                | ProtocolError::UnknownPacketType(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
