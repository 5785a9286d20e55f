//! Well-known packet types.
//!
//! Applications assign their own types through
//! [`Dispatcher::register`](crate::protocol::dispatcher::Dispatcher::register);
//! these are the ones the crate itself knows about.

/// Never assigned to a message
pub const RESERVED: u16 = 0x0000;

/// Liveness probe carrying a single string field
pub const PING: u16 = 0x0001;

/// Reply to [`PING`], echoing its string field
pub const PONG: u16 = 0x0002;

/// Human-readable name for logging.
pub fn name(packet_type: u16) -> &'static str {
    match packet_type {
        RESERVED => "RESERVED",
        PING => "PING",
        PONG => "PONG",
        _ => "APPLICATION",
    }
}
