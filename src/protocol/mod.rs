//! # Protocol Layer
//!
//! Packet-type routing.
//!
//! ## Components
//! - **Dispatcher**: maps a packet type to its handler and runs it
//! - **Opcodes**: packet types the crate itself defines
//!
//! Handlers are plain closures taking the originating session and the decoded
//! packet. They reply by queueing packets on the session.

pub mod dispatcher;
pub mod opcodes;

#[cfg(test)]
mod tests;
