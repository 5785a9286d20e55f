//! # Transport Layer
//!
//! TCP endpoints and the per-connection machinery behind them.
//!
//! ## Components
//! - **Session**: identity, remote address and outbound queue of one connection
//! - **Registry**: the server's set of live sessions
//! - **Connection**: receive loop and writer task for one stream
//! - **Server**: listener, accept loop and graceful shutdown
//! - **Client**: connecting endpoint sharing the same receive path

pub mod client;
pub mod connection;
pub mod registry;
pub mod server;
pub mod session;
