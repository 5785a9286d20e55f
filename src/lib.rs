//! # strata-protocol
//!
//! A framed, encrypted client/server packet protocol over TCP.
//!
//! Every packet carries its own AES-256-CBC body key inside a 62-byte header,
//! and the header itself is obscured with a stream cipher keyed by the current
//! UTC hour. Both ends must agree on the hour; a mismatch surfaces as
//! [`ProtocolError::ClockSkewDecryption`] and closes the connection.
//!
//! ## Layers
//! - [`core`](crate::core): header layout, packet field codec, stream codec
//! - [`protocol`]: packet-type dispatch
//! - [`transport`]: sessions, registry, server and client endpoints
//! - [`utils`]: ciphers, logging, metrics, timeouts
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use strata_protocol::{Client, Dispatcher, Packet, opcodes};
//!
//! # async fn run() -> strata_protocol::Result<()> {
//! let client = Client::start("127.0.0.1", 1447, Arc::new(Dispatcher::new())).await?;
//! let mut ping = Packet::new(opcodes::PING);
//! ping.write_string("ping");
//! client.send(ping)?;
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::config::{DispatchMode, NetworkConfig, DEFAULT_PORT};
pub use crate::core::codec::PacketCodec;
pub use crate::core::header::HEADER_LEN;
pub use crate::core::packet::Packet;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::dispatcher::Dispatcher;
pub use crate::protocol::opcodes;
pub use crate::transport::client::Client;
pub use crate::transport::registry::SessionRegistry;
pub use crate::transport::server::Server;
pub use crate::transport::session::{Session, SessionId};
