//! # Core Protocol Components
//!
//! Packet layout, field codec, and stream framing.
//!
//! ## Components
//! - **Header**: the fixed 62-byte header carrying length, type and body key material
//! - **Packet**: typed field reads and writes over header + body, and finalization
//! - **Codec**: Tokio codec running the receive state machine and sender framing
//!
//! ## Wire Format
//! ```text
//! [encHeaderLen u32 LE = 62] [header, hourly stream cipher (62)] [body, AES-256-CBC (N * 16)]
//!
//! header = bodyLength u32 | packetType u16 | keyLen u16 = 32 | pad u8 | pad u8 |
//!          key [32] | pad u16 | ivLen u16 = 16 | iv [16]
//! ```
//!
//! All integers are little-endian.
//!
//! ## Limits
//! - Maximum encrypted body: 16MB by default, checked before any body allocation
//! - A declared header length other than 62 is a framing error

pub mod codec;
pub mod header;
pub mod packet;
