//! Fixed 62-byte packet header.
//!
//! ```text
//! offset  size  field
//!      0     4  body length (encrypted bytes that follow the header)
//!      4     2  packet type
//!      6     2  body key length (= 32)
//!      8     1  pad
//!      9     1  pad
//!     10    32  body key
//!     42     2  pad
//!     44     2  body IV length (= 16)
//!     46    16  body IV
//! ```
//!
//! All integers are little-endian. The size is fixed only because the body cipher
//! is AES-256-CBC; a different suite changes [`HEADER_LEN`].

use rand::Rng;

use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{KeyMaterial, BODY_BLOCK_LEN, BODY_IV_LEN, BODY_KEY_LEN};

/// Header length in bytes, before and after header encryption
pub const HEADER_LEN: usize = 62;

pub const BODY_LENGTH_OFFSET: usize = 0;
pub const TYPE_OFFSET: usize = 4;
pub const KEY_LENGTH_OFFSET: usize = 6;
pub const KEY_OFFSET: usize = 10;
pub const IV_LENGTH_OFFSET: usize = 44;
pub const IV_OFFSET: usize = 46;

/// Decoded header fields.
#[derive(Debug, Clone)]
pub struct Header {
    pub body_length: u32,
    pub packet_type: u16,
    pub keys: KeyMaterial,
}

impl Header {
    /// Serialize with fresh random padding.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut rng = rand::rng();
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.body_length.to_le_bytes());
        out[4..6].copy_from_slice(&self.packet_type.to_le_bytes());
        out[6..8].copy_from_slice(&(BODY_KEY_LEN as u16).to_le_bytes());
        out[8] = rng.random_range(1..=254u8);
        out[9] = rng.random_range(1..=254u8);
        out[KEY_OFFSET..KEY_OFFSET + BODY_KEY_LEN].copy_from_slice(&self.keys.key);
        out[42..44].copy_from_slice(&rng.random_range(1..=32766u16).to_le_bytes());
        out[44..46].copy_from_slice(&(BODY_IV_LEN as u16).to_le_bytes());
        out[IV_OFFSET..IV_OFFSET + BODY_IV_LEN].copy_from_slice(&self.keys.iv);
        out
    }

    /// Parse a plaintext header without validating the body length.
    ///
    /// A wrong header key turns the length fields into noise, so a mismatch here
    /// is reported as clock skew.
    pub fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        let key_len = read_u16(raw, KEY_LENGTH_OFFSET);
        if key_len as usize != BODY_KEY_LEN {
            return Err(ProtocolError::ClockSkewDecryption(format!(
                "{} ({key_len})",
                constants::ERR_BAD_KEY_LENGTH
            )));
        }
        let iv_len = read_u16(raw, IV_LENGTH_OFFSET);
        if iv_len as usize != BODY_IV_LEN {
            return Err(ProtocolError::ClockSkewDecryption(format!(
                "{} ({iv_len})",
                constants::ERR_BAD_IV_LENGTH
            )));
        }

        let mut keys = KeyMaterial {
            key: [0u8; BODY_KEY_LEN],
            iv: [0u8; BODY_IV_LEN],
        };
        keys.key
            .copy_from_slice(&raw[KEY_OFFSET..KEY_OFFSET + BODY_KEY_LEN]);
        keys.iv.copy_from_slice(&raw[IV_OFFSET..IV_OFFSET + BODY_IV_LEN]);

        Ok(Self {
            body_length: read_u32(raw, BODY_LENGTH_OFFSET),
            packet_type: read_u16(raw, TYPE_OFFSET),
            keys,
        })
    }

    /// Check that the declared body length is one a peer could have produced.
    ///
    /// Lengths that are not whole AES blocks only come from a mis-keyed header.
    pub fn validate_body_length(&self, max_body_size: usize) -> Result<()> {
        let len = self.body_length as usize;
        if len > max_body_size {
            return Err(ProtocolError::OversizedPacket(len));
        }
        if len == 0 || len % BODY_BLOCK_LEN != 0 {
            return Err(ProtocolError::ClockSkewDecryption(format!(
                "{} ({len})",
                constants::ERR_BAD_BODY_LENGTH
            )));
        }
        Ok(())
    }
}

#[inline]
fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

#[inline]
fn read_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}
