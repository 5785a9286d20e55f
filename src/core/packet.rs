//! # Packet
//!
//! An in-memory packet: the 62-byte [header](crate::core::header) followed by a
//! body of typed fields. Writes append to the body; reads walk a cursor that
//! starts just past the header, or jump to an explicit body offset with the
//! `*_at` variants.
//!
//! Integers and floats are little-endian. Strings are written as
//! `u32 len | base64(utf8(value))`, never NUL-terminated.
//!
//! ```rust
//! use strata_protocol::core::packet::Packet;
//!
//! let mut packet = Packet::new(0x0001);
//! packet.write_string("ping");
//! packet.write_u32(42);
//!
//! assert_eq!(packet.read_string().unwrap(), "ping");
//! assert_eq!(packet.read_u32().unwrap(), 42);
//! assert_eq!(packet.read_u32_at(12).unwrap(), 42);
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, BytesMut};

use crate::core::header::{Header, HEADER_LEN, IV_OFFSET, KEY_OFFSET, TYPE_OFFSET};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::crypto::{
    encrypt_body, HeaderCipher, KeyMaterial, BODY_BLOCK_LEN, BODY_IV_LEN, BODY_KEY_LEN,
};

/// Length of the prefix carrying the encrypted header size
pub const FRAME_PREFIX_LEN: usize = 4;

/// Generates a reader/offset-reader pair for a fixed-width little-endian value.
macro_rules! read_le {
    ($read:ident, $read_at:ident, $ty:ty) => {
        #[doc = concat!("Read a `", stringify!($ty), "` at the cursor.")]
        pub fn $read(&mut self) -> Result<$ty> {
            const LEN: usize = std::mem::size_of::<$ty>();
            let mut bytes = [0u8; LEN];
            bytes.copy_from_slice(self.take(LEN, None)?);
            Ok(<$ty>::from_le_bytes(bytes))
        }

        #[doc = concat!("Read a `", stringify!($ty), "` at a body offset and move the cursor past it.")]
        pub fn $read_at(&mut self, offset: usize) -> Result<$ty> {
            const LEN: usize = std::mem::size_of::<$ty>();
            let mut bytes = [0u8; LEN];
            bytes.copy_from_slice(self.take(LEN, Some(offset))?);
            Ok(<$ty>::from_le_bytes(bytes))
        }
    };
}

macro_rules! write_le {
    ($write:ident, $ty:ty) => {
        #[doc = concat!("Append a `", stringify!($ty), "`.")]
        pub fn $write(&mut self, value: $ty) {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    };
}

/// A protocol packet: header region plus typed body fields.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: Vec<u8>,
    cursor: usize,
    /// Built locally with fresh key material in its header
    outbound: bool,
}

impl Packet {
    /// Start an outbound packet. Key material is generated here and stored in the header.
    pub fn new(packet_type: u16) -> Self {
        let header = Header {
            body_length: 0,
            packet_type,
            keys: KeyMaterial::generate(),
        };
        let mut buf = Vec::with_capacity(HEADER_LEN + 64);
        buf.extend_from_slice(&header.encode());
        Self {
            buf,
            cursor: HEADER_LEN,
            outbound: true,
        }
    }

    /// Assemble a received packet from its decrypted header and body.
    pub fn from_parts(header: &[u8; HEADER_LEN], body: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
        buf.extend_from_slice(header);
        buf.extend_from_slice(body);
        Self {
            buf,
            cursor: HEADER_LEN,
            outbound: false,
        }
    }

    /// Packet type from the header. Recomputed on every call; it is two bytes.
    pub fn packet_type(&self) -> u16 {
        u16::from_le_bytes([self.buf[TYPE_OFFSET], self.buf[TYPE_OFFSET + 1]])
    }

    /// Overwrite the packet type in place.
    pub fn set_type(&mut self, packet_type: u16) {
        self.buf[TYPE_OFFSET..TYPE_OFFSET + 2].copy_from_slice(&packet_type.to_le_bytes());
    }

    /// The raw (plaintext) header region.
    pub fn header(&self) -> &[u8] {
        &self.buf[..HEADER_LEN]
    }

    /// The plaintext body region.
    pub fn body(&self) -> &[u8] {
        &self.buf[HEADER_LEN..]
    }

    pub fn body_len(&self) -> usize {
        self.buf.len() - HEADER_LEN
    }

    /// Size of the finalized frame: prefix, header, and PKCS#7-padded body.
    pub fn wire_len(&self) -> usize {
        let padded = (self.body_len() / BODY_BLOCK_LEN + 1) * BODY_BLOCK_LEN;
        FRAME_PREFIX_LEN + HEADER_LEN + padded
    }

    /// Cursor position relative to the start of the body.
    pub fn position(&self) -> usize {
        self.cursor - HEADER_LEN
    }

    /// Move the read cursor back to the first body byte.
    pub fn rewind(&mut self) {
        self.cursor = HEADER_LEN;
    }

    /// Bytes left between the cursor and the end of the body.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.cursor)
    }

    /// Read raw bytes from the header region, ignoring the body cursor.
    pub fn read_header_bytes(&self, offset: usize, count: usize) -> Result<&[u8]> {
        let end = offset.saturating_add(count);
        if end > HEADER_LEN {
            return Err(ProtocolError::TruncatedPacket {
                needed: end,
                available: HEADER_LEN,
            });
        }
        Ok(&self.buf[offset..end])
    }

    fn take(&mut self, count: usize, offset: Option<usize>) -> Result<&[u8]> {
        let start = match offset {
            Some(at) => HEADER_LEN.saturating_add(at),
            None => self.cursor.max(HEADER_LEN),
        };
        let end = start.saturating_add(count);
        if end > self.buf.len() {
            return Err(ProtocolError::TruncatedPacket {
                needed: end.saturating_sub(HEADER_LEN),
                available: self.body_len(),
            });
        }
        self.cursor = end;
        Ok(&self.buf[start..end])
    }

    // ---- writes ---------------------------------------------------------

    write_le!(write_i16, i16);
    write_le!(write_u16, u16);
    write_le!(write_i32, i32);
    write_le!(write_u32, u32);
    write_le!(write_i64, i64);
    write_le!(write_u64, u64);
    write_le!(write_f32, f32);

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Append raw bytes with no length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    /// Overwrite body bytes in place at a body offset. The body never grows.
    pub fn write_bytes_at(&mut self, offset: usize, value: &[u8]) -> Result<()> {
        let start = HEADER_LEN.saturating_add(offset);
        let end = start.saturating_add(value.len());
        if end > self.buf.len() {
            return Err(ProtocolError::TruncatedPacket {
                needed: end.saturating_sub(HEADER_LEN),
                available: self.body_len(),
            });
        }
        self.buf[start..end].copy_from_slice(value);
        Ok(())
    }

    /// Append a string as `u32 len | base64(utf8)`.
    pub fn write_string(&mut self, value: &str) {
        let encoded = STANDARD.encode(value.as_bytes());
        self.buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(encoded.as_bytes());
    }

    /// Append a string whose base64 form must be exactly `size` bytes.
    pub fn write_string_fixed(&mut self, value: &str, size: usize) -> Result<()> {
        let encoded = STANDARD.encode(value.as_bytes());
        if encoded.len() != size {
            return Err(ProtocolError::Encoding(format!(
                "string encodes to {} base64 bytes, field is {size}",
                encoded.len()
            )));
        }
        self.buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(encoded.as_bytes());
        Ok(())
    }

    // ---- reads ----------------------------------------------------------

    read_le!(read_i16, read_i16_at, i16);
    read_le!(read_u16, read_u16_at, u16);
    read_le!(read_i32, read_i32_at, i32);
    read_le!(read_u32, read_u32_at, u32);
    read_le!(read_i64, read_i64_at, i64);
    read_le!(read_u64, read_u64_at, u64);
    read_le!(read_f32, read_f32_at, f32);

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, None)?[0])
    }

    pub fn read_u8_at(&mut self, offset: usize) -> Result<u8> {
        Ok(self.take(1, Some(offset))?[0])
    }

    /// Any non-zero byte reads as `true`.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_bool_at(&mut self, offset: usize) -> Result<bool> {
        Ok(self.read_u8_at(offset)? != 0)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        Ok(self.take(count, None)?.to_vec())
    }

    pub fn read_bytes_at(&mut self, offset: usize, count: usize) -> Result<Vec<u8>> {
        Ok(self.take(count, Some(offset))?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let raw = self.take(len, None)?;
        decode_string(raw)
    }

    pub fn read_string_at(&mut self, offset: usize) -> Result<String> {
        let len = self.read_u32_at(offset)? as usize;
        let raw = self.take(len, None)?;
        decode_string(raw)
    }

    // ---- finalization ---------------------------------------------------

    /// Encrypt and frame the packet for the wire, consuming it.
    ///
    /// Output: `[u32 encrypted header len][encrypted header][encrypted body]`.
    /// Packets that were decoded from the wire get new key material first, so a
    /// forwarded packet never reuses its sender's body key.
    pub fn finalize(mut self, header_cipher: &HeaderCipher) -> Result<BytesMut> {
        let mut out = BytesMut::new();
        self.finalize_into(header_cipher, &mut out)?;
        Ok(out)
    }

    pub(crate) fn finalize_into(
        &mut self,
        header_cipher: &HeaderCipher,
        dst: &mut BytesMut,
    ) -> Result<()> {
        if !self.outbound {
            let fresh = KeyMaterial::generate();
            self.buf[KEY_OFFSET..KEY_OFFSET + BODY_KEY_LEN].copy_from_slice(&fresh.key);
            self.buf[IV_OFFSET..IV_OFFSET + BODY_IV_LEN].copy_from_slice(&fresh.iv);
            self.outbound = true;
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);

        let mut keys = KeyMaterial {
            key: [0u8; BODY_KEY_LEN],
            iv: [0u8; BODY_IV_LEN],
        };
        keys.key.copy_from_slice(&header[KEY_OFFSET..KEY_OFFSET + BODY_KEY_LEN]);
        keys.iv.copy_from_slice(&header[IV_OFFSET..IV_OFFSET + BODY_IV_LEN]);

        let body = encrypt_body(self.body(), &keys.key, &keys.iv);
        let body_len = u32::try_from(body.len())
            .map_err(|_| ProtocolError::OversizedPacket(body.len()))?;
        header[0..4].copy_from_slice(&body_len.to_le_bytes());
        header_cipher.apply(&mut header);

        dst.reserve(FRAME_PREFIX_LEN + HEADER_LEN + body.len());
        dst.put_u32_le(HEADER_LEN as u32);
        dst.put_slice(&header);
        dst.put_slice(&body);
        Ok(())
    }
}

/// Packets compare by type and body; headers carry per-send key material and padding.
impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.packet_type() == other.packet_type() && self.body() == other.body()
    }
}

impl Eq for Packet {}

fn decode_string(raw: &[u8]) -> Result<String> {
    let bytes = STANDARD
        .decode(raw)
        .map_err(|e| ProtocolError::Encoding(format!("{}: {e}", constants::ERR_INVALID_BASE64)))?;
    String::from_utf8(bytes)
        .map_err(|e| ProtocolError::Encoding(format!("{}: {e}", constants::ERR_INVALID_UTF8)))
}
