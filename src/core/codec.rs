//! # Packet Codec
//!
//! [`PacketCodec`] frames packets over a byte stream.
//!
//! The decoder is the receive state machine. It consumes bytes as they arrive
//! and keeps its position across calls, so a packet may be split over any number
//! of socket reads and a read may carry the start of the next frame:
//!
//! ```text
//! AwaitingHeaderLength --4 bytes--> AwaitingHeader --62 bytes--> AwaitingBody
//!          ^                                                          |
//!          +-------------- packet ready, state reset <-- body complete+
//! ```
//!
//! The encoder finalizes outbound packets (body encryption, length stamping,
//! header encryption, length prefix).
//!
//! Both directions key the header cipher from the codec's clock, UTC now by
//! default.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use chrono::{DateTime, Utc};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::MAX_BODY_SIZE;
use crate::core::header::{Header, HEADER_LEN};
use crate::core::packet::{Packet, FRAME_PREFIX_LEN};
use crate::error::{ProtocolError, Result};
use crate::utils::crypto::{decrypt_body, HeaderCipher, BODY_BLOCK_LEN};

/// Source of wall-clock time for the hourly header key.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Observable position of the receive state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStage {
    AwaitingHeaderLength,
    AwaitingHeader,
    AwaitingBody,
}

enum ReceiveState {
    AwaitingHeaderLength,
    AwaitingHeader,
    AwaitingBody {
        raw_header: [u8; HEADER_LEN],
        header: Header,
        body: BytesMut,
    },
}

/// Stream codec for the packet wire format.
pub struct PacketCodec {
    state: ReceiveState,
    max_body_size: usize,
    clock: Clock,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PacketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCodec")
            .field("stage", &self.stage())
            .field("max_body_size", &self.max_body_size)
            .finish()
    }
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            state: ReceiveState::AwaitingHeaderLength,
            max_body_size: MAX_BODY_SIZE,
            clock: Arc::new(Utc::now),
        }
    }

    /// Reject frames whose encrypted body exceeds `max` bytes.
    pub fn with_max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = max;
        self
    }

    /// Replace the clock used to derive the hourly header key.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Use an already-shared clock, as connection tasks do.
    pub fn with_shared_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn stage(&self) -> ReceiveStage {
        match self.state {
            ReceiveState::AwaitingHeaderLength => ReceiveStage::AwaitingHeaderLength,
            ReceiveState::AwaitingHeader => ReceiveStage::AwaitingHeader,
            ReceiveState::AwaitingBody { .. } => ReceiveStage::AwaitingBody,
        }
    }

    /// True once any byte of a frame has been consumed and the frame is not complete.
    pub fn is_mid_frame(&self) -> bool {
        !matches!(self.state, ReceiveState::AwaitingHeaderLength)
    }

    fn header_cipher(&self) -> HeaderCipher {
        HeaderCipher::for_time((self.clock)())
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match &mut self.state {
                ReceiveState::AwaitingHeaderLength => {
                    if src.len() < FRAME_PREFIX_LEN {
                        return Ok(None);
                    }
                    let declared = src.get_u32_le() as usize;
                    if declared != HEADER_LEN {
                        return Err(ProtocolError::Framing {
                            expected: HEADER_LEN,
                            actual: declared,
                        });
                    }
                    self.state = ReceiveState::AwaitingHeader;
                }
                ReceiveState::AwaitingHeader => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let mut raw_header = [0u8; HEADER_LEN];
                    src.copy_to_slice(&mut raw_header);
                    self.header_cipher().apply(&mut raw_header);

                    let header = Header::decode(&raw_header).and_then(|h| {
                        h.validate_body_length(self.max_body_size)?;
                        Ok(h)
                    });
                    let header = match header {
                        Ok(h) => h,
                        Err(e) => {
                            self.state = ReceiveState::AwaitingHeaderLength;
                            return Err(e);
                        }
                    };
                    trace!(
                        packet_type = header.packet_type,
                        body_length = header.body_length,
                        "Header decoded"
                    );
                    let body = BytesMut::with_capacity(header.body_length as usize);
                    self.state = ReceiveState::AwaitingBody {
                        raw_header,
                        header,
                        body,
                    };
                }
                ReceiveState::AwaitingBody {
                    raw_header,
                    header,
                    body,
                } => {
                    let expected = header.body_length as usize;
                    let wanted = expected - body.len();
                    let available = wanted.min(src.len());
                    body.extend_from_slice(&src.split_to(available));
                    if body.len() < expected {
                        return Ok(None);
                    }

                    let plain = decrypt_body(&body[..], &header.keys.key, &header.keys.iv);
                    let packet = plain.map(|plain| Packet::from_parts(raw_header, &plain));
                    self.state = ReceiveState::AwaitingHeaderLength;
                    return packet.map(Some);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() && !self.is_mid_frame() => Ok(None),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, mut packet: Packet, dst: &mut BytesMut) -> Result<()> {
        // Same measure the peer's decoder applies: the padded ciphertext length
        let encrypted_len = (packet.body_len() / BODY_BLOCK_LEN + 1) * BODY_BLOCK_LEN;
        if encrypted_len > self.max_body_size {
            return Err(ProtocolError::OversizedPacket(encrypted_len));
        }
        packet.finalize_into(&self.header_cipher(), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_clock(hour: u32) -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
        move || Utc.with_ymd_and_hms(2024, 6, 1, hour, 30, 0).unwrap()
    }

    fn frame(packet: Packet) -> BytesMut {
        let mut codec = PacketCodec::new().with_clock(fixed_clock(10));
        let mut buf = BytesMut::new();
        codec.encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn stages_advance_with_input() {
        let mut p = Packet::new(0x0001);
        p.write_string("ping");
        let wire = frame(p);

        let mut codec = PacketCodec::new().with_clock(fixed_clock(10));
        let mut src = BytesMut::new();

        src.extend_from_slice(&wire[..2]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(codec.stage(), ReceiveStage::AwaitingHeaderLength);

        src.extend_from_slice(&wire[2..10]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(codec.stage(), ReceiveStage::AwaitingHeader);

        src.extend_from_slice(&wire[10..70]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(codec.stage(), ReceiveStage::AwaitingBody);

        src.extend_from_slice(&wire[70..]);
        let mut packet = codec.decode(&mut src).unwrap().expect("complete packet");
        assert_eq!(codec.stage(), ReceiveStage::AwaitingHeaderLength);
        assert_eq!(packet.packet_type(), 0x0001);
        assert_eq!(packet.read_string().unwrap(), "ping");
    }

    #[test]
    fn overrun_into_next_frame_is_kept() {
        let mut a = Packet::new(1);
        a.write_u32(11);
        let mut b = Packet::new(2);
        b.write_u32(22);
        let mut src = frame(a);
        src.extend_from_slice(&frame(b));

        let mut codec = PacketCodec::new().with_clock(fixed_clock(10));
        let mut first = codec.decode(&mut src).unwrap().unwrap();
        let mut second = codec.decode(&mut src).unwrap().unwrap();
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert_eq!(first.read_u32().unwrap(), 11);
        assert_eq!(second.packet_type(), 2);
        assert_eq!(second.read_u32().unwrap(), 22);
    }

    #[test]
    fn wrong_header_length_is_framing_error() {
        let mut src = BytesMut::new();
        src.extend_from_slice(&61u32.to_le_bytes());
        src.extend_from_slice(&[0u8; 61]);
        let err = PacketCodec::new().decode(&mut src).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Framing {
                expected: 62,
                actual: 61
            }
        ));
    }

    #[test]
    fn other_hour_is_clock_skew() {
        let mut src = frame(Packet::new(1));
        let mut codec = PacketCodec::new().with_clock(fixed_clock(11));
        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(err, ProtocolError::ClockSkewDecryption(_)));
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn body_limit_applies_to_declared_length() {
        let mut p = Packet::new(1);
        p.write_bytes(&[0u8; 100]);
        let mut src = frame(p);
        let mut codec = PacketCodec::new()
            .with_clock(fixed_clock(10))
            .with_max_body_size(64);
        assert!(matches!(
            codec.decode(&mut src),
            Err(ProtocolError::OversizedPacket(112))
        ));
    }

    #[test]
    fn encoder_refuses_oversized_body() {
        let mut p = Packet::new(1);
        p.write_bytes(&[0u8; 64]);
        let mut codec = PacketCodec::new().with_max_body_size(64);
        let mut dst = BytesMut::new();
        assert!(matches!(
            codec.encode(p, &mut dst),
            Err(ProtocolError::OversizedPacket(80))
        ));
    }

    #[test]
    fn encoder_limit_matches_decoder_when_unaligned() {
        let mut encoder = PacketCodec::new()
            .with_clock(fixed_clock(10))
            .with_max_body_size(100);
        let mut decoder = PacketCodec::new()
            .with_clock(fixed_clock(10))
            .with_max_body_size(100);
        let mut dst = BytesMut::new();

        let mut too_big = Packet::new(1);
        too_big.write_bytes(&[7u8; 99]);
        assert!(matches!(
            encoder.encode(too_big, &mut dst),
            Err(ProtocolError::OversizedPacket(112))
        ));
        assert!(dst.is_empty());

        let mut fits = Packet::new(1);
        fits.write_bytes(&[7u8; 95]);
        encoder.encode(fits, &mut dst).unwrap();
        let decoded = decoder.decode(&mut dst).unwrap().expect("accepted by peer");
        assert_eq!(decoded.body_len(), 95);
    }

    #[test]
    fn eof_mid_frame_is_connection_closed() {
        let wire = frame(Packet::new(1));
        let mut src = BytesMut::from(&wire[..wire.len() - 1]);
        let mut codec = PacketCodec::new().with_clock(fixed_clock(10));
        assert!(codec.decode(&mut src).unwrap().is_none());
        assert!(matches!(
            codec.decode_eof(&mut src),
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[test]
    fn eof_between_frames_is_clean() {
        let mut src = BytesMut::new();
        assert!(PacketCodec::new().decode_eof(&mut src).unwrap().is_none());
    }

    #[test]
    fn tampered_body_fails_decryption() {
        let mut p = Packet::new(1);
        p.write_string("tamper me");
        let mut wire = frame(p);
        // Flipping the first body block corrupts the padding byte of the second.
        wire[FRAME_PREFIX_LEN + HEADER_LEN] ^= 0xFF;
        let mut codec = PacketCodec::new().with_clock(fixed_clock(10));
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::DecryptionFailure)
        ));
        assert_eq!(codec.stage(), ReceiveStage::AwaitingHeaderLength);
    }
}
