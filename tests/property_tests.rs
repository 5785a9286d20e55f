//! Property-based tests using proptest
//!
//! These tests validate protocol invariants across a wide range of randomly
//! generated inputs, ensuring robust behavior under all conditions.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use strata_protocol::core::codec::PacketCodec;
use strata_protocol::core::packet::Packet;
use strata_protocol::utils::crypto::{decrypt_body, encrypt_body, HeaderCipher, KeyMaterial};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone)]
enum Field {
    I16(i16),
    U32(u32),
    I64(i64),
    F32(f32),
    Bool(bool),
    Str(String),
}

fn field() -> impl Strategy<Value = Field> {
    prop_oneof![
        any::<i16>().prop_map(Field::I16),
        any::<u32>().prop_map(Field::U32),
        any::<i64>().prop_map(Field::I64),
        (-1.0e6f32..1.0e6f32).prop_map(Field::F32),
        any::<bool>().prop_map(Field::Bool),
        ".{0,64}".prop_map(Field::Str),
    ]
}

fn codec(hour: u32) -> PacketCodec {
    PacketCodec::new().with_clock(move || Utc.with_ymd_and_hms(2025, 5, 5, hour, 0, 0).unwrap())
}

// Property: any sequence of fields survives finalize + reassembly unchanged
proptest! {
    #[test]
    fn prop_packet_wire_roundtrip(
        packet_type in 1u16..,
        fields in prop::collection::vec(field(), 0..24),
        hour in 0u32..24,
    ) {
        let mut packet = Packet::new(packet_type);
        for f in &fields {
            match f {
                Field::I16(v) => packet.write_i16(*v),
                Field::U32(v) => packet.write_u32(*v),
                Field::I64(v) => packet.write_i64(*v),
                Field::F32(v) => packet.write_f32(*v),
                Field::Bool(v) => packet.write_bool(*v),
                Field::Str(v) => packet.write_string(v),
            }
        }

        let mut wire = BytesMut::new();
        codec(hour).encode(packet.clone(), &mut wire).expect("encode");
        let mut decoded = codec(hour).decode(&mut wire).expect("decode").expect("complete");
        prop_assert_eq!(&decoded, &packet);

        for f in &fields {
            match f {
                Field::I16(v) => prop_assert_eq!(decoded.read_i16().unwrap(), *v),
                Field::U32(v) => prop_assert_eq!(decoded.read_u32().unwrap(), *v),
                Field::I64(v) => prop_assert_eq!(decoded.read_i64().unwrap(), *v),
                Field::F32(v) => prop_assert_eq!(decoded.read_f32().unwrap(), *v),
                Field::Bool(v) => prop_assert_eq!(decoded.read_bool().unwrap(), *v),
                Field::Str(v) => prop_assert_eq!(&decoded.read_string().unwrap(), v),
            }
        }
        prop_assert_eq!(decoded.remaining(), 0);
    }
}

// Property: body cipher decrypts what it encrypts, whole blocks only
proptest! {
    #[test]
    fn prop_body_cipher_roundtrip(data in prop::collection::vec(any::<u8>(), 0..5000)) {
        let keys = KeyMaterial::generate();
        let encrypted = encrypt_body(&data, &keys.key, &keys.iv);
        prop_assert_eq!(encrypted.len() % 16, 0);
        prop_assert!(encrypted.len() > data.len());
        let decrypted = decrypt_body(&encrypted, &keys.key, &keys.iv).expect("decrypt");
        prop_assert_eq!(decrypted, data);
    }
}

// Property: the header cipher is its own inverse for any key string
proptest! {
    #[test]
    fn prop_header_cipher_self_inverse(
        key in "[0-9]{10}",
        data in prop::collection::vec(any::<u8>(), 62),
    ) {
        let cipher = HeaderCipher::new(&key);
        let mut buf = data.clone();
        cipher.apply(&mut buf);
        cipher.apply(&mut buf);
        prop_assert_eq!(buf, data);
    }
}

// Property: arbitrary bytes never panic the decoder
proptest! {
    #[test]
    fn prop_decoder_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut codec = codec(0);
        let mut buf = BytesMut::from(&data[..]);
        for _ in 0..4 {
            match codec.decode(&mut buf) {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }
}

// Property: fixed-size strings are accepted exactly at their base64 length
proptest! {
    #[test]
    fn prop_fixed_string_matches_base64_length(value in ".{0,40}") {
        use base64::Engine as _;
        let expected = base64::engine::general_purpose::STANDARD.encode(value.as_bytes()).len();
        let mut packet = Packet::new(1);
        prop_assert!(packet.write_string_fixed(&value, expected + 4).is_err());
        packet.write_string_fixed(&value, expected).expect("exact size");
        prop_assert_eq!(packet.read_string().unwrap(), value);
    }
}
