#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use strata_protocol::core::codec::PacketCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes in uneven chunks; the decoder must never panic
    let mut codec = PacketCodec::new().with_max_body_size(64 * 1024);
    let mut buf = BytesMut::new();
    let chunk = (data.first().copied().unwrap_or(1) as usize % 13) + 1;

    for piece in data.chunks(chunk) {
        buf.extend_from_slice(piece);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
    let _ = codec.decode_eof(&mut buf);
});
