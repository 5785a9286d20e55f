#![no_main]

use libfuzzer_sys::fuzz_target;
use strata_protocol::core::header::HEADER_LEN;
use strata_protocol::core::packet::Packet;

fuzz_target!(|data: &[u8]| {
    // Typed reads over an arbitrary body must fail cleanly, never panic
    let header = [0u8; HEADER_LEN];
    let mut packet = Packet::from_parts(&header, data);

    for (i, op) in data.iter().take(64).enumerate() {
        let _ = match op % 8 {
            0 => packet.read_string().map(|_| ()),
            1 => packet.read_u32().map(|_| ()),
            2 => packet.read_i64().map(|_| ()),
            3 => packet.read_f32().map(|_| ()),
            4 => packet.read_bool().map(|_| ()),
            5 => packet.read_string_at(i).map(|_| ()),
            6 => packet.read_bytes(*op as usize).map(|_| ()),
            _ => packet.read_u16_at(*op as usize).map(|_| ()),
        };
    }
});
