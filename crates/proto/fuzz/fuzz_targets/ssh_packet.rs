//! Fuzz target for SSH packet parsing.
//!
//! Feeds arbitrary bytes to the reassembling codec, plaintext and keyed,
//! split at a data-dependent point. Looks for:
//! - Panics
//! - Unbounded buffering
//! - Packets accepted without a valid tag
//!
//! Run with:
//! ```bash
//! cd crates/proto
//! cargo +nightly fuzz run ssh_packet -- -max_total_time=300
//! ```

#![no_main]
use ember_proto::ssh::crypto::PacketKey;
use ember_proto::ssh::packet::{BinaryPacket, PacketCodec, Parsed, Protection};
use libfuzzer_sys::fuzz_target;

fn drain(codec: &mut PacketCodec, key: Option<&PacketKey>) {
    let mut seq = 0u32;
    loop {
        match codec.parse(key.map(|key| Protection { key, seq })) {
            Ok(Parsed::Complete(_)) => seq = seq.wrapping_add(1),
            Ok(Parsed::Partial { .. }) | Err(_) => break,
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |&b| b as usize).min(data.len());

    let mut plain = PacketCodec::default();
    plain.append(&data[..split]);
    drain(&mut plain, None);
    plain.append(&data[split..]);
    drain(&mut plain, None);

    let key = PacketKey::from_key_material(&[0x11u8; 64]).expect("64 bytes of key material");
    let mut sealed = PacketCodec::default();
    sealed.append(data);
    drain(&mut sealed, Some(&key));

    // A packet that parses must survive re-serialisation
    if let Ok(packet) = BinaryPacket::from_bytes(data, 0) {
        let reparsed = BinaryPacket::from_bytes(&packet.to_bytes(), 0)
            .expect("Round-trip parsing should never fail");
        assert_eq!(packet.payload(), reparsed.payload());
    }
});
