//! `chacha20-poly1305@openssh.com` packet protection.
//!
//! Each direction holds two ChaCha20 keys:
//!
//! - the **header** key encrypts the 4-byte `packet_length` field
//! - the **main** key encrypts `padding_length || payload || padding` starting
//!   at block counter 1, and its block 0 keystream yields the one-time
//!   Poly1305 key
//!
//! The sequence number is the nonce: 8 zero bytes followed by the big-endian
//! 32-bit `seq` (the 12-byte IETF form of OpenSSH's 64-bit nonce). The tag
//! covers the whole ciphertext, encrypted length included.
//!
//! # Security
//!
//! - Tags are compared in constant time
//! - [`PacketKey::open`] verifies before it decrypts anything but the length
//! - Key bytes are zeroized on drop and never printed
//!
//! # Example
//!
//! ```rust
//! use ember_proto::ssh::crypto::PacketKey;
//!
//! let key = PacketKey::new([1u8; 32], [2u8; 32]);
//! let mut packet = vec![0, 0, 0, 8, 4, 21, 0xaa, 0xbb, 0xcc, 0xdd, 0, 0];
//! let original = packet.clone();
//!
//! let tag = key.seal(3, &mut packet).unwrap();
//! assert_eq!(key.decrypt_length(3, [packet[0], packet[1], packet[2], packet[3]]), 8);
//!
//! key.open(3, &mut packet, &tag).unwrap();
//! assert_eq!(packet, original);
//! ```

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use ember_platform::{EmberError, EmberResult};
use poly1305::universal_hash::KeyInit;
use poly1305::Poly1305;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Cipher name as negotiated in KEXINIT.
pub const CIPHER_NAME: &str = "chacha20-poly1305@openssh.com";

/// Size of each ChaCha20 key.
pub const KEY_LEN: usize = 32;

/// Poly1305 tag size.
pub const TAG_LEN: usize = 16;

/// IETF ChaCha20 nonce size.
pub const NONCE_LEN: usize = 12;

/// Block alignment for padding once this cipher is active.
pub const BLOCK_SIZE: usize = 8;

/// Length of the encrypted `packet_length` prefix.
pub const LENGTH_FIELD_LEN: usize = 4;

/// Keystream offset of block 1, where payload encryption starts.
const PAYLOAD_KEYSTREAM_OFFSET: u64 = 64;

/// Builds the per-packet nonce from the sequence number.
pub fn nonce(seq: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[8..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// XORs the ChaCha20 keystream into `data`, starting at `block`.
pub(crate) fn apply_keystream(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    block: u32,
    data: &mut [u8],
) {
    let mut cipher = ChaCha20::new(
        chacha20::Key::from_slice(key),
        chacha20::Nonce::from_slice(nonce),
    );
    cipher.seek(u64::from(block) * PAYLOAD_KEYSTREAM_OFFSET);
    cipher.apply_keystream(data);
}

/// One-shot Poly1305 over `data`.
pub(crate) fn poly1305_tag(one_time_key: &[u8; KEY_LEN], data: &[u8]) -> [u8; TAG_LEN] {
    let mac = Poly1305::new(poly1305::Key::from_slice(one_time_key));
    let tag = mac.compute_unpadded(data);
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(tag.as_slice());
    out
}

/// Key pair protecting one direction of the connection.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PacketKey {
    main: [u8; KEY_LEN],
    header: [u8; KEY_LEN],
}

impl std::fmt::Debug for PacketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketKey")
            .field("cipher", &CIPHER_NAME)
            .field("main", &"<redacted>")
            .field("header", &"<redacted>")
            .finish()
    }
}

impl PacketKey {
    /// Creates a direction key from its main (payload) and header (length) halves.
    pub fn new(main: [u8; KEY_LEN], header: [u8; KEY_LEN]) -> Self {
        Self { main, header }
    }

    /// Creates a key from 64 bytes laid out as OpenSSH does: main key first,
    /// header key second.
    pub fn from_key_material(material: &[u8]) -> EmberResult<Self> {
        if material.len() != 2 * KEY_LEN {
            return Err(EmberError::Security(format!(
                "{} needs {} bytes of key material, got {}",
                CIPHER_NAME,
                2 * KEY_LEN,
                material.len()
            )));
        }
        let mut main = [0u8; KEY_LEN];
        let mut header = [0u8; KEY_LEN];
        main.copy_from_slice(&material[..KEY_LEN]);
        header.copy_from_slice(&material[KEY_LEN..]);
        Ok(Self { main, header })
    }

    fn one_time_key(&self, nonce: &[u8; NONCE_LEN]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        apply_keystream(&self.main, nonce, 0, &mut key[..]);
        key
    }

    /// Decrypts the 4-byte length prefix of packet `seq`.
    ///
    /// The result is unauthenticated until [`PacketKey::open`] succeeds; it
    /// only tells the reader how many more bytes to wait for.
    pub fn decrypt_length(&self, seq: u32, mut encrypted: [u8; LENGTH_FIELD_LEN]) -> u32 {
        apply_keystream(&self.header, &nonce(seq), 0, &mut encrypted);
        u32::from_be_bytes(encrypted)
    }

    /// Encrypts `packet` (length field included) in place and returns the tag.
    pub fn seal(&self, seq: u32, packet: &mut [u8]) -> EmberResult<[u8; TAG_LEN]> {
        if packet.len() < LENGTH_FIELD_LEN {
            return Err(EmberError::Framing(format!(
                "Cannot seal {} bytes: shorter than the length field",
                packet.len()
            )));
        }
        let nonce = nonce(seq);
        let (length, body) = packet.split_at_mut(LENGTH_FIELD_LEN);
        apply_keystream(&self.header, &nonce, 0, length);
        apply_keystream(&self.main, &nonce, 1, body);

        Ok(poly1305_tag(&self.one_time_key(&nonce), packet))
    }

    /// Verifies `tag` over the ciphertext `packet`, then decrypts it in place.
    ///
    /// # Errors
    ///
    /// [`EmberError::Authentication`] on a tag mismatch. The buffer is left
    /// as received in that case.
    pub fn open(&self, seq: u32, packet: &mut [u8], tag: &[u8]) -> EmberResult<()> {
        if packet.len() < LENGTH_FIELD_LEN || tag.len() != TAG_LEN {
            return Err(EmberError::Authentication(format!(
                "Malformed sealed packet for seq {}",
                seq
            )));
        }
        let nonce = nonce(seq);
        let expected = poly1305_tag(&self.one_time_key(&nonce), packet);
        if !bool::from(expected[..].ct_eq(tag)) {
            return Err(EmberError::Authentication(format!(
                "Poly1305 tag mismatch on packet {}",
                seq
            )));
        }

        let (length, body) = packet.split_at_mut(LENGTH_FIELD_LEN);
        apply_keystream(&self.header, &nonce, 0, length);
        apply_keystream(&self.main, &nonce, 1, body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn sequential_key() -> PacketKey {
        let material: Vec<u8> = (0u8..64).collect();
        PacketKey::from_key_material(&material).unwrap()
    }

    #[test]
    fn test_nonce_layout() {
        assert_eq!(nonce(0), [0u8; 12]);
        assert_eq!(nonce(7), hex!("000000000000000000000007"));
        assert_eq!(nonce(0xdead_beef), hex!("0000000000000000deadbeef"));
    }

    #[test]
    fn test_rfc8439_aead_vector() {
        // RFC 8439 Section 2.8.2, rebuilt from the keystream and MAC helpers
        let key = hex!("808182838485868788898a8b8c8d8e8f909192939495969798999a9b9c9d9e9f");
        let nonce = hex!("070000004041424344454647");
        let aad = hex!("50515253c0c1c2c3c4c5c6c7");
        let mut text = b"Ladies and Gentlemen of the class of '99: If I could offer you only one tip for the future, sunscreen would be it.".to_vec();

        let mut otk = [0u8; 32];
        apply_keystream(&key, &nonce, 0, &mut otk);
        apply_keystream(&key, &nonce, 1, &mut text);

        assert_eq!(
            text,
            hex!(
                "d31a8d34648e60db7b86afbc53ef7ec2a4aded51296e08fea9e2b5a736ee62d6"
                "3dbea45e8ca9671282fafb69da92728b1a71de0a9e060b2905d6a5b67ecd3b36"
                "92ddbd7f2d778b8c9803aee328091b58fab324e4fad675945585808b4831d7bc"
                "3ff4def08e4b7a9de576d26586cec64b6116"
            )
        );

        let mut mac_data = Vec::new();
        mac_data.extend_from_slice(&aad);
        mac_data.resize(16, 0);
        mac_data.extend_from_slice(&text);
        mac_data.resize(mac_data.len() + (16 - text.len() % 16) % 16, 0);
        mac_data.extend_from_slice(&(aad.len() as u64).to_le_bytes());
        mac_data.extend_from_slice(&(text.len() as u64).to_le_bytes());

        assert_eq!(
            poly1305_tag(&otk, &mac_data),
            hex!("1ae10b594f09e26a7e902ecbd0600691")
        );
    }

    #[test]
    fn test_openssh_packet_vector() {
        let key = sequential_key();
        let mut packet =
            hex!("0000001806050000000c7373682d7573657261757468a5a5a5a5a5a5").to_vec();

        let tag = key.seal(7, &mut packet).unwrap();
        assert_eq!(
            packet,
            hex!("a39afcb22e4315434e8f592d0440ce83b2fdb25940da9593db469826")
        );
        assert_eq!(tag, hex!("6a41e4a7ffc3112a72d36f8dafaf1239"));
        assert_eq!(key.decrypt_length(7, [0xa3, 0x9a, 0xfc, 0xb2]), 24);
    }

    #[test]
    fn test_matches_ring_openssh_construction() {
        use ring::aead::chacha20_poly1305_openssh::{OpeningKey, SealingKey};

        let material: [u8; 64] = core::array::from_fn(|i| (i as u8).wrapping_mul(37));
        let ours = PacketKey::from_key_material(&material).unwrap();
        let sealing = SealingKey::new(&material);
        let opening = OpeningKey::new(&material);

        for seq in [0u32, 1, 3, 0xffff_ffff] {
            let plain: Vec<u8> = [&[0u8, 0, 0, 12, 6][..], &[0x42; 12]].concat();

            let mut mine = plain.clone();
            let my_tag = ours.seal(seq, &mut mine).unwrap();

            let mut theirs = plain.clone();
            let mut their_tag = [0u8; 16];
            sealing.seal_in_place(seq, &mut theirs, &mut their_tag);

            assert_eq!(mine, theirs);
            assert_eq!(my_tag, their_tag);

            let len = opening.decrypt_packet_length(seq, [mine[0], mine[1], mine[2], mine[3]]);
            assert_eq!(u32::from_be_bytes(len), 12);
            let opened = opening.open_in_place(seq, &mut theirs, &their_tag).unwrap();
            assert_eq!(opened, &plain[4..]);
        }
    }

    #[test]
    fn test_seal_open_round_trip() {
        let key = PacketKey::new([9u8; 32], [3u8; 32]);
        let plain: Vec<u8> = (0..64u8).collect();
        let mut buf = plain.clone();
        let tag = key.seal(42, &mut buf).unwrap();
        assert_ne!(buf, plain);
        key.open(42, &mut buf, &tag).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_wrong_sequence_fails_closed() {
        let key = sequential_key();
        let mut buf = vec![0u8, 0, 0, 8, 4, 1, 2, 3, 4, 5, 6, 7];
        let tag = key.seal(1, &mut buf).unwrap();
        let sealed = buf.clone();

        let err = key.open(2, &mut buf, &tag).unwrap_err();
        assert!(matches!(err, EmberError::Authentication(_)));
        // Nothing was decrypted
        assert_eq!(buf, sealed);
    }

    #[test]
    fn test_directions_are_independent() {
        let c2s = PacketKey::new([1u8; 32], [2u8; 32]);
        let s2c = PacketKey::new([3u8; 32], [4u8; 32]);
        let mut buf = vec![0u8, 0, 0, 8, 4, 9, 9, 9, 9, 9, 9, 9];
        let tag = c2s.seal(0, &mut buf).unwrap();
        assert!(s2c.open(0, &mut buf, &tag).is_err());
        assert!(c2s.open(0, &mut buf, &tag).is_ok());
    }

    #[test]
    fn test_bad_inputs() {
        let key = sequential_key();
        assert!(matches!(
            key.seal(0, &mut [0u8; 3]),
            Err(EmberError::Framing(_))
        ));
        assert!(key.open(0, &mut [0u8; 8], &[0u8; 15]).is_err());
        assert!(PacketKey::from_key_material(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", PacketKey::new([0x41; 32], [0x42; 32]));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("65"));
    }
}
