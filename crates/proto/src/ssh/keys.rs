//! Session key schedule and sequence counters.
//!
//! Each direction of `chacha20-poly1305@openssh.com` needs 64 bytes: a main
//! key and a header key. They come from two distinct derivations:
//!
//! ```text
//! main   = SHA256(mpint(K) || H || letter || session_id)   (tag seeded)
//! header = SHA256(mpint(K) || H || main)                   (key seeded)
//! ```
//!
//! with letter `C` for client to server and `D` for server to client. The
//! key seeded step is the RFC 4253 Section 7.2 extension rule applied once,
//! which is exactly how 64 bytes of encryption key are produced for this
//! cipher.
//!
//! # Example
//!
//! ```rust
//! use ember_proto::ssh::keys::SessionKeys;
//!
//! let keys = SessionKeys::derive(&[0x11; 32], &[0x22; 32], &[0x22; 32]);
//! let again = SessionKeys::derive(&[0x11; 32], &[0x22; 32], &[0x22; 32]);
//! assert_eq!(keys, again);
//! ```

use super::crypto::{PacketKey, KEY_LEN};
use super::wire::mpint;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Key letter for client to server encryption (RFC 4253 Section 7.2).
pub const CLIENT_TO_SERVER_KEY: u8 = b'C';

/// Key letter for server to client encryption.
pub const SERVER_TO_CLIENT_KEY: u8 = b'D';

/// `HASH(mpint(K) || H || letter || session_id)`.
pub fn derive_tag_seeded(
    shared_secret: &[u8],
    exchange_hash: &[u8],
    letter: u8,
    session_id: &[u8],
) -> [u8; KEY_LEN] {
    let k = Zeroizing::new(mpint(shared_secret));
    let mut hasher = Sha256::new();
    hasher.update(k.as_slice());
    hasher.update(exchange_hash);
    hasher.update([letter]);
    hasher.update(session_id);
    hasher.finalize().into()
}

/// `HASH(mpint(K) || H || previous)`.
pub fn derive_key_seeded(
    shared_secret: &[u8],
    exchange_hash: &[u8],
    previous: &[u8; KEY_LEN],
) -> [u8; KEY_LEN] {
    let k = Zeroizing::new(mpint(shared_secret));
    let mut hasher = Sha256::new();
    hasher.update(k.as_slice());
    hasher.update(exchange_hash);
    hasher.update(previous);
    hasher.finalize().into()
}

/// The four directional keys of one key exchange.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    c2s_main: [u8; KEY_LEN],
    c2s_header: [u8; KEY_LEN],
    s2c_main: [u8; KEY_LEN],
    s2c_header: [u8; KEY_LEN],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// Derives all four keys from `K`, `H` and the session identifier.
    pub fn derive(shared_secret: &[u8], exchange_hash: &[u8], session_id: &[u8]) -> Self {
        let c2s_main =
            derive_tag_seeded(shared_secret, exchange_hash, CLIENT_TO_SERVER_KEY, session_id);
        let c2s_header = derive_key_seeded(shared_secret, exchange_hash, &c2s_main);
        let s2c_main =
            derive_tag_seeded(shared_secret, exchange_hash, SERVER_TO_CLIENT_KEY, session_id);
        let s2c_header = derive_key_seeded(shared_secret, exchange_hash, &s2c_main);

        Self {
            c2s_main,
            c2s_header,
            s2c_main,
            s2c_header,
        }
    }

    /// Key protecting packets sent by the client.
    pub fn client_to_server(&self) -> PacketKey {
        PacketKey::new(self.c2s_main, self.c2s_header)
    }

    /// Key protecting packets sent by the server.
    pub fn server_to_client(&self) -> PacketKey {
        PacketKey::new(self.s2c_main, self.s2c_header)
    }
}

/// Per-direction packet sequence numbers.
///
/// Both start at zero when the connection opens and count every packet,
/// plaintext ones included. They wrap at 2^32.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounters {
    rx: u32,
    tx: u32,
}

impl SequenceCounters {
    /// Counters at the start of a connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the next packet to be received.
    pub fn rx(&self) -> u32 {
        self.rx
    }

    /// Sequence number of the next packet to be sent.
    pub fn tx(&self) -> u32 {
        self.tx
    }

    /// Marks one received packet as complete and returns its number.
    pub fn advance_rx(&mut self) -> u32 {
        let seq = self.rx;
        self.rx = self.rx.wrapping_add(1);
        seq
    }

    /// Marks one sent packet and returns its number.
    pub fn advance_tx(&mut self) -> u32 {
        let seq = self.tx;
        self.tx = self.tx.wrapping_add(1);
        seq
    }

    /// Restarts receive numbering (strict key exchange).
    pub fn reset_rx(&mut self) {
        self.rx = 0;
    }

    /// Restarts send numbering (strict key exchange).
    pub fn reset_tx(&mut self) {
        self.tx = 0;
    }
}
