//! Key exchange messages (RFC 4253 Section 7, RFC 5656 Section 4).
//!
//! The server supports exactly one suite:
//!
//! | Slot        | Algorithm                         |
//! |-------------|-----------------------------------|
//! | kex         | `curve25519-sha256` (+ libssh alias) |
//! | host key    | `ssh-ed25519`                     |
//! | cipher      | `chacha20-poly1305@openssh.com`   |
//! | mac         | implied by the AEAD cipher        |
//! | compression | `none`                            |
//!
//! [`Negotiated::check`] verifies a client KEXINIT offers that suite and
//! picks up the strict key exchange marker.
//!
//! # Example
//!
//! ```rust
//! use ember_proto::ssh::kex::{KexInit, Negotiated};
//!
//! let server = KexInit::for_server();
//! let client = KexInit::for_client();
//! let parsed = KexInit::from_bytes(&client.to_bytes()).unwrap();
//!
//! let negotiated = Negotiated::check(&parsed).unwrap();
//! assert!(negotiated.strict_kex);
//! assert!(server.kex_algorithms().iter().any(|a| a == "kex-strict-s-v00@openssh.com"));
//! ```

use super::crypto::CIPHER_NAME;
use super::hostkey::HOST_KEY_ALGORITHM;
use super::message::MessageType;
use super::wire::{put_name_list, put_string, WireReader};
use bytes::BufMut;
use ember_platform::{EmberError, EmberResult};
use rand::RngCore;

/// Key exchange method (RFC 8731).
pub const KEX_ALGORITHM: &str = "curve25519-sha256";

/// Pre-standard name of the same method.
pub const KEX_ALGORITHM_LIBSSH: &str = "curve25519-sha256@libssh.org";

/// Marker a server lists to offer strict key exchange.
pub const STRICT_KEX_SERVER: &str = "kex-strict-s-v00@openssh.com";

/// Marker a client lists to request strict key exchange.
pub const STRICT_KEX_CLIENT: &str = "kex-strict-c-v00@openssh.com";

/// MAC listed for completeness; unused with an AEAD cipher.
pub const MAC_ALGORITHM: &str = "hmac-sha2-256";

/// Compression method.
pub const COMPRESSION_NONE: &str = "none";

const SERVER_KEX: [&str; 3] = [KEX_ALGORITHM, KEX_ALGORITHM_LIBSSH, STRICT_KEX_SERVER];
const CLIENT_KEX: [&str; 3] = [KEX_ALGORITHM, KEX_ALGORITHM_LIBSSH, STRICT_KEX_CLIENT];

/// SSH_MSG_KEXINIT message (RFC 4253 Section 7.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    cookie: [u8; 16],
    kex_algorithms: Vec<String>,
    server_host_key_algorithms: Vec<String>,
    encryption_algorithms_client_to_server: Vec<String>,
    encryption_algorithms_server_to_client: Vec<String>,
    mac_algorithms_client_to_server: Vec<String>,
    mac_algorithms_server_to_client: Vec<String>,
    compression_algorithms_client_to_server: Vec<String>,
    compression_algorithms_server_to_client: Vec<String>,
    languages_client_to_server: Vec<String>,
    languages_server_to_client: Vec<String>,
    first_kex_packet_follows: bool,
}

impl KexInit {
    fn with_kex(kex: &[&str]) -> Self {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        let list = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            cookie,
            kex_algorithms: list(kex),
            server_host_key_algorithms: list(&[HOST_KEY_ALGORITHM]),
            encryption_algorithms_client_to_server: list(&[CIPHER_NAME]),
            encryption_algorithms_server_to_client: list(&[CIPHER_NAME]),
            mac_algorithms_client_to_server: list(&[MAC_ALGORITHM]),
            mac_algorithms_server_to_client: list(&[MAC_ALGORITHM]),
            compression_algorithms_client_to_server: list(&[COMPRESSION_NONE]),
            compression_algorithms_server_to_client: list(&[COMPRESSION_NONE]),
            languages_client_to_server: Vec::new(),
            languages_server_to_client: Vec::new(),
            first_kex_packet_follows: false,
        }
    }

    /// The fixed server announcement with a fresh random cookie.
    pub fn for_server() -> Self {
        Self::with_kex(&SERVER_KEX)
    }

    /// The matching client announcement, requesting strict key exchange.
    pub fn for_client() -> Self {
        Self::with_kex(&CLIENT_KEX)
    }

    /// Returns the cookie.
    pub fn cookie(&self) -> &[u8; 16] {
        &self.cookie
    }

    /// Key exchange algorithms, preferred first.
    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    /// Host key algorithms.
    pub fn server_host_key_algorithms(&self) -> &[String] {
        &self.server_host_key_algorithms
    }

    /// Ciphers client to server.
    pub fn encryption_algorithms_client_to_server(&self) -> &[String] {
        &self.encryption_algorithms_client_to_server
    }

    /// Ciphers server to client.
    pub fn encryption_algorithms_server_to_client(&self) -> &[String] {
        &self.encryption_algorithms_server_to_client
    }

    /// Compression client to server.
    pub fn compression_algorithms_client_to_server(&self) -> &[String] {
        &self.compression_algorithms_client_to_server
    }

    /// Compression server to client.
    pub fn compression_algorithms_server_to_client(&self) -> &[String] {
        &self.compression_algorithms_server_to_client
    }

    /// Whether a guessed kex packet follows this message.
    pub fn first_kex_packet_follows(&self) -> bool {
        self.first_kex_packet_follows
    }

    /// Serializes the payload, message type byte included.
    ///
    /// ```text
    /// byte         SSH_MSG_KEXINIT
    /// byte[16]     cookie
    /// name-list    x 10
    /// boolean      first_kex_packet_follows
    /// uint32       0 (reserved)
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.put_u8(MessageType::KexInit as u8);
        buf.put_slice(&self.cookie);

        for list in [
            &self.kex_algorithms,
            &self.server_host_key_algorithms,
            &self.encryption_algorithms_client_to_server,
            &self.encryption_algorithms_server_to_client,
            &self.mac_algorithms_client_to_server,
            &self.mac_algorithms_server_to_client,
            &self.compression_algorithms_client_to_server,
            &self.compression_algorithms_server_to_client,
            &self.languages_client_to_server,
            &self.languages_server_to_client,
        ] {
            let names: Vec<&str> = list.iter().map(String::as_str).collect();
            put_name_list(&mut buf, &names);
        }

        buf.put_u8(u8::from(self.first_kex_packet_follows));
        buf.put_u32(0);
        buf
    }

    /// Parses a KEXINIT payload.
    pub fn from_bytes(data: &[u8]) -> EmberResult<Self> {
        let mut reader = WireReader::new(data);
        reader.expect_message(MessageType::KexInit)?;

        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(reader.read_bytes(16)?);

        let kexinit = Self {
            cookie,
            kex_algorithms: reader.read_name_list()?,
            server_host_key_algorithms: reader.read_name_list()?,
            encryption_algorithms_client_to_server: reader.read_name_list()?,
            encryption_algorithms_server_to_client: reader.read_name_list()?,
            mac_algorithms_client_to_server: reader.read_name_list()?,
            mac_algorithms_server_to_client: reader.read_name_list()?,
            compression_algorithms_client_to_server: reader.read_name_list()?,
            compression_algorithms_server_to_client: reader.read_name_list()?,
            languages_client_to_server: reader.read_name_list()?,
            languages_server_to_client: reader.read_name_list()?,
            first_kex_packet_follows: reader.read_bool()?,
        };
        // Reserved field
        reader.read_u32()?;
        Ok(kexinit)
    }
}

/// Outcome of checking a client KEXINIT against the fixed suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Key exchange name the client picked first
    pub kex: String,
    /// The client requested strict key exchange
    pub strict_kex: bool,
    /// The client sent a wrong guess that must be skipped
    pub discard_guess: bool,
}

impl Negotiated {
    /// Checks that `client` offers the suite this server implements.
    ///
    /// # Errors
    ///
    /// [`EmberError::KeyExchange`] naming the first slot without a match.
    pub fn check(client: &KexInit) -> EmberResult<Self> {
        let kex = client
            .kex_algorithms
            .iter()
            .find(|name| *name == KEX_ALGORITHM || *name == KEX_ALGORITHM_LIBSSH)
            .cloned()
            .ok_or_else(|| no_match("key exchange", &client.kex_algorithms))?;

        require(
            "host key",
            &client.server_host_key_algorithms,
            HOST_KEY_ALGORITHM,
        )?;
        require(
            "cipher client to server",
            &client.encryption_algorithms_client_to_server,
            CIPHER_NAME,
        )?;
        require(
            "cipher server to client",
            &client.encryption_algorithms_server_to_client,
            CIPHER_NAME,
        )?;
        require(
            "compression client to server",
            &client.compression_algorithms_client_to_server,
            COMPRESSION_NONE,
        )?;
        require(
            "compression server to client",
            &client.compression_algorithms_server_to_client,
            COMPRESSION_NONE,
        )?;

        // RFC 4253 Section 7: a guess is right only when the client's first
        // kex and host key choices are the negotiated ones.
        let guess_right = client.kex_algorithms.first() == Some(&kex)
            && client
                .server_host_key_algorithms
                .first()
                .map_or(false, |name| name == HOST_KEY_ALGORITHM);

        Ok(Self {
            strict_kex: client.kex_algorithms.iter().any(|a| a == STRICT_KEX_CLIENT),
            discard_guess: client.first_kex_packet_follows && !guess_right,
            kex,
        })
    }
}

fn require(slot: &str, offered: &[String], wanted: &str) -> EmberResult<()> {
    if offered.iter().any(|name| name == wanted) {
        Ok(())
    } else {
        Err(no_match(slot, offered))
    }
}

fn no_match(slot: &str, offered: &[String]) -> EmberError {
    EmberError::KeyExchange(format!(
        "No common {} algorithm: client offered {:?}",
        slot, offered
    ))
}

/// SSH_MSG_NEWKEYS message (RFC 4253 Section 7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NewKeys;

impl NewKeys {
    /// Serializes the one-byte payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![MessageType::NewKeys as u8]
    }

    /// Parses a NEWKEYS payload; trailing bytes are an error.
    pub fn from_bytes(data: &[u8]) -> EmberResult<Self> {
        if data != [MessageType::NewKeys as u8] {
            return Err(EmberError::Protocol(format!(
                "Invalid SSH_MSG_NEWKEYS payload of {} bytes",
                data.len()
            )));
        }
        Ok(NewKeys)
    }
}

/// SSH_MSG_KEX_ECDH_INIT (RFC 5656 Section 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexEcdhInit {
    /// Client ephemeral public key `Q_C`
    pub client_public: [u8; 32],
}

impl KexEcdhInit {
    /// Serializes the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(37);
        buf.put_u8(MessageType::KexdhInit as u8);
        put_string(&mut buf, &self.client_public);
        buf
    }

    /// Parses the payload; `Q_C` must be exactly 32 bytes (RFC 8731).
    pub fn from_bytes(data: &[u8]) -> EmberResult<Self> {
        let mut reader = WireReader::new(data);
        reader.expect_message(MessageType::KexdhInit)?;
        let public = reader.read_string()?;
        let client_public: [u8; 32] = public.try_into().map_err(|_| {
            EmberError::Protocol(format!(
                "Curve25519 public key must be 32 bytes, got {}",
                public.len()
            ))
        })?;
        Ok(Self { client_public })
    }
}

/// SSH_MSG_KEX_ECDH_REPLY (RFC 5656 Section 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexEcdhReply {
    /// Host public key blob `K_S`
    pub host_key_blob: Vec<u8>,
    /// Server ephemeral public key `Q_S`
    pub server_public: [u8; 32],
    /// Signature blob over the exchange hash
    pub signature_blob: Vec<u8>,
}

impl KexEcdhReply {
    /// Serializes the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            13 + self.host_key_blob.len() + 32 + self.signature_blob.len(),
        );
        buf.put_u8(MessageType::KexdhReply as u8);
        put_string(&mut buf, &self.host_key_blob);
        put_string(&mut buf, &self.server_public);
        put_string(&mut buf, &self.signature_blob);
        buf
    }

    /// Parses the payload.
    pub fn from_bytes(data: &[u8]) -> EmberResult<Self> {
        let mut reader = WireReader::new(data);
        reader.expect_message(MessageType::KexdhReply)?;
        let host_key_blob = reader.read_string()?.to_vec();
        let public = reader.read_string()?;
        let server_public: [u8; 32] = public.try_into().map_err(|_| {
            EmberError::Protocol(format!(
                "Curve25519 public key must be 32 bytes, got {}",
                public.len()
            ))
        })?;
        let signature_blob = reader.read_string()?.to_vec();
        Ok(Self {
            host_key_blob,
            server_public,
            signature_blob,
        })
    }
}
