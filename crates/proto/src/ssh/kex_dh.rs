//! Curve25519 agreement and the exchange hash (RFC 8731, RFC 5656).
//!
//! # Exchange Hash
//!
//! ```text
//! H = SHA256(string V_C || string V_S || string I_C || string I_S ||
//!            string K_S || string Q_C || string Q_S || mpint K)
//! ```
//!
//! `V_*` are identification lines without CR LF, `I_*` the raw KEXINIT
//! payloads, `K_S` the host key blob and `Q_*` the ephemeral public keys.

use super::wire::{put_mpint, put_string};
use ember_platform::{EmberError, EmberResult};
use ring::agreement::{agree_ephemeral, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::rand::SystemRandom;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Curve25519 ephemeral key pair for one key exchange.
pub struct Curve25519Exchange {
    private_key: EphemeralPrivateKey,
    public_key: [u8; 32],
}

impl std::fmt::Debug for Curve25519Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Curve25519Exchange")
            .field("public_key", &hex::encode(self.public_key))
            .finish_non_exhaustive()
    }
}

impl Curve25519Exchange {
    /// Generates a fresh ephemeral key pair.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ember_proto::ssh::kex_dh::Curve25519Exchange;
    ///
    /// let client = Curve25519Exchange::new().unwrap();
    /// let server = Curve25519Exchange::new().unwrap();
    /// let client_public = *client.public_key();
    /// let server_public = *server.public_key();
    ///
    /// let k1 = client.compute_shared_secret(&server_public).unwrap();
    /// let k2 = server.compute_shared_secret(&client_public).unwrap();
    /// assert_eq!(*k1, *k2);
    /// ```
    pub fn new() -> EmberResult<Self> {
        let rng = SystemRandom::new();
        let private_key = EphemeralPrivateKey::generate(&X25519, &rng)
            .map_err(|_| EmberError::Security("Failed to generate Curve25519 key".to_string()))?;

        let public_key = private_key.compute_public_key().map_err(|_| {
            EmberError::Security("Failed to compute Curve25519 public key".to_string())
        })?;

        let mut public_key_bytes = [0u8; 32];
        public_key_bytes.copy_from_slice(public_key.as_ref());

        Ok(Self {
            private_key,
            public_key: public_key_bytes,
        })
    }

    /// Our ephemeral public key (`Q_S` on the server).
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Consumes the private key and returns the shared secret `K`.
    ///
    /// # Errors
    ///
    /// [`EmberError::Security`] if agreement fails or yields the all-zero
    /// value (RFC 8731 Section 3).
    pub fn compute_shared_secret(self, peer_public: &[u8; 32]) -> EmberResult<Zeroizing<Vec<u8>>> {
        let peer_public_key = UnparsedPublicKey::new(&X25519, peer_public);

        let secret = agree_ephemeral(self.private_key, &peer_public_key, |key_material| {
            Zeroizing::new(key_material.to_vec())
        })
        .map_err(|_| EmberError::Security("Curve25519 key agreement failed".to_string()))?;

        if secret.iter().all(|&b| b == 0) {
            return Err(EmberError::Security(
                "Curve25519 shared secret is zero".to_string(),
            ));
        }
        Ok(secret)
    }
}

/// Inputs of the exchange hash, in hashing order.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeHashInput<'a> {
    /// Client identification line `V_C`
    pub client_version: &'a str,
    /// Server identification line `V_S`
    pub server_version: &'a str,
    /// Client KEXINIT payload `I_C`
    pub client_kexinit: &'a [u8],
    /// Server KEXINIT payload `I_S`
    pub server_kexinit: &'a [u8],
    /// Host key blob `K_S`
    pub host_key_blob: &'a [u8],
    /// Client ephemeral key `Q_C`
    pub client_public: &'a [u8],
    /// Server ephemeral key `Q_S`
    pub server_public: &'a [u8],
    /// Shared secret `K` as unsigned big-endian bytes
    pub shared_secret: &'a [u8],
}

impl ExchangeHashInput<'_> {
    /// Encodes the fields exactly as they are hashed.
    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut buf = Zeroizing::new(Vec::with_capacity(
            1024 + self.client_kexinit.len() + self.server_kexinit.len(),
        ));
        put_string(&mut buf, self.client_version.as_bytes());
        put_string(&mut buf, self.server_version.as_bytes());
        put_string(&mut buf, self.client_kexinit);
        put_string(&mut buf, self.server_kexinit);
        put_string(&mut buf, self.host_key_blob);
        put_string(&mut buf, self.client_public);
        put_string(&mut buf, self.server_public);
        put_mpint(&mut buf, self.shared_secret);
        buf
    }

    /// Computes `H`.
    pub fn compute(&self) -> [u8; 32] {
        Sha256::digest(self.encode().as_slice()).into()
    }
}
