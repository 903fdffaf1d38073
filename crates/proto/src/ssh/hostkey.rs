//! Host identity (`ssh-ed25519`, RFC 8709).
//!
//! The server proves its identity by signing the exchange hash. Blobs follow
//! the SSH wire format:
//!
//! ```text
//! public key:  string "ssh-ed25519" || string pk[32]
//! signature:   string "ssh-ed25519" || string sig[64]
//! ```

use super::wire::{put_string, WireReader};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use ember_platform::{EmberError, EmberResult};
use sha2::{Digest, Sha256};
use std::path::Path;
use zeroize::Zeroizing;

/// Host key algorithm name.
pub const HOST_KEY_ALGORITHM: &str = "ssh-ed25519";

/// A key able to sign the exchange hash.
pub trait HostKey: Send + Sync {
    /// Algorithm name as announced in KEXINIT.
    fn algorithm_name(&self) -> &'static str;

    /// Public key blob (`K_S` in the exchange hash).
    fn public_key_blob(&self) -> Vec<u8>;

    /// Signs `data`, returning a signature blob.
    fn sign(&self, data: &[u8]) -> EmberResult<Vec<u8>>;

    /// SHA-256 fingerprint of the public key blob, hex encoded.
    fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.public_key_blob()))
    }
}

/// Ed25519 host key.
#[derive(Clone)]
pub struct Ed25519HostKey {
    signing_key: SigningKey,
}

impl std::fmt::Debug for Ed25519HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519HostKey")
            .field("public", &hex::encode(self.public_key()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Ed25519HostKey {
    /// Generates a fresh key pair.
    pub fn generate() -> Self {
        let seed: Zeroizing<[u8; SECRET_KEY_LENGTH]> =
            Zeroizing::new(rand::Rng::gen(&mut rand::thread_rng()));
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Creates a key from its 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> EmberResult<Self> {
        let seed: &[u8; SECRET_KEY_LENGTH] = seed.try_into().map_err(|_| {
            EmberError::Security(format!(
                "Ed25519 seed must be {} bytes, got {}",
                SECRET_KEY_LENGTH,
                seed.len()
            ))
        })?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(seed),
        })
    }

    /// Creates a key from a hex encoded seed.
    pub fn from_hex(seed_hex: &str) -> EmberResult<Self> {
        let seed = Zeroizing::new(
            hex::decode(seed_hex.trim())
                .map_err(|e| EmberError::Config(format!("Host key seed is not hex: {}", e)))?,
        );
        Self::from_seed(&seed)
    }

    /// Reads a hex encoded seed from `path`.
    pub fn load(path: impl AsRef<Path>) -> EmberResult<Self> {
        let path = path.as_ref();
        let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            EmberError::Config(format!("Cannot read host key {}: {}", path.display(), e))
        })?);
        Self::from_hex(&contents)
    }

    /// Raw 32-byte public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Verifies a signature blob over `data` against a public key blob.
    ///
    /// # Errors
    ///
    /// [`EmberError::Security`] for malformed blobs, a foreign algorithm, or
    /// a signature that does not verify.
    pub fn verify_blob(key_blob: &[u8], data: &[u8], signature_blob: &[u8]) -> EmberResult<()> {
        let public = parse_blob(key_blob, 32, "public key")?;
        let signature = parse_blob(signature_blob, 64, "signature")?;

        let public: [u8; 32] = public
            .try_into()
            .map_err(|_| EmberError::Security("Ed25519 public key must be 32 bytes".into()))?;
        let signature: [u8; 64] = signature
            .try_into()
            .map_err(|_| EmberError::Security("Ed25519 signature must be 64 bytes".into()))?;

        let verifying_key = VerifyingKey::from_bytes(&public)
            .map_err(|e| EmberError::Security(format!("Invalid Ed25519 public key: {}", e)))?;
        verifying_key
            .verify(data, &Signature::from_bytes(&signature))
            .map_err(|_| EmberError::Security("Host key signature does not verify".to_string()))
    }
}

fn parse_blob<'a>(blob: &'a [u8], expected_len: usize, what: &str) -> EmberResult<&'a [u8]> {
    let mut reader = WireReader::new(blob);
    let algorithm = reader
        .read_string()
        .map_err(|e| EmberError::Security(format!("Malformed {} blob: {}", what, e)))?;
    if algorithm != HOST_KEY_ALGORITHM.as_bytes() {
        return Err(EmberError::Security(format!(
            "Unexpected {} algorithm '{}'",
            what,
            String::from_utf8_lossy(algorithm)
        )));
    }
    let body = reader
        .read_string()
        .map_err(|e| EmberError::Security(format!("Malformed {} blob: {}", what, e)))?;
    if body.len() != expected_len || reader.remaining() != 0 {
        return Err(EmberError::Security(format!(
            "Ed25519 {} must be {} bytes",
            what, expected_len
        )));
    }
    Ok(body)
}

impl HostKey for Ed25519HostKey {
    fn algorithm_name(&self) -> &'static str {
        HOST_KEY_ALGORITHM
    }

    fn public_key_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(51);
        put_string(&mut blob, HOST_KEY_ALGORITHM.as_bytes());
        put_string(&mut blob, &self.public_key());
        blob
    }

    fn sign(&self, data: &[u8]) -> EmberResult<Vec<u8>> {
        let signature = self.signing_key.sign(data);
        let mut blob = Vec::with_capacity(83);
        put_string(&mut blob, HOST_KEY_ALGORITHM.as_bytes());
        put_string(&mut blob, &signature.to_bytes());
        Ok(blob)
    }
}
