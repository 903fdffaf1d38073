//! A minimal SSH2 server transport.
//!
//! The crate implements the server half of the SSH transport layer with a
//! single fixed suite: `curve25519-sha256` key exchange, an `ssh-ed25519`
//! host key and the `chacha20-poly1305@openssh.com` cipher. Above the
//! transport it answers service requests and declines authentication.
//!
//! # Features
//!
//! - `ssh` (default) - the transport, the connection context and the server
//!
//! # Example
//!
//! ```rust
//! use ember_proto::ssh::packet::{PacketCodec, Parsed};
//!
//! let mut codec = PacketCodec::default();
//! let wire = codec.create(b"\x05payload", None).unwrap();
//!
//! codec.append(&wire);
//! match codec.parse(None).unwrap() {
//!     Parsed::Complete(packet) => assert_eq!(packet.payload(), b"\x05payload"),
//!     Parsed::Partial { .. } => unreachable!(),
//! }
//! ```
//!
//! # Security
//!
//! - Cryptographic primitives come from vetted crates (`ring`, `dalek`,
//!   RustCrypto `chacha20` / `poly1305`)
//! - Tags are compared in constant time and checked before decryption
//! - Key material is zeroized on drop and redacted from `Debug` output
//!
//! # References
//!
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 5656](https://datatracker.ietf.org/doc/html/rfc5656) - ECDH key exchange
//! - [RFC 8709](https://datatracker.ietf.org/doc/html/rfc8709) - Ed25519 in SSH
//! - [RFC 8731](https://datatracker.ietf.org/doc/html/rfc8731) - curve25519-sha256

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ssh")]
pub mod ssh;
