//! SSH transport layer, server side.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! 1. **Wire encoding** ([`wire`], [`message`], [`version`]) - strings,
//!    mpints, name-lists, message numbers, identification lines
//! 2. **Packet layer** ([`packet`]) - binary packet framing and reassembly
//!    (RFC 4253 Section 6)
//! 3. **Cipher** ([`crypto`]) - `chacha20-poly1305@openssh.com`
//! 4. **Key exchange** ([`kex`], [`kex_dh`], [`hostkey`], [`keys`],
//!    [`transport`]) - KEXINIT through NEWKEYS and the key schedule
//! 5. **Session** ([`session`], [`service`]) - sequence numbers, active
//!    keys, and the hand-off to the service layer
//! 6. **Connection and server** ([`connection`], [`server`], [`config`]) -
//!    the per-connection context and the tokio listener
//!
//! # Example
//!
//! ```rust
//! use ember_proto::ssh::{Connection, SshServerConfig, Ed25519HostKey, HandshakeState};
//! use std::sync::Arc;
//!
//! let peer = "127.0.0.1:50000".parse().unwrap();
//! let host_key = Arc::new(Ed25519HostKey::generate());
//! let mut conn = Connection::new(peer, &SshServerConfig::default(), host_key);
//!
//! let out = conn.receive(b"SSH-2.0-OpenSSH_9.6\r\n").unwrap();
//! assert_eq!(out.bytes, b"SSH-2.0-EmberSSH_0.1.0\r\n");
//! assert_eq!(conn.state(), HandshakeState::AwaitingKexInit);
//! ```

pub mod config;
pub mod connection;
pub mod crypto;
pub mod hostkey;
pub mod kex;
pub mod kex_dh;
pub mod keys;
pub mod logging;
pub mod message;
pub mod packet;
pub mod server;
pub mod service;
pub mod session;
pub mod transport;
pub mod version;
pub mod wire;

pub use config::SshServerConfig;
pub use connection::{Connection, Transmit};
pub use crypto::PacketKey;
pub use hostkey::{Ed25519HostKey, HostKey};
pub use kex::{KexEcdhInit, KexEcdhReply, KexInit, Negotiated, NewKeys};
pub use kex_dh::{Curve25519Exchange, ExchangeHashInput};
pub use keys::{SequenceCounters, SessionKeys};
pub use message::{Disconnect, DisconnectReason, MessageType};
pub use packet::{BinaryPacket, PacketCodec, Parsed, Protection, MAX_PACKET_SIZE};
pub use server::SshServer;
pub use service::{DefaultServiceHandler, ServiceHandler, ServiceResponse};
pub use session::{Received, SessionManager};
pub use transport::{HandshakeState, KexOutcome, KeyExchangeEngine};
pub use version::Version;
