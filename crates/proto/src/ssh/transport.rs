//! Key exchange state machine (RFC 4253 Sections 4.2, 7, 8).
//!
//! ```text
//! AwaitingVersion --peer id line--> AwaitingKexInit
//! AwaitingKexInit --KEXINIT--> AwaitingKexDhInit        (send KEXINIT)
//! AwaitingKexDhInit --KEX_ECDH_INIT--> AwaitingNewKeys  (send REPLY, NEWKEYS)
//! AwaitingNewKeys --NEWKEYS--> Established
//! Established --KEXINIT--> AwaitingKexDhInit            (rekey)
//! ```
//!
//! Send and receive readiness are tracked separately: our NEWKEYS goes out
//! right after the ECDH reply and outgoing traffic switches keys at that
//! point, while incoming traffic switches only when the peer's NEWKEYS
//! arrives.
//!
//! The engine works on whole payloads. Framing, encryption and sequence
//! numbers belong to [`SessionManager`](super::session::SessionManager).

use super::hostkey::HostKey;
use super::kex::{KexEcdhInit, KexEcdhReply, KexInit, Negotiated, NewKeys};
use super::kex_dh::{Curve25519Exchange, ExchangeHashInput};
use super::keys::SessionKeys;
use super::logging;
use super::message::MessageType;
use super::version::Version;
use ember_platform::{EmberError, EmberResult};
use std::sync::Arc;
use tracing::debug;

/// Where the handshake stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Waiting for the peer identification line
    AwaitingVersion,
    /// Waiting for the peer KEXINIT
    AwaitingKexInit,
    /// KEXINITs exchanged, waiting for the client ephemeral key
    AwaitingKexDhInit,
    /// Our NEWKEYS is sent, waiting for the peer's
    AwaitingNewKeys,
    /// Keys active in both directions
    Established,
}

impl HandshakeState {
    /// State name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::AwaitingVersion => "AwaitingVersion",
            HandshakeState::AwaitingKexInit => "AwaitingKexInit",
            HandshakeState::AwaitingKexDhInit => "AwaitingKexDhInit",
            HandshakeState::AwaitingNewKeys => "AwaitingNewKeys",
            HandshakeState::Established => "Established",
        }
    }
}

impl std::fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Data carried between KEXINIT and KEX_ECDH_INIT.
#[derive(Debug)]
struct AlgorithmsAnnounced {
    client_kexinit: Vec<u8>,
    server_kexinit: Vec<u8>,
    negotiated: Negotiated,
}

#[derive(Debug)]
enum Phase {
    AwaitingVersion,
    AwaitingKexInit,
    AwaitingKexDhInit(AlgorithmsAnnounced),
    AwaitingNewKeys { kex: String },
    Established,
}

impl Phase {
    fn state(&self) -> HandshakeState {
        match self {
            Phase::AwaitingVersion => HandshakeState::AwaitingVersion,
            Phase::AwaitingKexInit => HandshakeState::AwaitingKexInit,
            Phase::AwaitingKexDhInit(_) => HandshakeState::AwaitingKexDhInit,
            Phase::AwaitingNewKeys { .. } => HandshakeState::AwaitingNewKeys,
            Phase::Established => HandshakeState::Established,
        }
    }
}

/// What the connection must do after a handshake packet.
#[derive(Debug, Default)]
pub struct KexOutcome {
    /// Payloads to send, in order, under the current send keys.
    pub replies: Vec<Vec<u8>>,
    /// Freshly derived keys. Send keys switch after `replies` are out;
    /// receive keys wait for the peer NEWKEYS.
    pub new_keys: Option<SessionKeys>,
    /// The peer's NEWKEYS arrived: switch receive keys now.
    pub peer_newkeys: bool,
}

/// Server side of the SSH key exchange.
pub struct KeyExchangeEngine {
    phase: Phase,
    host_key: Arc<dyn HostKey>,
    local_version: Version,
    local_line: String,
    peer_line: Option<String>,
    session_id: Option<[u8; 32]>,
    strict_kex: bool,
    completed: u32,
}

impl std::fmt::Debug for KeyExchangeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeEngine")
            .field("state", &self.phase.state())
            .field("local_version", &self.local_line)
            .field("peer_version", &self.peer_line)
            .field("strict_kex", &self.strict_kex)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl KeyExchangeEngine {
    /// Creates an engine for a freshly accepted connection.
    pub fn new(host_key: Arc<dyn HostKey>, local_version: Version) -> Self {
        let local_line = local_version.to_string();
        Self {
            phase: Phase::AwaitingVersion,
            host_key,
            local_version,
            local_line,
            peer_line: None,
            session_id: None,
            strict_kex: false,
            completed: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.phase.state()
    }

    /// Our identification.
    pub fn local_version(&self) -> &Version {
        &self.local_version
    }

    /// The peer identification line, once received.
    pub fn peer_version(&self) -> Option<&str> {
        self.peer_line.as_deref()
    }

    /// Exchange hash of the first key exchange.
    pub fn session_id(&self) -> Option<&[u8; 32]> {
        self.session_id.as_ref()
    }

    /// Whether strict key exchange is in force.
    pub fn strict_kex(&self) -> bool {
        self.strict_kex
    }

    /// Whether a session existed before the exchange now running.
    pub fn is_rekey(&self) -> bool {
        self.completed > 0
    }

    fn transition(&mut self, next: Phase) {
        let from = self.phase.state();
        let to = next.state();
        self.phase = next;
        if from != to {
            logging::log_state_transition(from.name(), to.name());
        }
    }

    /// Handles the peer identification line (CR LF already removed).
    ///
    /// Returns our identification line in wire form.
    pub fn receive_version(&mut self, line: &str) -> EmberResult<Vec<u8>> {
        if !matches!(self.phase, Phase::AwaitingVersion) {
            return Err(EmberError::HandshakeViolation(
                "Identification line received twice".to_string(),
            ));
        }
        let peer = Version::parse(line)?;
        debug!(
            peer_software = peer.software(),
            "Peer identification received"
        );
        self.peer_line = Some(line.to_string());
        self.transition(Phase::AwaitingKexInit);
        Ok(self.local_version.to_wire_format())
    }

    /// Handles one key exchange payload.
    ///
    /// `seq` is the receive sequence number the packet arrived with.
    ///
    /// # Errors
    ///
    /// - [`EmberError::HandshakeViolation`] for a kex message in the wrong state
    /// - [`EmberError::KeyExchange`] when the client lacks the fixed suite
    /// - [`EmberError::Protocol`] / [`EmberError::Security`] for malformed
    ///   payloads or a failed agreement
    pub fn receive_packet(&mut self, payload: &[u8], seq: u32) -> EmberResult<KexOutcome> {
        let msg_type = payload
            .first()
            .copied()
            .ok_or_else(|| EmberError::Protocol("Empty payload".to_string()))?;
        let Some(msg) = MessageType::from_u8(msg_type) else {
            return Err(EmberError::UnsupportedMessage(msg_type));
        };

        match (msg, &self.phase) {
            (MessageType::KexInit, Phase::AwaitingKexInit | Phase::Established) => {
                self.on_kexinit(payload, seq)
            }
            (MessageType::KexdhInit, Phase::AwaitingKexDhInit(_)) => self.on_ecdh_init(payload),
            (MessageType::NewKeys, Phase::AwaitingNewKeys { .. }) => self.on_newkeys(payload),
            (msg, phase) => Err(EmberError::HandshakeViolation(format!(
                "{} not expected in state {}",
                msg,
                phase.state()
            ))),
        }
    }

    fn on_kexinit(&mut self, payload: &[u8], seq: u32) -> EmberResult<KexOutcome> {
        let client = KexInit::from_bytes(payload)?;
        let negotiated = Negotiated::check(&client)?;

        if !self.is_rekey() {
            self.strict_kex = negotiated.strict_kex;
            if self.strict_kex && seq != 0 {
                return Err(EmberError::HandshakeViolation(format!(
                    "Strict key exchange: KEXINIT arrived as packet {} instead of first",
                    seq
                )));
            }
        }

        let server_kexinit = KexInit::for_server().to_bytes();
        let outcome = KexOutcome {
            replies: vec![server_kexinit.clone()],
            ..KexOutcome::default()
        };

        self.transition(Phase::AwaitingKexDhInit(AlgorithmsAnnounced {
            client_kexinit: payload.to_vec(),
            server_kexinit,
            negotiated,
        }));
        Ok(outcome)
    }

    fn on_ecdh_init(&mut self, payload: &[u8]) -> EmberResult<KexOutcome> {
        let Phase::AwaitingKexDhInit(announced) = &mut self.phase else {
            return Err(EmberError::HandshakeViolation(
                "KEX_ECDH_INIT outside key exchange".to_string(),
            ));
        };

        if announced.negotiated.discard_guess {
            // The client guessed another method; its guessed packet is dropped.
            announced.negotiated.discard_guess = false;
            debug!("Discarding wrongly guessed key exchange packet");
            return Ok(KexOutcome::default());
        }

        let init = KexEcdhInit::from_bytes(payload)?;
        let exchange = Curve25519Exchange::new()?;
        let server_public = *exchange.public_key();
        let shared_secret = exchange.compute_shared_secret(&init.client_public)?;
        let host_key_blob = self.host_key.public_key_blob();

        let peer_line = self.peer_line.as_deref().unwrap_or_default();
        let exchange_hash = ExchangeHashInput {
            client_version: peer_line,
            server_version: &self.local_line,
            client_kexinit: &announced.client_kexinit,
            server_kexinit: &announced.server_kexinit,
            host_key_blob: &host_key_blob,
            client_public: &init.client_public,
            server_public: &server_public,
            shared_secret: &shared_secret,
        }
        .compute();

        let signature_blob = self.host_key.sign(&exchange_hash)?;
        let session_id = *self.session_id.get_or_insert(exchange_hash);
        let keys = SessionKeys::derive(&shared_secret, &exchange_hash, &session_id);

        let reply = KexEcdhReply {
            host_key_blob,
            server_public,
            signature_blob,
        };
        let kex = announced.negotiated.kex.clone();

        logging::log_kex_complete(&kex, &exchange_hash, self.is_rekey());
        self.transition(Phase::AwaitingNewKeys { kex });

        Ok(KexOutcome {
            replies: vec![reply.to_bytes(), NewKeys.to_bytes()],
            new_keys: Some(keys),
            peer_newkeys: false,
        })
    }

    fn on_newkeys(&mut self, payload: &[u8]) -> EmberResult<KexOutcome> {
        NewKeys::from_bytes(payload)?;
        self.completed += 1;
        self.transition(Phase::Established);
        Ok(KexOutcome {
            peer_newkeys: true,
            ..KexOutcome::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::hostkey::Ed25519HostKey;
    use crate::ssh::kex::KexEcdhReply;
    use crate::ssh::wire::put_string;

    fn engine() -> (KeyExchangeEngine, Arc<Ed25519HostKey>) {
        let host_key = Arc::new(Ed25519HostKey::generate());
        (
            KeyExchangeEngine::new(host_key.clone(), Version::default()),
            host_key,
        )
    }

    const CLIENT_LINE: &str = "SSH-2.0-TestClient_1.0";

    #[test]
    fn test_version_exchange() {
        let (mut engine, _) = engine();
        assert_eq!(engine.state(), HandshakeState::AwaitingVersion);

        let ours = engine.receive_version(CLIENT_LINE).unwrap();
        assert_eq!(ours, b"SSH-2.0-EmberSSH_0.1.0\r\n");
        assert_eq!(engine.peer_version(), Some(CLIENT_LINE));
        assert_eq!(engine.state(), HandshakeState::AwaitingKexInit);

        assert!(matches!(
            engine.receive_version(CLIENT_LINE),
            Err(EmberError::HandshakeViolation(_))
        ));
    }

    #[test]
    fn test_bad_version_rejected() {
        let (mut engine, _) = engine();
        assert!(engine.receive_version("SSH-1.5-Ancient").is_err());
        assert_eq!(engine.state(), HandshakeState::AwaitingVersion);
    }

    #[test]
    fn test_packet_before_version_is_violation() {
        let (mut engine, _) = engine();
        let kexinit = KexInit::for_client().to_bytes();
        assert!(matches!(
            engine.receive_packet(&kexinit, 0),
            Err(EmberError::HandshakeViolation(_))
        ));
    }

    #[test]
    fn test_ecdh_init_before_kexinit_is_violation() {
        let (mut engine, _) = engine();
        engine.receive_version(CLIENT_LINE).unwrap();
        let init = KexEcdhInit {
            client_public: [9u8; 32],
        };
        let err = engine.receive_packet(&init.to_bytes(), 0).unwrap_err();
        assert!(matches!(err, EmberError::HandshakeViolation(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_full_exchange_produces_verifiable_reply() {
        let (mut engine, host_key) = engine();
        engine.receive_version(CLIENT_LINE).unwrap();

        let client_kexinit = KexInit::for_client().to_bytes();
        let outcome = engine.receive_packet(&client_kexinit, 0).unwrap();
        assert_eq!(outcome.replies.len(), 1);
        let server_kexinit = outcome.replies[0].clone();
        assert!(KexInit::from_bytes(&server_kexinit).is_ok());
        assert!(engine.strict_kex());
        assert_eq!(engine.state(), HandshakeState::AwaitingKexDhInit);

        let client = Curve25519Exchange::new().unwrap();
        let client_public = *client.public_key();
        let outcome = engine
            .receive_packet(&KexEcdhInit { client_public }.to_bytes(), 1)
            .unwrap();
        assert_eq!(engine.state(), HandshakeState::AwaitingNewKeys);
        assert_eq!(outcome.replies.len(), 2);
        assert_eq!(outcome.replies[1], vec![MessageType::NewKeys as u8]);
        let server_keys = outcome.new_keys.expect("keys derived");

        let reply = KexEcdhReply::from_bytes(&outcome.replies[0]).unwrap();
        assert_eq!(reply.host_key_blob, host_key.public_key_blob());

        let shared = client.compute_shared_secret(&reply.server_public).unwrap();
        let h = ExchangeHashInput {
            client_version: CLIENT_LINE,
            server_version: "SSH-2.0-EmberSSH_0.1.0",
            client_kexinit: &client_kexinit,
            server_kexinit: &server_kexinit,
            host_key_blob: &reply.host_key_blob,
            client_public: &client_public,
            server_public: &reply.server_public,
            shared_secret: &shared,
        }
        .compute();
        Ed25519HostKey::verify_blob(&reply.host_key_blob, &h, &reply.signature_blob).unwrap();
        assert_eq!(engine.session_id(), Some(&h));
        assert_eq!(server_keys, SessionKeys::derive(&shared, &h, &h));

        let outcome = engine.receive_packet(&NewKeys.to_bytes(), 2).unwrap();
        assert!(outcome.peer_newkeys);
        assert!(outcome.replies.is_empty());
        assert_eq!(engine.state(), HandshakeState::Established);
    }

    fn establish(engine: &mut KeyExchangeEngine) -> [u8; 32] {
        engine.receive_version(CLIENT_LINE).unwrap();
        engine
            .receive_packet(&KexInit::for_client().to_bytes(), 0)
            .unwrap();
        let client = Curve25519Exchange::new().unwrap();
        engine
            .receive_packet(
                &KexEcdhInit {
                    client_public: *client.public_key(),
                }
                .to_bytes(),
                1,
            )
            .unwrap();
        engine.receive_packet(&NewKeys.to_bytes(), 2).unwrap();
        *engine.session_id().unwrap()
    }

    #[test]
    fn test_rekey_keeps_session_id() {
        let (mut engine, _) = engine();
        let session_id = establish(&mut engine);
        assert!(engine.is_rekey());

        let outcome = engine
            .receive_packet(&KexInit::for_client().to_bytes(), 17)
            .unwrap();
        assert_eq!(outcome.replies.len(), 1);
        assert_eq!(engine.state(), HandshakeState::AwaitingKexDhInit);

        let client = Curve25519Exchange::new().unwrap();
        let outcome = engine
            .receive_packet(
                &KexEcdhInit {
                    client_public: *client.public_key(),
                }
                .to_bytes(),
                18,
            )
            .unwrap();
        assert!(outcome.new_keys.is_some());
        assert_eq!(engine.session_id(), Some(&session_id));
    }

    #[test]
    fn test_newkeys_twice_is_violation() {
        let (mut engine, _) = engine();
        establish(&mut engine);
        assert!(matches!(
            engine.receive_packet(&NewKeys.to_bytes(), 3),
            Err(EmberError::HandshakeViolation(_))
        ));
    }

    #[test]
    fn test_strict_kexinit_must_be_first_packet() {
        let (mut engine, _) = engine();
        engine.receive_version(CLIENT_LINE).unwrap();
        let err = engine
            .receive_packet(&KexInit::for_client().to_bytes(), 1)
            .unwrap_err();
        assert!(matches!(err, EmberError::HandshakeViolation(_)));
    }

    #[test]
    fn test_non_strict_client_tolerates_earlier_packets() {
        let (mut engine, _) = engine();
        engine.receive_version(CLIENT_LINE).unwrap();

        let client = build_kexinit(&["curve25519-sha256"]);
        assert!(!Negotiated::check(&KexInit::from_bytes(&client).unwrap())
            .unwrap()
            .strict_kex);

        engine.receive_packet(&client, 3).unwrap();
        assert!(!engine.strict_kex());
    }

    fn build_kexinit(kex: &[&str]) -> Vec<u8> {
        let mut buf = vec![MessageType::KexInit as u8];
        buf.extend_from_slice(&[0x42; 16]);
        for list in [
            kex.join(","),
            "ssh-ed25519".to_string(),
            "chacha20-poly1305@openssh.com".to_string(),
            "chacha20-poly1305@openssh.com".to_string(),
            "hmac-sha2-256".to_string(),
            "hmac-sha2-256".to_string(),
            "none".to_string(),
            "none".to_string(),
            String::new(),
            String::new(),
        ] {
            put_string(&mut buf, list.as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        buf
    }

    #[test]
    fn test_unsupported_suite_fails_key_exchange() {
        let (mut engine, _) = engine();
        engine.receive_version(CLIENT_LINE).unwrap();
        let err = engine
            .receive_packet(&build_kexinit(&["diffie-hellman-group14-sha256"]), 0)
            .unwrap_err();
        assert!(matches!(err, EmberError::KeyExchange(_)));
    }

    #[test]
    fn test_unknown_type_is_not_fatal() {
        let (mut engine, _) = engine();
        engine.receive_version(CLIENT_LINE).unwrap();
        let err = engine.receive_packet(&[0xc8, 1, 2], 0).unwrap_err();
        assert!(matches!(err, EmberError::UnsupportedMessage(0xc8)));
        assert!(!err.is_fatal());
        assert_eq!(engine.state(), HandshakeState::AwaitingKexInit);
    }
}
