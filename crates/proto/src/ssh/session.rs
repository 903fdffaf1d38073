//! Per-connection packet state: codec, sequence numbers and active keys.
//!
//! The manager switches keys one direction at a time. After our NEWKEYS is
//! framed, [`SessionManager::install_keys`] puts the server-to-client key
//! in force for sending and parks the client-to-server key until the peer's
//! NEWKEYS arrives and [`SessionManager::activate_rx`] is called.
//!
//! Sequence numbers advance exactly once per complete packet. With strict
//! key exchange each direction's counter restarts at zero when its new key
//! takes over.

use super::crypto::PacketKey;
use super::keys::{SequenceCounters, SessionKeys};
use super::logging;
use super::packet::{PacketCodec, Parsed, Protection};
use super::service::{ServiceHandler, ServiceResponse};
use ember_platform::{EmberError, EmberResult};

/// One complete incoming packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Receive sequence number the packet carried
    pub seq: u32,
    /// Decrypted payload
    pub payload: Vec<u8>,
}

/// Owns the packet-level state of one connection.
pub struct SessionManager {
    codec: PacketCodec,
    counters: SequenceCounters,
    tx_key: Option<PacketKey>,
    rx_key: Option<PacketKey>,
    pending_rx_key: Option<PacketKey>,
    strict_kex: bool,
    service: Box<dyn ServiceHandler>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("counters", &self.counters)
            .field("tx_encrypted", &self.tx_key.is_some())
            .field("rx_encrypted", &self.rx_key.is_some())
            .field("strict_kex", &self.strict_kex)
            .field("buffered", &self.codec.buffered())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager with plaintext framing in both directions.
    pub fn new(max_packet_size: usize, service: Box<dyn ServiceHandler>) -> Self {
        Self {
            codec: PacketCodec::new(max_packet_size),
            counters: SequenceCounters::new(),
            tx_key: None,
            rx_key: None,
            pending_rx_key: None,
            strict_kex: false,
            service,
        }
    }

    /// Current sequence counters.
    pub fn counters(&self) -> SequenceCounters {
        self.counters
    }

    /// Enables counter resets on key installation.
    pub fn set_strict_kex(&mut self, strict: bool) {
        self.strict_kex = strict;
    }

    /// Whether outgoing packets are encrypted.
    pub fn tx_encrypted(&self) -> bool {
        self.tx_key.is_some()
    }

    /// Whether incoming packets are decrypted.
    pub fn rx_encrypted(&self) -> bool {
        self.rx_key.is_some()
    }

    /// Adds received bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.codec.append(data);
    }

    /// Frames (and, once keys are active, seals) one payload.
    pub fn encode(&mut self, payload: &[u8]) -> EmberResult<Vec<u8>> {
        let seq = self.counters.tx();
        let protection = self.tx_key.as_ref().map(|key| Protection { key, seq });
        let wire = self.codec.create(payload, protection)?;
        self.counters.advance_tx();

        logging::log_packet(
            "send",
            seq,
            payload.first().copied().unwrap_or_default(),
            payload.len(),
            protection.is_some(),
        );
        Ok(wire)
    }

    /// Takes the next complete packet from the buffered input.
    ///
    /// Returns `Ok(None)` while more bytes are needed.
    pub fn decode(&mut self) -> EmberResult<Option<Received>> {
        let seq = self.counters.rx();
        let protection = self.rx_key.as_ref().map(|key| Protection { key, seq });
        let encrypted = protection.is_some();

        match self.codec.parse(protection)? {
            Parsed::Partial { .. } => Ok(None),
            Parsed::Complete(packet) => {
                self.counters.advance_rx();
                let payload = packet.into_payload();
                logging::log_packet(
                    "recv",
                    seq,
                    payload.first().copied().unwrap_or_default(),
                    payload.len(),
                    encrypted,
                );
                Ok(Some(Received { seq, payload }))
            }
        }
    }

    /// Switches the send direction to fresh keys.
    ///
    /// Call after our NEWKEYS is encoded. The receive key is held until
    /// [`Self::activate_rx`]. Counters restart at zero only under strict
    /// key exchange; otherwise they keep counting from connection start.
    pub fn install_keys(&mut self, keys: &SessionKeys) {
        self.tx_key = Some(keys.server_to_client());
        self.pending_rx_key = Some(keys.client_to_server());
        if self.strict_kex {
            self.counters.reset_tx();
        }
        logging::log_keys_installed("send", self.strict_kex, self.counters.tx());
    }

    /// Switches the receive direction after the peer's NEWKEYS.
    pub fn activate_rx(&mut self) -> EmberResult<()> {
        let key = self.pending_rx_key.take().ok_or_else(|| {
            EmberError::HandshakeViolation("NEWKEYS received before keys were derived".into())
        })?;
        self.rx_key = Some(key);
        if self.strict_kex {
            self.counters.reset_rx();
        }
        logging::log_keys_installed("recv", self.strict_kex, self.counters.rx());
        Ok(())
    }

    /// Hands a post-handshake payload to the service layer.
    pub fn dispatch(&mut self, payload: &[u8]) -> EmberResult<ServiceResponse> {
        self.service.handle(payload)
    }

    /// Drops keys and buffered input.
    pub fn clear(&mut self) {
        self.codec.reset();
        self.tx_key = None;
        self.rx_key = None;
        self.pending_rx_key = None;
    }
}
