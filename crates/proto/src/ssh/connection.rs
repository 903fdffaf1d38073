//! One client connection as an explicit, I/O free context.
//!
//! [`Connection`] owns the handshake engine and the session manager and
//! routes every decoded payload between them. The caller moves bytes:
//! whatever arrives goes to [`Connection::receive`], and the returned
//! [`Transmit`] says what to write back and whether to hang up.
//!
//! Routing rules:
//!
//! - DISCONNECT from the peer closes the connection.
//! - IGNORE, DEBUG and UNIMPLEMENTED are dropped.
//! - Key exchange messages go to the [`KeyExchangeEngine`].
//! - While keys are being exchanged any other known message is a
//!   handshake violation. Unknown types are ignored during the handshake
//!   and answered with UNIMPLEMENTED afterwards.
//! - During a strict initial key exchange only key exchange messages and
//!   DISCONNECT are allowed.
//! - Everything else goes to the [`ServiceHandler`].

use super::config::SshServerConfig;
use super::hostkey::HostKey;
use super::logging;
use super::message::{unimplemented, Disconnect, DisconnectReason, MessageType};
use super::service::{DefaultServiceHandler, ServiceHandler};
use super::session::{Received, SessionManager};
use super::transport::{HandshakeState, KexOutcome, KeyExchangeEngine};
use super::version::take_line;
use bytes::BytesMut;
use ember_platform::{ConnectionEvent, EmberError, EmberResult};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Output of one [`Connection::receive`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Bytes to write to the socket, in order
    pub bytes: Vec<u8>,
    /// Lifecycle events raised while processing
    pub events: Vec<ConnectionEvent>,
    /// Set when the connection should close after `bytes` are written
    pub close: Option<String>,
}

/// Per-connection protocol context.
#[derive(Debug)]
pub struct Connection {
    peer: SocketAddr,
    engine: KeyExchangeEngine,
    session: SessionManager,
    line_buffer: BytesMut,
    // Framed before a fatal error; these hold tx sequence numbers
    unsent: Vec<u8>,
    established: bool,
    closed: bool,
}

impl Connection {
    /// Creates the context for a freshly accepted peer.
    pub fn new(peer: SocketAddr, config: &SshServerConfig, host_key: Arc<dyn HostKey>) -> Self {
        let service = Box::new(DefaultServiceHandler::new(config.banner.clone()));
        Self::with_service(peer, config, host_key, service)
    }

    /// Creates a context with a custom service layer.
    pub fn with_service(
        peer: SocketAddr,
        config: &SshServerConfig,
        host_key: Arc<dyn HostKey>,
        service: Box<dyn ServiceHandler>,
    ) -> Self {
        Self {
            peer,
            engine: KeyExchangeEngine::new(host_key, config.version()),
            session: SessionManager::new(config.max_packet_size, service),
            line_buffer: BytesMut::with_capacity(256),
            unsent: Vec::new(),
            established: false,
            closed: false,
        }
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Handshake state.
    pub fn state(&self) -> HandshakeState {
        self.engine.state()
    }

    /// Session identifier once the first key exchange completed.
    pub fn session_id(&self) -> Option<&[u8; 32]> {
        self.engine.session_id()
    }

    /// Packet state, for inspection.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Whether the connection has finished.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Processes received bytes.
    ///
    /// # Errors
    ///
    /// Any fatal error. The connection is unusable afterwards; send the
    /// bytes from [`Self::disconnect_for`] and drop it. Replies framed
    /// earlier in the same call are kept and lead those bytes.
    pub fn receive(&mut self, data: &[u8]) -> EmberResult<Transmit> {
        let mut out = Transmit::default();
        if self.closed {
            out.close = Some("Connection already closed".to_string());
            return Ok(out);
        }

        if let Err(e) = self.process(data, &mut out) {
            self.unsent = std::mem::take(&mut out.bytes);
            return Err(e);
        }
        if out.close.is_some() {
            self.close();
        }
        Ok(out)
    }

    fn process(&mut self, data: &[u8], out: &mut Transmit) -> EmberResult<()> {
        if self.engine.state() == HandshakeState::AwaitingVersion {
            self.line_buffer.extend_from_slice(data);
            let Some(line) = take_line(&mut self.line_buffer)? else {
                return Ok(());
            };
            out.bytes.extend(self.engine.receive_version(&line)?);
            let rest = self.line_buffer.split();
            self.session.feed(&rest);
        } else {
            self.session.feed(data);
        }

        while out.close.is_none() {
            let Some(received) = self.session.decode()? else {
                break;
            };
            self.route(received, out)?;
        }
        Ok(())
    }

    fn route(&mut self, received: Received, out: &mut Transmit) -> EmberResult<()> {
        let Received { seq, payload } = received;
        let msg_type = payload
            .first()
            .copied()
            .ok_or_else(|| EmberError::Protocol("Empty payload".to_string()))?;
        let msg = MessageType::from_u8(msg_type);

        if msg == Some(MessageType::Disconnect) {
            let (code, description) = match Disconnect::from_bytes(&payload) {
                Ok(disconnect) => (disconnect.reason_code, disconnect.description),
                Err(_) => (0, String::new()),
            };
            logging::log_peer_disconnect(&self.peer.to_string(), code, &description);
            out.close = Some(format!("Peer disconnected ({}): {}", code, description));
            return Ok(());
        }

        let handshaking = self.engine.state() != HandshakeState::Established;
        let is_kex = msg.map_or(false, |m| m.is_kex());
        if handshaking && self.engine.strict_kex() && !self.engine.is_rekey() && !is_kex {
            return Err(EmberError::HandshakeViolation(format!(
                "Message type {} during strict key exchange",
                msg_type
            )));
        }

        match msg {
            Some(MessageType::Ignore | MessageType::Debug | MessageType::Unimplemented) => {
                debug!(msg_type, seq, "Discarding transport message");
                Ok(())
            }
            Some(_) if is_kex => {
                let outcome = self.engine.receive_packet(&payload, seq)?;
                self.apply(outcome, out)
            }
            Some(other) if handshaking => Err(EmberError::HandshakeViolation(format!(
                "{} during key exchange",
                other
            ))),
            None if handshaking => {
                let err = EmberError::UnsupportedMessage(msg_type);
                logging::log_ignored_message(msg_type, seq, &err.to_string());
                Ok(())
            }
            _ => self.dispatch(seq, &payload, out),
        }
    }

    fn apply(&mut self, outcome: KexOutcome, out: &mut Transmit) -> EmberResult<()> {
        for reply in &outcome.replies {
            out.bytes.extend(self.session.encode(reply)?);
        }
        if let Some(keys) = &outcome.new_keys {
            self.session.set_strict_kex(self.engine.strict_kex());
            self.session.install_keys(keys);
        }
        if outcome.peer_newkeys {
            self.session.activate_rx()?;
            if !self.established {
                self.established = true;
                out.events.push(ConnectionEvent::Established {
                    peer: self.peer,
                    client_version: self.engine.peer_version().unwrap_or_default().to_string(),
                });
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, seq: u32, payload: &[u8], out: &mut Transmit) -> EmberResult<()> {
        match self.session.dispatch(payload) {
            Ok(response) => {
                for reply in &response.replies {
                    out.bytes.extend(self.session.encode(reply)?);
                }
                if let Some(service) = response.requested {
                    out.events.push(ConnectionEvent::ServiceRequested {
                        peer: self.peer,
                        service,
                    });
                }
                if response.close {
                    out.close = Some("Closed by service layer".to_string());
                }
                Ok(())
            }
            Err(EmberError::UnsupportedMessage(msg_type)) => {
                logging::log_ignored_message(msg_type, seq, "answered with UNIMPLEMENTED");
                out.bytes.extend(self.session.encode(&unimplemented(seq))?);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Builds a best-effort DISCONNECT for a fatal error and closes.
    ///
    /// Any replies framed before the error come first, so the DISCONNECT
    /// carries the sequence number the peer expects. Returns `None` when
    /// nothing can be sent: before the identification exchange, or once
    /// the connection is already closed.
    pub fn disconnect_for(&mut self, err: &EmberError) -> Option<Vec<u8>> {
        if !self.closed {
            logging::log_teardown(&self.peer.to_string(), &err.to_string());
        }
        self.disconnect(DisconnectReason::for_error(err), &err.to_string())
    }

    /// Builds a DISCONNECT with an explicit reason and closes.
    pub fn disconnect(&mut self, reason: DisconnectReason, description: &str) -> Option<Vec<u8>> {
        if self.closed {
            return None;
        }
        let mut bytes = std::mem::take(&mut self.unsent);
        if self.engine.state() != HandshakeState::AwaitingVersion {
            match self
                .session
                .encode(&Disconnect::new(reason, description).to_bytes())
            {
                Ok(packet) => bytes.extend(packet),
                Err(e) => debug!(error = %e, "Cannot frame DISCONNECT"),
            }
        }
        self.close();
        (!bytes.is_empty()).then_some(bytes)
    }

    /// Releases keys and buffered input.
    pub fn close(&mut self) {
        self.session.clear();
        self.line_buffer.clear();
        self.unsent.clear();
        self.closed = true;
    }
}
