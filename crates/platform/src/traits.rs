//! Boundary traits between the protocol core and its host

use std::net::SocketAddr;

/// Connection lifecycle notifications published by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The listener is bound and accepting
    Listening {
        /// Bound address
        addr: SocketAddr,
    },
    /// A TCP connection was accepted
    Accepted {
        /// Remote address
        peer: SocketAddr,
    },
    /// Both directions are running under negotiated keys
    Established {
        /// Remote address
        peer: SocketAddr,
        /// Peer identification line, without CRLF
        client_version: String,
    },
    /// The peer asked for a service after the handshake
    ServiceRequested {
        /// Remote address
        peer: SocketAddr,
        /// Requested service name
        service: String,
    },
    /// The connection was torn down
    Closed {
        /// Remote address
        peer: SocketAddr,
        /// Human readable reason
        reason: String,
    },
}

/// Receives connection status updates.
///
/// The core calls the sink but never depends on it: a sink that drops
/// everything is a valid implementation.
pub trait EventSink: Send + Sync {
    /// Handle a single event
    fn notify(&self, event: &ConnectionEvent);
}

/// Sink that logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Listening { addr } => {
                tracing::info!(%addr, "listening");
            }
            ConnectionEvent::Accepted { peer } => {
                tracing::info!(%peer, "connection accepted");
            }
            ConnectionEvent::Established {
                peer,
                client_version,
            } => {
                tracing::info!(%peer, client_version = %client_version, "session established");
            }
            ConnectionEvent::ServiceRequested { peer, service } => {
                tracing::info!(%peer, service = %service, "service requested");
            }
            ConnectionEvent::Closed { peer, reason } => {
                tracing::info!(%peer, reason = %reason, "connection closed");
            }
        }
    }
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: &ConnectionEvent) {}
}
