//! Structured logging for the SSH transport
//!
//! Thin wrappers over `tracing` so every event carries the same field names.
//!
//! # Log Levels
//!
//! - **DEBUG**: Packet traffic, sequence numbers, key installation
//! - **INFO**: Handshake state transitions, connection lifecycle
//! - **WARN**: Ignored messages, fatal teardown reasons
//!
//! # Example
//!
//! ```no_run
//! use ember_proto::ssh::logging;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter("ember_proto::ssh=debug")
//!     .init();
//!
//! logging::log_state_transition("AwaitingKexInit", "AwaitingKexDhInit");
//! ```

use tracing::{debug, info, warn};

/// Log a handshake state transition
pub fn log_state_transition(from: &str, to: &str) {
    info!(state_from = from, state_to = to, "Handshake state transition");
}

/// Log one packet leaving or entering the transport
///
/// # Arguments
///
/// * `direction` - "send" or "recv"
/// * `seq` - Sequence number the packet used
/// * `msg_type` - First payload byte
/// * `payload_len` - Payload length in bytes
/// * `encrypted` - Whether keys were active
pub fn log_packet(direction: &str, seq: u32, msg_type: u8, payload_len: usize, encrypted: bool) {
    debug!(
        direction = direction,
        seq_num = seq,
        msg_type = msg_type,
        payload_len = payload_len,
        encrypted = encrypted,
        "SSH packet"
    );
}

/// Log activation of one direction's keys
pub fn log_keys_installed(direction: &str, strict_kex: bool, next_seq: u32) {
    debug!(
        direction = direction,
        strict_kex = strict_kex,
        next_seq = next_seq,
        "Session keys installed"
    );
}

/// Log completion of a key exchange
pub fn log_kex_complete(kex: &str, session_id: &[u8], rekey: bool) {
    info!(
        kex = kex,
        session_id = %hex::encode(session_id),
        rekey = rekey,
        "Key exchange complete"
    );
}

/// Log a message that was dropped without affecting the connection
pub fn log_ignored_message(msg_type: u8, seq: u32, reason: &str) {
    warn!(msg_type = msg_type, seq_num = seq, reason = reason, "Ignoring message");
}

/// Log a connection being torn down
pub fn log_teardown(peer: &str, reason: &str) {
    warn!(peer = peer, reason = reason, "Dropping connection");
}

/// Log a disconnect received from the peer
pub fn log_peer_disconnect(peer: &str, reason_code: u32, description: &str) {
    info!(
        peer = peer,
        reason_code = reason_code,
        description = description,
        "Peer disconnected"
    );
}
