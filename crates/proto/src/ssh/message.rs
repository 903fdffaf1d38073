//! SSH transport message types (RFC 4253 Section 12).
//!
//! Only the messages this server speaks or tolerates are listed. Anything
//! else maps to `None` in [`MessageType::from_u8`] and is treated as an
//! unsupported message by the connection.
//!
//! # Example
//!
//! ```rust
//! use ember_proto::ssh::message::MessageType;
//!
//! let msg_type = MessageType::KexInit;
//! assert_eq!(msg_type as u8, 20);
//! ```

use super::wire::{put_string, put_u32, WireReader};
use ember_platform::{EmberError, EmberResult};

/// SSH message types used by the transport and the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Transport layer generic (1-19)
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message - keep-alive or traffic padding.
    Ignore = 2,
    /// Unimplemented message - response to unknown message type.
    Unimplemented = 3,
    /// Debug message.
    Debug = 4,
    /// Service request (e.g. "ssh-userauth").
    ServiceRequest = 5,
    /// Service request accepted.
    ServiceAccept = 6,

    // Algorithm negotiation (20-29)
    /// Key exchange init - algorithm announcement.
    KexInit = 20,
    /// New keys - the sender switches to the negotiated keys.
    NewKeys = 21,

    // Key exchange method specific (30-49)
    /// ECDH key exchange init, carrying the client ephemeral key.
    KexdhInit = 30,
    /// ECDH key exchange reply: host key, server ephemeral key, signature.
    KexdhReply = 31,

    // User authentication generic (50-79)
    /// User authentication request.
    UserauthRequest = 50,
    /// User authentication failure.
    UserauthFailure = 51,
    /// User authentication success.
    UserauthSuccess = 52,
    /// User authentication banner.
    UserauthBanner = 53,
}

impl MessageType {
    /// Converts a byte to a message type.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ember_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::from_u8(20), Some(MessageType::KexInit));
    /// assert_eq!(MessageType::from_u8(94), None);
    /// ```
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            20 => Some(MessageType::KexInit),
            21 => Some(MessageType::NewKeys),
            30 => Some(MessageType::KexdhInit),
            31 => Some(MessageType::KexdhReply),
            50 => Some(MessageType::UserauthRequest),
            51 => Some(MessageType::UserauthFailure),
            52 => Some(MessageType::UserauthSuccess),
            53 => Some(MessageType::UserauthBanner),
            _ => None,
        }
    }

    /// Returns the RFC name of the message.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Disconnect => "SSH_MSG_DISCONNECT",
            MessageType::Ignore => "SSH_MSG_IGNORE",
            MessageType::Unimplemented => "SSH_MSG_UNIMPLEMENTED",
            MessageType::Debug => "SSH_MSG_DEBUG",
            MessageType::ServiceRequest => "SSH_MSG_SERVICE_REQUEST",
            MessageType::ServiceAccept => "SSH_MSG_SERVICE_ACCEPT",
            MessageType::KexInit => "SSH_MSG_KEXINIT",
            MessageType::NewKeys => "SSH_MSG_NEWKEYS",
            MessageType::KexdhInit => "SSH_MSG_KEX_ECDH_INIT",
            MessageType::KexdhReply => "SSH_MSG_KEX_ECDH_REPLY",
            MessageType::UserauthRequest => "SSH_MSG_USERAUTH_REQUEST",
            MessageType::UserauthFailure => "SSH_MSG_USERAUTH_FAILURE",
            MessageType::UserauthSuccess => "SSH_MSG_USERAUTH_SUCCESS",
            MessageType::UserauthBanner => "SSH_MSG_USERAUTH_BANNER",
        }
    }

    /// Messages that may legitimately appear while keys are being exchanged.
    pub fn is_kex(&self) -> bool {
        matches!(
            self,
            MessageType::KexInit
                | MessageType::NewKeys
                | MessageType::KexdhInit
                | MessageType::KexdhReply
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), *self as u8)
    }
}

/// Disconnect reason codes (RFC 4253 Section 11.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DisconnectReason {
    /// SSH_DISCONNECT_PROTOCOL_ERROR
    ProtocolError = 2,
    /// SSH_DISCONNECT_KEY_EXCHANGE_FAILED
    KeyExchangeFailed = 3,
    /// SSH_DISCONNECT_MAC_ERROR
    MacError = 5,
    /// SSH_DISCONNECT_SERVICE_NOT_AVAILABLE
    ServiceNotAvailable = 7,
    /// SSH_DISCONNECT_BY_APPLICATION
    ByApplication = 11,
}

impl DisconnectReason {
    /// Reason code sent to the peer when `err` ends the connection.
    pub fn for_error(err: &EmberError) -> Self {
        match err {
            EmberError::Authentication(_) => DisconnectReason::MacError,
            EmberError::KeyExchange(_) | EmberError::Security(_) => {
                DisconnectReason::KeyExchangeFailed
            }
            EmberError::Io(_) | EmberError::Config(_) => DisconnectReason::ByApplication,
            _ => DisconnectReason::ProtocolError,
        }
    }

    /// Wire value.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// SSH_MSG_DISCONNECT payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Raw reason code; peers may send codes outside [`DisconnectReason`].
    pub reason_code: u32,
    /// Human readable description.
    pub description: String,
}

impl Disconnect {
    /// Builds a disconnect with the given reason.
    pub fn new(reason: DisconnectReason, description: impl Into<String>) -> Self {
        Self {
            reason_code: reason.code(),
            description: description.into(),
        }
    }

    /// Serializes the payload (message type byte included).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13 + self.description.len());
        buf.push(MessageType::Disconnect as u8);
        put_u32(&mut buf, self.reason_code);
        put_string(&mut buf, self.description.as_bytes());
        // Language tag
        put_string(&mut buf, b"");
        buf
    }

    /// Parses a disconnect payload.
    pub fn from_bytes(payload: &[u8]) -> EmberResult<Self> {
        let mut reader = WireReader::new(payload);
        reader.expect_message(MessageType::Disconnect)?;
        let reason_code = reader.read_u32()?;
        let description = reader.read_utf8()?;
        // Some peers omit the language tag entirely.
        Ok(Self {
            reason_code,
            description,
        })
    }
}

/// Builds an SSH_MSG_UNIMPLEMENTED payload for the rejected packet number.
pub fn unimplemented(seq: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.push(MessageType::Unimplemented as u8);
    put_u32(&mut buf, seq);
    buf
}
