//! Boundary to the request layer above the transport (RFC 4253 Section 10).
//!
//! Once keys are active in both directions the session hands every
//! non-transport payload to a [`ServiceHandler`]. The included
//! [`DefaultServiceHandler`] accepts `ssh-userauth` and then declines every
//! authentication attempt: user authentication lives outside this crate.

use super::message::{Disconnect, DisconnectReason, MessageType};
use super::wire::{put_name_list, put_string, WireReader};
use bytes::BufMut;
use ember_platform::{EmberError, EmberResult};
use tracing::{debug, info};

/// The user authentication service name.
pub const USERAUTH_SERVICE: &str = "ssh-userauth";

/// SSH_MSG_SERVICE_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Requested service
    pub service_name: String,
}

impl ServiceRequest {
    /// Creates a request for `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Serializes the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.service_name.len());
        buf.put_u8(MessageType::ServiceRequest as u8);
        put_string(&mut buf, self.service_name.as_bytes());
        buf
    }

    /// Parses the payload.
    pub fn from_bytes(data: &[u8]) -> EmberResult<Self> {
        let mut reader = WireReader::new(data);
        reader.expect_message(MessageType::ServiceRequest)?;
        Ok(Self {
            service_name: reader.read_utf8()?,
        })
    }
}

/// SSH_MSG_SERVICE_ACCEPT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccept {
    /// Accepted service
    pub service_name: String,
}

impl ServiceAccept {
    /// Serializes the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.service_name.len());
        buf.put_u8(MessageType::ServiceAccept as u8);
        put_string(&mut buf, self.service_name.as_bytes());
        buf
    }

    /// Parses the payload.
    pub fn from_bytes(data: &[u8]) -> EmberResult<Self> {
        let mut reader = WireReader::new(data);
        reader.expect_message(MessageType::ServiceAccept)?;
        Ok(Self {
            service_name: reader.read_utf8()?,
        })
    }
}

/// SSH_MSG_USERAUTH_FAILURE (RFC 4252 Section 5.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    methods_can_continue: Vec<String>,
    partial_success: bool,
}

impl AuthFailure {
    /// Creates a failure listing the methods that may continue.
    pub fn new(methods: Vec<String>, partial_success: bool) -> Self {
        Self {
            methods_can_continue: methods,
            partial_success,
        }
    }

    /// Methods that can continue.
    pub fn methods_can_continue(&self) -> &[String] {
        &self.methods_can_continue
    }

    /// Partial success flag.
    pub fn partial_success(&self) -> bool {
        self.partial_success
    }

    /// Serializes the payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.put_u8(MessageType::UserauthFailure as u8);
        let names: Vec<&str> = self.methods_can_continue.iter().map(String::as_str).collect();
        put_name_list(&mut buf, &names);
        buf.put_u8(u8::from(self.partial_success));
        buf
    }

    /// Parses the payload.
    pub fn from_bytes(data: &[u8]) -> EmberResult<Self> {
        let mut reader = WireReader::new(data);
        reader.expect_message(MessageType::UserauthFailure)?;
        Ok(Self {
            methods_can_continue: reader.read_name_list()?,
            partial_success: reader.read_bool()?,
        })
    }
}

/// SSH_MSG_USERAUTH_BANNER (RFC 4252 Section 5.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBanner {
    message: String,
}

impl AuthBanner {
    /// Creates a banner message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Banner text.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Serializes the payload with an empty language tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9 + self.message.len());
        buf.put_u8(MessageType::UserauthBanner as u8);
        put_string(&mut buf, self.message.as_bytes());
        put_string(&mut buf, b"");
        buf
    }

    /// Parses the payload.
    pub fn from_bytes(data: &[u8]) -> EmberResult<Self> {
        let mut reader = WireReader::new(data);
        reader.expect_message(MessageType::UserauthBanner)?;
        Ok(Self {
            message: reader.read_utf8()?,
        })
    }
}

/// What the service layer wants done with one payload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// Payloads to send back, in order
    pub replies: Vec<Vec<u8>>,
    /// Set when the payload was a service request
    pub requested: Option<String>,
    /// Close the connection once `replies` are sent
    pub close: bool,
}

/// Receives post-handshake payloads.
pub trait ServiceHandler: Send {
    /// Handles one payload, message type byte included.
    ///
    /// Return [`EmberError::UnsupportedMessage`] for types the layer does
    /// not implement; the transport answers those with UNIMPLEMENTED.
    fn handle(&mut self, payload: &[u8]) -> EmberResult<ServiceResponse>;
}

/// Accepts `ssh-userauth` and rejects every authentication attempt.
#[derive(Debug, Default, Clone)]
pub struct DefaultServiceHandler {
    banner: Option<String>,
    banner_sent: bool,
    userauth_accepted: bool,
}

impl DefaultServiceHandler {
    /// Creates a handler sending `banner` before the first failure.
    pub fn new(banner: Option<String>) -> Self {
        Self {
            banner,
            banner_sent: false,
            userauth_accepted: false,
        }
    }

    fn on_service_request(&mut self, payload: &[u8]) -> EmberResult<ServiceResponse> {
        let request = ServiceRequest::from_bytes(payload)?;
        info!(service = %request.service_name, "Service requested");

        if request.service_name == USERAUTH_SERVICE {
            self.userauth_accepted = true;
            return Ok(ServiceResponse {
                replies: vec![ServiceAccept {
                    service_name: request.service_name.clone(),
                }
                .to_bytes()],
                requested: Some(request.service_name),
                close: false,
            });
        }

        let disconnect = Disconnect::new(
            DisconnectReason::ServiceNotAvailable,
            format!("Service '{}' not available", request.service_name),
        );
        Ok(ServiceResponse {
            replies: vec![disconnect.to_bytes()],
            requested: Some(request.service_name),
            close: true,
        })
    }

    fn on_userauth_request(&mut self) -> EmberResult<ServiceResponse> {
        if !self.userauth_accepted {
            return Err(EmberError::Protocol(
                "USERAUTH_REQUEST before ssh-userauth was accepted".to_string(),
            ));
        }

        let mut replies = Vec::with_capacity(2);
        if !self.banner_sent {
            if let Some(banner) = &self.banner {
                replies.push(AuthBanner::new(banner.as_str()).to_bytes());
                self.banner_sent = true;
            }
        }
        replies.push(AuthFailure::new(Vec::new(), false).to_bytes());
        debug!("Authentication declined");

        Ok(ServiceResponse {
            replies,
            ..ServiceResponse::default()
        })
    }
}

impl ServiceHandler for DefaultServiceHandler {
    fn handle(&mut self, payload: &[u8]) -> EmberResult<ServiceResponse> {
        let msg_type = payload
            .first()
            .copied()
            .ok_or_else(|| EmberError::Protocol("Empty payload".to_string()))?;

        match MessageType::from_u8(msg_type) {
            Some(MessageType::ServiceRequest) => self.on_service_request(payload),
            Some(MessageType::UserauthRequest) => self.on_userauth_request(),
            _ => Err(EmberError::UnsupportedMessage(msg_type)),
        }
    }
}
