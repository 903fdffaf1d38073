//! Server configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! listen_addr = "127.0.0.1:2222"
//! software_version = "EmberSSH_0.1.0"
//! idle_timeout_secs = 60
//! host_key_file = "/etc/ember/host_key.hex"
//! banner = "Authorised use only"
//! ```

use super::hostkey::Ed25519HostKey;
use super::packet::MAX_PACKET_SIZE;
use super::version::{Version, DEFAULT_SOFTWARE_VERSION};
use ember_platform::{EmberError, EmberResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest accepted `max_packet_size`.
pub const MIN_MAX_PACKET_SIZE: usize = 1024;

/// Largest accepted `max_packet_size`.
pub const MAX_MAX_PACKET_SIZE: usize = 256 * 1024;

/// SSH server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshServerConfig {
    /// TCP listen address
    pub listen_addr: String,
    /// Software version token of the identification line
    pub software_version: String,
    /// Optional comments token
    pub comments: Option<String>,
    /// Largest accepted `packet_length`
    pub max_packet_size: usize,
    /// Seconds without input before the connection is dropped; 0 disables
    pub idle_timeout_secs: u64,
    /// Bytes read per socket read
    pub read_buffer_size: usize,
    /// Hex encoded Ed25519 seed
    pub host_key_seed: Option<String>,
    /// File holding a hex encoded Ed25519 seed
    pub host_key_file: Option<PathBuf>,
    /// Text sent as USERAUTH_BANNER
    pub banner: Option<String>,
}

impl Default for SshServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:22".to_string(),
            software_version: DEFAULT_SOFTWARE_VERSION.to_string(),
            comments: None,
            max_packet_size: MAX_PACKET_SIZE,
            idle_timeout_secs: 300,
            read_buffer_size: 4096,
            host_key_seed: None,
            host_key_file: None,
            banner: None,
        }
    }
}

impl SshServerConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> EmberResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EmberError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> EmberResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EmberError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Checks field values.
    pub fn validate(&self) -> EmberResult<()> {
        self.socket_addr()?;

        let software = &self.software_version;
        if software.is_empty() {
            return Err(EmberError::Config(
                "software_version cannot be empty".into(),
            ));
        }
        if !software.bytes().all(|b| b.is_ascii_graphic()) || software.contains('-') {
            return Err(EmberError::Config(format!(
                "software_version '{}' must be printable ASCII without spaces or '-'",
                software
            )));
        }
        if let Some(comments) = &self.comments {
            if comments.bytes().any(|b| b.is_ascii_control()) {
                return Err(EmberError::Config(
                    "comments must not contain control characters".into(),
                ));
            }
        }
        // Rejects identification lines over the length limit
        Version::parse(&self.version().to_string())
            .map_err(|e| EmberError::Config(format!("Invalid identification line: {}", e)))?;

        if self.max_packet_size < MIN_MAX_PACKET_SIZE || self.max_packet_size > MAX_MAX_PACKET_SIZE
        {
            return Err(EmberError::Config(format!(
                "max_packet_size must be between {} and {}, got {}",
                MIN_MAX_PACKET_SIZE, MAX_MAX_PACKET_SIZE, self.max_packet_size
            )));
        }
        if self.read_buffer_size == 0 {
            return Err(EmberError::Config(
                "read_buffer_size must be greater than 0".into(),
            ));
        }
        if self.host_key_seed.is_some() && self.host_key_file.is_some() {
            return Err(EmberError::Config(
                "host_key_seed and host_key_file are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    /// Parsed listen address.
    pub fn socket_addr(&self) -> EmberResult<SocketAddr> {
        self.listen_addr.parse().map_err(|e| {
            EmberError::Config(format!("Invalid listen_addr '{}': {}", self.listen_addr, e))
        })
    }

    /// Local identification.
    pub fn version(&self) -> Version {
        Version::new(&self.software_version, self.comments.as_deref())
    }

    /// Idle timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Loads the configured host key, generating one when none is set.
    pub fn load_host_key(&self) -> EmberResult<Ed25519HostKey> {
        match (&self.host_key_seed, &self.host_key_file) {
            (Some(seed), None) => Ed25519HostKey::from_hex(seed),
            (None, Some(path)) => Ed25519HostKey::load(path),
            (None, None) => {
                tracing::warn!("No host key configured, generating an ephemeral one");
                Ok(Ed25519HostKey::generate())
            }
            (Some(_), Some(_)) => Err(EmberError::Config(
                "host_key_seed and host_key_file are mutually exclusive".into(),
            )),
        }
    }
}
