//! Identification line exchange (RFC 4253 Section 4.2).
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! The line is hashed verbatim (minus CR LF) into the exchange hash, so the
//! engine keeps the exact text it received next to the parsed [`Version`].
//!
//! # Example
//!
//! ```rust
//! use ember_proto::ssh::version::Version;
//!
//! let version = Version::new("EmberSSH_0.1.0", None);
//! assert_eq!(version.to_wire_format(), b"SSH-2.0-EmberSSH_0.1.0\r\n");
//!
//! let parsed = Version::parse("SSH-2.0-OpenSSH_9.6").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_9.6");
//! ```

use bytes::BytesMut;
use ember_platform::{EmberError, EmberResult};

/// Maximum identification line length, CR LF included.
pub const MAX_VERSION_LENGTH: usize = 255;

/// Software version token this crate announces by default.
pub const DEFAULT_SOFTWARE_VERSION: &str = "EmberSSH_0.1.0";

/// Parsed identification line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    proto_version: String,
    software_version: String,
    comments: Option<String>,
}

impl Version {
    /// Creates an SSH-2.0 identification.
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments.map(String::from),
        }
    }

    /// Parses an identification line (with or without its terminator).
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::Protocol`] if the line is too long, contains a
    /// NUL byte, lacks the `SSH-` prefix, or names a protocol other than
    /// `2.0` / `1.99`.
    pub fn parse(line: &str) -> EmberResult<Self> {
        let line = line.trim_end_matches('\n').trim_end_matches('\r');

        if line.len() + 2 > MAX_VERSION_LENGTH {
            return Err(EmberError::Protocol(format!(
                "Version string too long: {} bytes (max {})",
                line.len() + 2,
                MAX_VERSION_LENGTH
            )));
        }
        if line.contains('\0') {
            return Err(EmberError::Protocol(
                "Version string contains null byte".to_string(),
            ));
        }

        let rest = line.strip_prefix("SSH-").ok_or_else(|| {
            EmberError::Protocol(format!(
                "Invalid version string: must start with 'SSH-', got '{}'",
                line
            ))
        })?;

        let (proto_version, rest) = rest.split_once('-').ok_or_else(|| {
            EmberError::Protocol(format!("Invalid version string format: '{}'", line))
        })?;
        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(EmberError::Protocol(format!(
                "Unsupported protocol version: '{}' (expected '2.0' or '1.99')",
                proto_version
            )));
        }

        let (software, comments) = match rest.split_once(' ') {
            Some((software, comments)) => (software, Some(comments.trim().to_string())),
            None => (rest, None),
        };
        if software.is_empty() {
            return Err(EmberError::Protocol(
                "Version string has an empty software version".to_string(),
            ));
        }

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version: software.to_string(),
            comments,
        })
    }

    /// Protocol version (`"2.0"` or `"1.99"`).
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Software version token.
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// Line as sent on the wire, CR LF included.
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\r\n", self).into_bytes()
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(DEFAULT_SOFTWARE_VERSION, None)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSH-{}-{}", self.proto_version, self.software_version)?;
        if let Some(comments) = &self.comments {
            write!(f, " {}", comments)?;
        }
        Ok(())
    }
}

/// Removes one LF-terminated line from the front of `buf`.
///
/// Returns `Ok(None)` while the terminator has not arrived yet; whatever
/// follows the line stays in `buf`. The returned text has CR LF (or a bare
/// LF) stripped.
///
/// # Errors
///
/// [`EmberError::Protocol`] once more than [`MAX_VERSION_LENGTH`] bytes are
/// buffered without a terminator, or if the line is not UTF-8.
pub fn take_line(buf: &mut BytesMut) -> EmberResult<Option<String>> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() >= MAX_VERSION_LENGTH {
            return Err(EmberError::Protocol(format!(
                "No identification line terminator within {} bytes",
                MAX_VERSION_LENGTH
            )));
        }
        return Ok(None);
    };

    if newline + 1 > MAX_VERSION_LENGTH {
        return Err(EmberError::Protocol(format!(
            "Identification line too long: {} bytes (max {})",
            newline + 1,
            MAX_VERSION_LENGTH
        )));
    }

    let line = buf.split_to(newline + 1);
    let mut text = &line[..newline];
    if let Some(stripped) = text.strip_suffix(b"\r") {
        text = stripped;
    }
    let text = std::str::from_utf8(text)
        .map_err(|_| EmberError::Protocol("Identification line is not UTF-8".to_string()))?;
    Ok(Some(text.to_string()))
}
