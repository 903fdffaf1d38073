//! SSH data type encoding (RFC 4251 Section 5).
//!
//! - `string`: 4-byte big-endian length followed by the raw bytes
//! - `mpint`: a `string` holding a two's complement big-endian integer,
//!   with a leading `0x00` when the top bit of the first byte is set
//! - `name-list`: comma separated ASCII names encoded as a `string`

use super::message::MessageType;
use bytes::BufMut;
use ember_platform::{EmberError, EmberResult};

/// Appends a big-endian u32.
pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.put_u32(value);
}

/// Appends a length-prefixed string.
pub fn put_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

/// Appends a non-negative integer given as unsigned big-endian magnitude.
///
/// Leading zero bytes are stripped; zero encodes as an empty string.
pub fn put_mpint(buf: &mut Vec<u8>, magnitude: &[u8]) {
    let start = magnitude
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(magnitude.len());
    let trimmed = &magnitude[start..];

    let needs_pad = trimmed.first().map_or(false, |&b| b & 0x80 != 0);
    let len = trimmed.len() + usize::from(needs_pad);
    buf.put_u32(len as u32);
    if needs_pad {
        buf.put_u8(0);
    }
    buf.put_slice(trimmed);
}

/// Returns `magnitude` encoded as an mpint.
pub fn mpint(magnitude: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(magnitude.len() + 5);
    put_mpint(&mut buf, magnitude);
    buf
}

/// Appends a comma joined name-list.
pub fn put_name_list(buf: &mut Vec<u8>, names: &[&str]) {
    put_string(buf, names.join(",").as_bytes());
}

/// Bounds-checked cursor over an SSH payload.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> EmberResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(EmberError::Protocol(format!(
                "Truncated {}: need {} bytes, have {}",
                what,
                n,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> EmberResult<u8> {
        Ok(self.take(1, "byte")?[0])
    }

    /// Reads a boolean (any non-zero byte is true).
    pub fn read_bool(&mut self) -> EmberResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a big-endian u32.
    pub fn read_u32(&mut self) -> EmberResult<u32> {
        let b = self.take(4, "uint32")?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> EmberResult<&'a [u8]> {
        self.take(n, "field")
    }

    /// Reads a length-prefixed string.
    pub fn read_string(&mut self) -> EmberResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len, "string")
    }

    /// Reads a string that must be valid UTF-8.
    pub fn read_utf8(&mut self) -> EmberResult<String> {
        let raw = self.read_string()?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| EmberError::Protocol("String is not valid UTF-8".to_string()))
    }

    /// Reads a name-list.
    pub fn read_name_list(&mut self) -> EmberResult<Vec<String>> {
        let raw = self.read_string()?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        if !raw.is_ascii() {
            return Err(EmberError::Protocol(
                "Name-list contains non-ASCII bytes".to_string(),
            ));
        }
        let joined = String::from_utf8_lossy(raw);
        Ok(joined.split(',').map(String::from).collect())
    }

    /// Consumes the message type byte and checks it.
    pub fn expect_message(&mut self, expected: MessageType) -> EmberResult<()> {
        let byte = self.read_u8()?;
        if byte != expected as u8 {
            return Err(EmberError::Protocol(format!(
                "Expected {}, got message type {}",
                expected, byte
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_encoding() {
        let mut buf = Vec::new();
        put_string(&mut buf, b"ssh-userauth");
        assert_eq!(&buf[..4], &[0, 0, 0, 12]);
        assert_eq!(&buf[4..], b"ssh-userauth");

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_string().unwrap(), b"ssh-userauth");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_mpint_rfc4251_examples() {
        // Examples from RFC 4251 Section 5
        assert_eq!(mpint(&[]), vec![0, 0, 0, 0]);
        assert_eq!(mpint(&[0, 0, 0]), vec![0, 0, 0, 0]);
        assert_eq!(
            mpint(&[0x09, 0xa3, 0x78, 0xf9, 0xb2, 0xe3, 0x32, 0xa7]),
            vec![0, 0, 0, 8, 0x09, 0xa3, 0x78, 0xf9, 0xb2, 0xe3, 0x32, 0xa7]
        );
        assert_eq!(mpint(&[0x80]), vec![0, 0, 0, 2, 0x00, 0x80]);
    }

    #[test]
    fn test_mpint_strips_leading_zeros_before_padding() {
        assert_eq!(mpint(&[0x00, 0x00, 0x7f, 0x01]), vec![0, 0, 0, 2, 0x7f, 0x01]);
        assert_eq!(mpint(&[0x00, 0xff]), vec![0, 0, 0, 2, 0x00, 0xff]);
    }

    #[test]
    fn test_name_list() {
        let mut buf = Vec::new();
        put_name_list(&mut buf, &["curve25519-sha256", "ext-info-c"]);
        let mut reader = WireReader::new(&buf);
        assert_eq!(
            reader.read_name_list().unwrap(),
            vec!["curve25519-sha256".to_string(), "ext-info-c".to_string()]
        );

        let mut empty = Vec::new();
        put_name_list(&mut empty, &[]);
        assert!(WireReader::new(&empty).read_name_list().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_string_is_error() {
        let data = [0u8, 0, 0, 10, b'a', b'b'];
        let mut reader = WireReader::new(&data);
        assert!(matches!(
            reader.read_string(),
            Err(EmberError::Protocol(_))
        ));
    }

    #[test]
    fn test_huge_declared_string_is_error() {
        let data = [0xffu8, 0xff, 0xff, 0xff];
        assert!(WireReader::new(&data).read_string().is_err());
    }

    #[test]
    fn test_expect_message() {
        let data = [MessageType::NewKeys as u8];
        assert!(WireReader::new(&data)
            .expect_message(MessageType::NewKeys)
            .is_ok());
        assert!(WireReader::new(&data)
            .expect_message(MessageType::KexInit)
            .is_err());
    }
}
