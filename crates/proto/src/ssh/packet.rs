//! SSH binary packet protocol (RFC 4253 Section 6).
//!
//! # Packet Format
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload (n1 = packet_length - padding_length - 1)
//! byte[n2]  random padding (n2 = padding_length)
//! byte[m]   mac (the Poly1305 tag once keys are active)
//! ```
//!
//! # Alignment
//!
//! Before NEWKEYS the whole packet, length field included, is a multiple of
//! 8 bytes. Under `chacha20-poly1305@openssh.com` the length field is
//! authenticated but not part of the cipher stream alignment, so
//! `1 + len(payload) + padding_length` is the value kept on an 8 byte
//! boundary. See [`Alignment`].
//!
//! # Reassembly
//!
//! [`PacketCodec`] buffers input across any number of reads. When a packet
//! is encrypted it decrypts the length prefix once, remembers it, and waits
//! for the rest of the ciphertext plus the tag before verifying anything.
//!
//! # Example
//!
//! ```rust
//! use ember_proto::ssh::packet::{PacketCodec, Parsed};
//!
//! let mut codec = PacketCodec::default();
//! let wire = codec.create(b"\x05hello", None).unwrap();
//!
//! codec.append(&wire[..3]);
//! assert!(matches!(codec.parse(None).unwrap(), Parsed::Partial { .. }));
//!
//! codec.append(&wire[3..]);
//! match codec.parse(None).unwrap() {
//!     Parsed::Complete(packet) => assert_eq!(packet.payload(), b"\x05hello"),
//!     Parsed::Partial { .. } => unreachable!(),
//! }
//! ```

use super::crypto::{PacketKey, BLOCK_SIZE, LENGTH_FIELD_LEN, TAG_LEN};
use bytes::{Buf, BufMut, BytesMut};
use ember_platform::{EmberError, EmberResult};
use rand::RngCore;

/// Default ceiling for `packet_length` (RFC 4253 Section 6.1).
pub const MAX_PACKET_SIZE: usize = 35000;

/// Minimum padding length in bytes.
pub const MIN_PADDING_LEN: usize = 4;

/// Maximum padding length in bytes (fits in u8).
pub const MAX_PADDING_LEN: usize = 255;

/// Block size used before any cipher is active.
pub const PLAIN_BLOCK_SIZE: usize = 8;

/// Which bytes must land on a block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// `4 + packet_length` is block aligned (unencrypted packets).
    IncludeLength,
    /// `packet_length` alone is block aligned (AEAD with the length as
    /// associated data).
    ExcludeLength,
}

/// Smallest padding of at least [`MIN_PADDING_LEN`] that aligns the packet.
pub fn padding_len(payload_len: usize, block_size: usize, alignment: Alignment) -> usize {
    let covered = match alignment {
        Alignment::IncludeLength => LENGTH_FIELD_LEN + 1 + payload_len,
        Alignment::ExcludeLength => 1 + payload_len,
    };
    let mut padding = block_size - covered % block_size;
    if padding < MIN_PADDING_LEN {
        padding += block_size;
    }
    padding
}

/// SSH binary packet.
///
/// # Invariants
///
/// - Padding length is between 4 and 255 bytes
/// - `to_bytes().len() == 4 + packet_length() + mac.len()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPacket {
    payload: Vec<u8>,
    padding: Vec<u8>,
    mac: Option<Vec<u8>>,
}

impl BinaryPacket {
    /// Creates an unencrypted packet padded to the 8 byte plaintext block.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ember_proto::ssh::packet::BinaryPacket;
    ///
    /// let packet = BinaryPacket::new(b"\x15".to_vec());
    /// assert_eq!(packet.to_bytes().len() % 8, 0);
    /// ```
    pub fn new(payload: Vec<u8>) -> Self {
        Self::aligned(payload, PLAIN_BLOCK_SIZE, Alignment::IncludeLength)
    }

    /// Creates a packet with random padding for the given block size.
    pub fn aligned(payload: Vec<u8>, block_size: usize, alignment: Alignment) -> Self {
        let mut padding = vec![0u8; padding_len(payload.len(), block_size, alignment)];
        rand::thread_rng().fill_bytes(&mut padding);
        Self {
            payload,
            padding,
            mac: None,
        }
    }

    /// Message payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the packet, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Padding bytes.
    pub fn padding(&self) -> &[u8] {
        &self.padding
    }

    /// `padding_length` field.
    pub fn padding_length(&self) -> u8 {
        self.padding.len() as u8
    }

    /// `packet_length` field (excludes itself and the MAC).
    pub fn packet_length(&self) -> u32 {
        (1 + self.payload.len() + self.padding.len()) as u32
    }

    /// MAC or AEAD tag, if present.
    pub fn mac(&self) -> Option<&[u8]> {
        self.mac.as_deref()
    }

    /// Sets the MAC for this packet.
    pub fn set_mac(&mut self, mac: Vec<u8>) {
        self.mac = Some(mac);
    }

    /// Serializes this packet to wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let packet_length = self.packet_length() as usize;
        let mut buf = BytesMut::with_capacity(
            LENGTH_FIELD_LEN + packet_length + self.mac.as_ref().map_or(0, |m| m.len()),
        );
        buf.put_u32(packet_length as u32);
        buf.put_u8(self.padding_length());
        buf.put_slice(&self.payload);
        buf.put_slice(&self.padding);
        if let Some(mac) = &self.mac {
            buf.put_slice(mac);
        }
        buf.to_vec()
    }

    /// Parses one complete plaintext frame whose last `mac_len` bytes are
    /// the MAC.
    ///
    /// # Errors
    ///
    /// [`EmberError::Framing`] when the declared lengths do not describe
    /// `data` exactly or the padding is out of range.
    pub fn from_bytes(data: &[u8], mac_len: usize) -> EmberResult<Self> {
        if data.len() < LENGTH_FIELD_LEN + 1 {
            return Err(EmberError::Framing(format!(
                "Packet too short: {} bytes (minimum 5)",
                data.len()
            )));
        }

        let mut buf = data;
        let packet_length = buf.get_u32() as usize;
        if buf.len() != packet_length + mac_len {
            return Err(EmberError::Framing(format!(
                "Declared packet_length {} with {} byte MAC does not match {} available bytes",
                packet_length,
                mac_len,
                buf.len()
            )));
        }

        let padding_length = buf.get_u8() as usize;
        if padding_length < MIN_PADDING_LEN {
            return Err(EmberError::Framing(format!(
                "Padding too short: {} bytes (minimum {})",
                padding_length, MIN_PADDING_LEN
            )));
        }
        if packet_length < 1 + padding_length {
            return Err(EmberError::Framing(format!(
                "packet_length ({}) too small for padding ({})",
                packet_length, padding_length
            )));
        }

        let payload_length = packet_length - 1 - padding_length;
        let payload = buf[..payload_length].to_vec();
        buf.advance(payload_length);
        let padding = buf[..padding_length].to_vec();
        buf.advance(padding_length);

        let mac = (!buf.is_empty()).then(|| buf.to_vec());

        Ok(Self {
            payload,
            padding,
            mac,
        })
    }
}

/// Keys and sequence number applied to one packet.
#[derive(Debug, Clone, Copy)]
pub struct Protection<'a> {
    /// Direction key
    pub key: &'a PacketKey,
    /// Sequence number of the packet being sealed or opened
    pub seq: u32,
}

/// Result of [`PacketCodec::parse`].
#[derive(Debug)]
pub enum Parsed {
    /// A full, verified packet.
    Complete(BinaryPacket),
    /// At least `needed` more bytes must arrive.
    Partial {
        /// Minimum number of additional bytes
        needed: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingHeader {
    packet_length: usize,
    protected: bool,
}

/// Frames outgoing payloads and reassembles incoming packets.
#[derive(Debug)]
pub struct PacketCodec {
    buffer: BytesMut,
    max_packet_size: usize,
    pending: Option<PendingHeader>,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(MAX_PACKET_SIZE)
    }
}

impl PacketCodec {
    /// Creates a codec rejecting `packet_length` above `max_packet_size`.
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_packet_size,
            pending: None,
        }
    }

    /// Largest accepted `packet_length`.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Adds received bytes to the reassembly buffer.
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes received but not yet consumed by a complete packet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops buffered input and any half-read header.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }

    /// Builds the wire form of `payload`.
    ///
    /// Without `protection` the packet is plaintext; with it the packet is
    /// encrypted and the tag appended.
    ///
    /// # Errors
    ///
    /// [`EmberError::ResourceExhaustion`] if the packet would exceed the
    /// configured maximum.
    pub fn create(
        &self,
        payload: &[u8],
        protection: Option<Protection<'_>>,
    ) -> EmberResult<Vec<u8>> {
        let packet = match protection {
            Some(_) => BinaryPacket::aligned(payload.to_vec(), BLOCK_SIZE, Alignment::ExcludeLength),
            None => BinaryPacket::new(payload.to_vec()),
        };

        let packet_length = packet.packet_length() as usize;
        if packet_length > self.max_packet_size {
            return Err(EmberError::ResourceExhaustion {
                declared: packet_length,
                limit: self.max_packet_size,
            });
        }

        let mut wire = packet.to_bytes();
        if let Some(Protection { key, seq }) = protection {
            let tag = key.seal(seq, &mut wire)?;
            wire.extend_from_slice(&tag);
        }
        Ok(wire)
    }

    fn check_length(&self, packet_length: usize, protected: bool) -> EmberResult<()> {
        if packet_length > self.max_packet_size {
            return Err(EmberError::ResourceExhaustion {
                declared: packet_length,
                limit: self.max_packet_size,
            });
        }
        if packet_length < 1 + MIN_PADDING_LEN {
            return Err(EmberError::Framing(format!(
                "packet_length {} below minimum {}",
                packet_length,
                1 + MIN_PADDING_LEN
            )));
        }
        let aligned = if protected {
            packet_length % BLOCK_SIZE == 0
        } else {
            (LENGTH_FIELD_LEN + packet_length) % PLAIN_BLOCK_SIZE == 0
        };
        if !aligned {
            return Err(EmberError::Framing(format!(
                "packet_length {} is not block aligned",
                packet_length
            )));
        }
        Ok(())
    }

    /// Tries to take one packet off the front of the buffer.
    ///
    /// `protection` must describe the packet at the front of the buffer:
    /// the caller passes the same sequence number until it gets
    /// [`Parsed::Complete`].
    ///
    /// # Errors
    ///
    /// - [`EmberError::ResourceExhaustion`] for an oversized length, raised
    ///   as soon as the 4 length bytes are in
    /// - [`EmberError::Framing`] for inconsistent lengths or padding
    /// - [`EmberError::Authentication`] when the tag does not verify
    pub fn parse(&mut self, protection: Option<Protection<'_>>) -> EmberResult<Parsed> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if self.buffer.len() < LENGTH_FIELD_LEN {
                    return Ok(Parsed::Partial {
                        needed: LENGTH_FIELD_LEN - self.buffer.len(),
                    });
                }
                let prefix = [self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]];
                let packet_length = match protection {
                    Some(Protection { key, seq }) => key.decrypt_length(seq, prefix),
                    None => u32::from_be_bytes(prefix),
                } as usize;

                let protected = protection.is_some();
                self.check_length(packet_length, protected)?;
                let header = PendingHeader {
                    packet_length,
                    protected,
                };
                self.pending = Some(header);
                header
            }
        };

        let mac_len = if header.protected { TAG_LEN } else { 0 };
        let total = LENGTH_FIELD_LEN + header.packet_length + mac_len;
        if self.buffer.len() < total {
            return Ok(Parsed::Partial {
                needed: total - self.buffer.len(),
            });
        }

        let mut frame = self.buffer.split_to(total);
        self.pending = None;

        if header.protected {
            let Some(Protection { key, seq }) = protection else {
                return Err(EmberError::Framing(
                    "Keys removed while an encrypted packet was pending".to_string(),
                ));
            };
            let (sealed, tag) = frame.split_at_mut(LENGTH_FIELD_LEN + header.packet_length);
            key.open(seq, sealed, tag)?;
        }

        BinaryPacket::from_bytes(&frame, mac_len).map(Parsed::Complete)
    }
}
