//! Packet framing and XOR checksum.
//!
//! Frame layout: `0x55 0x55 | command | length | payload | checksum | 0xAA 0xAA`
//! where `checksum = command ^ length ^ payload[0] ^ ... ^ payload[n-1]`.

use crate::{NiimbotError, Result};

/// Start-of-frame marker.
pub const START_MARKER: [u8; 2] = [0x55, 0x55];

/// End-of-frame marker.
pub const END_MARKER: [u8; 2] = [0xaa, 0xaa];

/// Largest payload a single packet can carry (length is one byte).
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Bytes a frame adds around its payload.
const FRAME_OVERHEAD: usize = 7;

/// A single protocol message.
///
/// Only [`Packet::new`] and [`Packet::decode`] build one, so the payload
/// always fits the length byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    command: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Create a packet, rejecting payloads the length byte cannot express.
    pub fn new(command: u8, payload: impl Into<Vec<u8>>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(NiimbotError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { command, payload })
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize into a framed, checksummed byte buffer.
    pub fn encode(&self) -> Vec<u8> {
        // Private fields: every payload went through the MAX_PAYLOAD check.
        let len = self.payload.len() as u8;
        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + self.payload.len());
        buf.extend_from_slice(&START_MARKER);
        buf.push(self.command);
        buf.push(len);
        buf.extend_from_slice(&self.payload);
        buf.push(checksum(self.command, len, &self.payload));
        buf.extend_from_slice(&END_MARKER);
        buf
    }

    /// Parse one framed packet, validating both markers and the checksum.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FRAME_OVERHEAD {
            return Err(NiimbotError::Framing(format!(
                "frame too short: {} bytes",
                data.len()
            )));
        }
        if data[..2] != START_MARKER {
            return Err(NiimbotError::Framing(format!(
                "bad start marker {:02x}{:02x}",
                data[0], data[1]
            )));
        }

        let command = data[2];
        let len = data[3];
        let expected_len = FRAME_OVERHEAD + len as usize;
        if data.len() != expected_len {
            return Err(NiimbotError::Framing(format!(
                "length byte says {expected_len} bytes, frame has {}",
                data.len()
            )));
        }
        if data[expected_len - 2..] != END_MARKER {
            return Err(NiimbotError::Framing("bad end marker".into()));
        }

        let payload = &data[4..4 + len as usize];
        let actual = data[4 + len as usize];
        let expected = checksum(command, len, payload);
        if expected != actual {
            return Err(NiimbotError::Checksum { expected, actual });
        }

        Ok(Self {
            command,
            payload: payload.to_vec(),
        })
    }

    /// Interpret the payload as a big-endian unsigned integer.
    pub fn payload_as_uint(&self) -> u64 {
        self.payload
            .iter()
            .rev()
            .take(8)
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    }
}

/// XOR of command, length and every payload byte.
fn checksum(command: u8, len: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(command ^ len, |acc, &b| acc ^ b)
}
