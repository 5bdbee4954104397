//! Wire format for frames exchanged between nodes.
//!
//! Frame format: `[length:4][checksum:4][kind:1][payload:N]`
//!
//! - **length**: Total frame size including header (little-endian u32)
//! - **checksum**: CRC32C of (kind + payload)
//! - **kind**: [`FrameKind`] discriminant
//! - **payload**: `Hello` carries the sender's node id (little-endian u32),
//!   `Mail` carries a JSON-encoded [`RemoteMail`]

use orca_core::{NodeId, RemoteMail};
use serde::{de::DeserializeOwned, Serialize};

/// Header size: 4 (length) + 4 (checksum) + 1 (kind) = 9 bytes.
pub const HEADER_SIZE: usize = 9;

/// Maximum payload size (1MB).
///
/// Frames announcing a larger payload are rejected before buffering it.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

const HELLO_PAYLOAD_SIZE: usize = 4;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Payload exceeds maximum allowed size.
    #[error("frame too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    FrameTooLarge {
        /// Payload size in bytes.
        size: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// Kind byte is not a known [`FrameKind`].
    #[error("unknown frame kind: {kind}")]
    UnknownKind {
        /// The raw kind byte.
        kind: u8,
    },

    /// Hello frame with a payload that is not a node id.
    #[error("malformed hello: {len} payload bytes")]
    MalformedHello {
        /// Payload length found.
        len: usize,
    },

    /// Mail payload could not be encoded or decoded.
    #[error("mail codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        WireError::Codec(err.to_string())
    }
}

/// Frame discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Handshake frame announcing the sender's node id.
    Hello = 1,
    /// A mail.
    Mail = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(kind: u8) -> Result<Self, Self::Error> {
        match kind {
            1 => Ok(FrameKind::Hello),
            2 => Ok(FrameKind::Mail),
            kind => Err(WireError::UnknownKind { kind }),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Handshake announcing the peer's node id.
    Hello(NodeId),
    /// Raw mail payload, decoded with [`decode_mail`] by whoever knows `M`.
    Mail(Vec<u8>),
}

/// Fixed-size header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame size including header.
    pub length: u32,
    /// CRC32C checksum of (kind + payload).
    pub checksum: u32,
    /// Raw kind byte.
    pub kind: u8,
}

impl FrameHeader {
    /// Serialize header into buffer (must be at least HEADER_SIZE bytes).
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8] = self.kind;
    }

    /// Parse the header, or `None` if fewer than HEADER_SIZE bytes are available.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            checksum: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            kind: buf[8],
        })
    }
}

fn compute_checksum(kind: u8, payload: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(&[kind]), payload)
}

/// Build a frame of the given kind.
///
/// # Errors
///
/// Returns `FrameTooLarge` if payload exceeds MAX_PAYLOAD_SIZE.
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
        });
    }

    let total_length = HEADER_SIZE + payload.len();
    let mut data = vec![0u8; total_length];
    let header = FrameHeader {
        length: total_length as u32,
        checksum: compute_checksum(kind as u8, payload),
        kind: kind as u8,
    };
    header.serialize_into(&mut data[..HEADER_SIZE]);
    data[HEADER_SIZE..].copy_from_slice(payload);
    Ok(data)
}

/// Build the handshake frame announcing `node`.
pub fn encode_hello(node: NodeId) -> Vec<u8> {
    let payload = node.to_le_bytes();
    let mut data = vec![0u8; HEADER_SIZE + HELLO_PAYLOAD_SIZE];
    let header = FrameHeader {
        length: data.len() as u32,
        checksum: compute_checksum(FrameKind::Hello as u8, &payload),
        kind: FrameKind::Hello as u8,
    };
    header.serialize_into(&mut data[..HEADER_SIZE]);
    data[HEADER_SIZE..].copy_from_slice(&payload);
    data
}

/// Encode a mail frame.
///
/// # Errors
///
/// Returns `Codec` if the payload cannot be serialized, `FrameTooLarge` if
/// the encoded mail is over the size limit.
pub fn encode_mail<M: Serialize>(mail: &RemoteMail<M>) -> Result<Vec<u8>, WireError> {
    let payload = serde_json::to_vec(mail)?;
    encode_frame(FrameKind::Mail, &payload)
}

/// Decode the payload of a [`Frame::Mail`].
///
/// # Errors
///
/// Returns `Codec` if the payload is not a valid mail for `M`.
pub fn decode_mail<M: DeserializeOwned>(payload: &[u8]) -> Result<RemoteMail<M>, WireError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Try to decode one frame from a buffer that may hold partial data.
///
/// # Returns
///
/// - `Ok(Some((frame, consumed)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed
/// - `Err` if data is malformed; the stream cannot be resynchronized
pub fn try_decode_frame(data: &[u8]) -> Result<Option<(Frame, usize)>, WireError> {
    let Some(header) = FrameHeader::parse(data) else {
        return Ok(None);
    };

    if header.length < HEADER_SIZE as u32 {
        return Err(WireError::InvalidLength {
            length: header.length,
        });
    }
    let expected_len = header.length as usize;
    if expected_len - HEADER_SIZE > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge {
            size: expected_len - HEADER_SIZE,
        });
    }
    let kind = FrameKind::try_from(header.kind)?;

    if data.len() < expected_len {
        return Ok(None);
    }

    let payload = &data[HEADER_SIZE..expected_len];
    let computed = compute_checksum(header.kind, payload);
    if computed != header.checksum {
        return Err(WireError::ChecksumMismatch {
            expected: header.checksum,
            actual: computed,
        });
    }

    let frame = match kind {
        FrameKind::Hello => {
            let bytes: [u8; HELLO_PAYLOAD_SIZE] = payload
                .try_into()
                .map_err(|_| WireError::MalformedHello { len: payload.len() })?;
            Frame::Hello(NodeId::from_le_bytes(bytes))
        }
        FrameKind::Mail => Frame::Mail(payload.to_vec()),
    };
    Ok(Some((frame, expected_len)))
}
