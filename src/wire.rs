//! Data frame codec (the 16-byte header wrapping every payload).
//!
//! Encoding summary:
//! - 0..4:   magic `0x1a2b3c4d`, 32-bit big-endian
//! - 4..6:   EtherType, 16-bit big-endian, always `0x0800` (IPv4)
//! - 6..8:   payload length, 16-bit big-endian, header excluded
//! - 8..12:  reserved, 32-bit little-endian, always 1
//! - 12..16: reserved, 32-bit little-endian, always 0
//!
//! The payload follows the header immediately. One frame travels in one stream
//! record, so a read returns exactly one frame or nothing.

use std::fmt;

use crate::error::FrameError;

/// Size of the frame header.
pub const HEADER_LEN: usize = 16;
/// Largest payload a header can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;
/// Largest frame on the wire (header plus 64 KiB of payload).
pub const MAX_FRAME_LEN: usize = HEADER_LEN + 64 * 1024;
/// Frame magic.
pub const MAGIC: u32 = 0x1a2b_3c4d;
/// IPv4 EtherType, the only one this protocol carries.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

const RESERVED_ONE: u32 = 1;
const RESERVED_ZERO: u32 = 0;

/// Header fields, used to attribute validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    /// Bytes 0..4.
    Magic,
    /// Bytes 4..6.
    Ethertype,
    /// Bytes 6..8.
    PayloadLen,
    /// Bytes 8..12.
    ReservedOne,
    /// Bytes 12..16.
    ReservedZero,
}

impl HeaderField {
    /// The field a header byte offset belongs to.
    pub fn at(offset: usize) -> Option<Self> {
        match offset {
            0..=3 => Some(HeaderField::Magic),
            4..=5 => Some(HeaderField::Ethertype),
            6..=7 => Some(HeaderField::PayloadLen),
            8..=11 => Some(HeaderField::ReservedOne),
            12..=15 => Some(HeaderField::ReservedZero),
            _ => None,
        }
    }
}

/// A validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Frame magic (always [`MAGIC`] once decoded).
    pub magic: u32,
    /// EtherType (always [`ETHERTYPE_IPV4`] once decoded).
    pub ethertype: u16,
    /// Length of the payload following the header.
    pub payload_len: u16,
    /// First reserved word (always 1).
    pub reserved_one: u32,
    /// Second reserved word (always 0).
    pub reserved_zero: u32,
}

impl PacketHeader {
    /// Total frame size described by this header.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload_len as usize
    }
}

/// Build the canonical header for a payload of `payload_len` bytes.
pub fn encode_header(payload_len: u16) -> [u8; HEADER_LEN] {
    let mut hdr = [0u8; HEADER_LEN];
    hdr[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    hdr[4..6].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    hdr[6..8].copy_from_slice(&payload_len.to_be_bytes());
    hdr[8..12].copy_from_slice(&RESERVED_ONE.to_le_bytes());
    hdr[12..16].copy_from_slice(&RESERVED_ZERO.to_le_bytes());
    hdr
}

/// Decode and validate a header on its own.
///
/// The payload length is returned as declared; use [`decode_frame`] to also
/// check it against the bytes actually read.
pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> Result<PacketHeader, FrameError> {
    check_header(bytes, None)
}

/// Decode and validate one frame as returned by a single stream read.
///
/// Checks run in wire order: magic, EtherType, length consistency, reserved
/// words. Returns the header and the payload slice.
pub fn decode_frame(frame: &[u8]) -> Result<(PacketHeader, &[u8]), FrameError> {
    let (hdr, payload) = split_header(frame)?;
    let header = check_header(hdr, Some(frame.len()))?;
    Ok((header, payload))
}

fn split_header(frame: &[u8]) -> Result<(&[u8; HEADER_LEN], &[u8]), FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::Truncated(frame.len()));
    }
    let (hdr, payload) = frame.split_at(HEADER_LEN);
    let hdr = hdr.try_into().map_err(|_| FrameError::Truncated(frame.len()))?;
    Ok((hdr, payload))
}

fn check_header(hdr: &[u8; HEADER_LEN], frame_len: Option<usize>) -> Result<PacketHeader, FrameError> {
    let magic = load_be32(hdr, 0);
    let ethertype = load_be16(hdr, 4);
    let payload_len = load_be16(hdr, 6);
    let reserved_one = load_le32(hdr, 8);
    let reserved_zero = load_le32(hdr, 12);

    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }
    if ethertype != ETHERTYPE_IPV4 {
        return Err(FrameError::BadEthertype(ethertype));
    }
    if let Some(actual) = frame_len {
        if actual != HEADER_LEN + payload_len as usize {
            return Err(FrameError::LengthMismatch { declared: payload_len, actual });
        }
    }
    if reserved_one != RESERVED_ONE {
        return Err(FrameError::BadReservedOne(reserved_one));
    }
    if reserved_zero != RESERVED_ZERO {
        return Err(FrameError::BadReservedZero(reserved_zero));
    }

    Ok(PacketHeader { magic, ethertype, payload_len, reserved_one, reserved_zero })
}

fn load_be16(hdr: &[u8; HEADER_LEN], at: usize) -> u16 {
    u16::from_be_bytes([hdr[at], hdr[at + 1]])
}

fn load_be32(hdr: &[u8; HEADER_LEN], at: usize) -> u32 {
    u32::from_be_bytes([hdr[at], hdr[at + 1], hdr[at + 2], hdr[at + 3]])
}

fn load_le32(hdr: &[u8; HEADER_LEN], at: usize) -> u32 {
    u32::from_le_bytes([hdr[at], hdr[at + 1], hdr[at + 2], hdr[at + 3]])
}

/// Offset-prefixed hex dump, 16 bytes per line, for the trace sink.
pub fn hexdump(bytes: &[u8]) -> HexDump<'_> {
    HexDump(bytes)
}

/// Lazily formatted output of [`hexdump`].
pub struct HexDump<'a>(&'a [u8]);

impl<'a> HexDump<'a> {
    /// The dump as individual lines.
    pub fn lines(&self) -> impl Iterator<Item = String> + 'a {
        self.0
            .chunks(16)
            .enumerate()
            .map(|(i, chunk)| format!("{:04x}: {}", i * 16, hex::encode(chunk)))
    }
}

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            f.write_str(&line)?;
        }
        Ok(())
    }
}
