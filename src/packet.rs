//! Packet buffers and queues (outside the frame codec).
//!
//! Three buffer roles never share storage:
//! - [`Packet`]: a payload sitting in the incoming or outgoing queue.
//! - [`OutgoingFrame`]: the single framed packet currently being written.
//! - [`RxBuffer`]: scratch space the next inbound read lands in.

use std::collections::VecDeque;
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::wire::{self, HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD_LEN};

/// An IPv4 datagram travelling through the tunnel.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    data: Bytes,
}

impl Packet {
    /// Wrap a payload. Fails if it cannot be described by a frame header.
    pub fn new(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(Error::TooLong("packet payload"));
        }
        Ok(Self { data })
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the packet, returning its payload.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet").field("len", &self.data.len()).finish()
    }
}

/// FIFO of packets between the tunnel and the tun device.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: VecDeque<Packet>,
}

impl PacketQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail.
    pub fn push(&mut self, pkt: Packet) {
        self.packets.push_back(pkt);
    }

    /// Take from the head.
    pub fn pop(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Remove and return every queued packet in order.
    pub fn drain(&mut self) -> impl Iterator<Item = Packet> + '_ {
        self.packets.drain(..)
    }
}

/// A packet stamped with its header, ready to be written verbatim.
///
/// Once built the bytes never change, so a blocked write is retried with
/// exactly the same data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    bytes: Bytes,
}

impl OutgoingFrame {
    /// Frame a queued packet with the canonical header.
    pub fn new(pkt: &Packet) -> Self {
        // Packet::new bounds the payload, so the length fits the header.
        let payload_len = pkt.len() as u16;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + pkt.len());
        buf.extend_from_slice(&wire::encode_header(payload_len));
        buf.extend_from_slice(pkt.payload());
        Self { bytes: buf.freeze() }
    }

    /// Header plus payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total bytes on the wire.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Payload length, excluding the header.
    pub fn payload_len(&self) -> usize {
        self.bytes.len() - HEADER_LEN
    }
}

/// Reusable scratch buffer for inbound reads.
#[derive(Debug)]
pub struct RxBuffer {
    buf: BytesMut,
}

impl RxBuffer {
    /// Allocate a buffer large enough for the biggest frame.
    pub fn new() -> Self {
        let mut buf = BytesMut::with_capacity(MAX_FRAME_LEN);
        buf.resize(MAX_FRAME_LEN, 0);
        Self { buf }
    }

    /// Space for the next read.
    pub fn read_space(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }

    /// The first `len` bytes of the last read.
    pub fn filled(&self, len: usize) -> &[u8] {
        &self.buf[..len]
    }

    /// Detach `len` bytes starting at `offset` as an owned payload and make
    /// the buffer whole again for the next read.
    pub fn take(&mut self, offset: usize, len: usize) -> Bytes {
        let mut frame = self.buf.split_to(offset + len);
        let payload = frame.split_off(offset).freeze();
        self.buf.resize(MAX_FRAME_LEN, 0);
        payload
    }
}

impl Default for RxBuffer {
    fn default() -> Self {
        Self::new()
    }
}
