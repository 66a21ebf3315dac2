//! Data-plane duty cycle.
//!
//! One cycle drains every frame the stream has ready, then pushes queued
//! packets out until the stream stops accepting data. Nothing here blocks or
//! reconnects; transport failures are reported to the caller as
//! [`CycleOutcome::NeedReconnect`].

use std::io;
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::error::{Error, Result};
use crate::monitor::FdMonitor;
use crate::packet::{OutgoingFrame, Packet, PacketQueue, RxBuffer};
use crate::stream::TunnelStream;
use crate::wire::{self, HEADER_LEN};

/// Result of one data-plane cycle that did not hit a fatal error.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The cycle finished; `true` if a packet was received or fully sent.
    Done(bool),
    /// The stream failed and must be re-established.
    NeedReconnect(io::Error),
}

enum RecvOutcome {
    Drained(bool),
    Failed(io::Error),
}

enum SendOutcome {
    Sent,
    WouldBlock,
    Failed(io::Error),
}

/// Buffers, queues and timestamps owned by the data plane.
#[derive(Debug, Default)]
pub struct DataPlane {
    rx: Option<RxBuffer>,
    current_tx: Option<OutgoingFrame>,
    incoming: PacketQueue,
    outgoing: PacketQueue,
    last_rx: Option<Instant>,
    last_tx: Option<Instant>,
    trace_packets: bool,
}

impl DataPlane {
    /// Empty data plane. With `trace_packets`, every frame is hex dumped.
    pub fn new(trace_packets: bool) -> Self {
        Self { trace_packets, ..Self::default() }
    }

    /// Packets received from the gateway, oldest first.
    pub fn incoming(&mut self) -> &mut PacketQueue {
        &mut self.incoming
    }

    /// Packets waiting to be sent, oldest first.
    pub fn outgoing(&mut self) -> &mut PacketQueue {
        &mut self.outgoing
    }

    /// The frame whose write is still pending, if any.
    pub fn current_outgoing(&self) -> Option<&OutgoingFrame> {
        self.current_tx.as_ref()
    }

    /// When the last valid frame arrived.
    pub fn last_rx(&self) -> Option<Instant> {
        self.last_rx
    }

    /// When a frame write was last attempted.
    pub fn last_tx(&self) -> Option<Instant> {
        self.last_tx
    }

    /// Drop the scratch buffer; a partial read never survives a reconnect.
    pub fn discard_rx(&mut self) {
        self.rx = None;
    }

    /// Run one cycle against `stream`.
    ///
    /// Queued packets are not dequeued while `datagram_active` is set. A frame
    /// already in flight is still retried.
    ///
    /// # Errors
    ///
    /// Fatal conditions only: a short read ([`Error::ShortPacket`]), a frame
    /// failing validation ([`Error::UnknownPacket`]) or a partial write
    /// ([`Error::ShortWrite`]).
    pub fn run<S, M>(
        &mut self,
        stream: &mut S,
        monitor: &mut M,
        datagram_active: bool,
    ) -> Result<CycleOutcome>
    where
        S: TunnelStream + ?Sized,
        M: FdMonitor + ?Sized,
    {
        let mut work_done = match self.receive(stream)? {
            RecvOutcome::Drained(work) => work,
            RecvOutcome::Failed(e) => return Ok(CycleOutcome::NeedReconnect(e)),
        };

        if self.current_tx.is_some() {
            match self.send_current(stream, monitor)? {
                SendOutcome::Sent => work_done = true,
                SendOutcome::WouldBlock => return Ok(CycleOutcome::Done(work_done)),
                SendOutcome::Failed(e) => return Ok(CycleOutcome::NeedReconnect(e)),
            }
        }

        while !datagram_active {
            let Some(pkt) = self.outgoing.pop() else { break };
            trace!("Sending data packet of {} bytes", pkt.len());
            self.current_tx = Some(OutgoingFrame::new(&pkt));

            match self.send_current(stream, monitor)? {
                SendOutcome::Sent => work_done = true,
                SendOutcome::WouldBlock => return Ok(CycleOutcome::Done(work_done)),
                SendOutcome::Failed(e) => return Ok(CycleOutcome::NeedReconnect(e)),
            }
        }

        // Nothing is blocked here; bytes the stream still buffers need writability.
        if let Some(fd) = stream.raw_fd() {
            if stream.has_pending_write() {
                monitor.monitor_write(fd);
            } else {
                monitor.unmonitor_write(fd);
            }
        }
        Ok(CycleOutcome::Done(work_done))
    }

    fn receive<S>(&mut self, stream: &mut S) -> Result<RecvOutcome>
    where
        S: TunnelStream + ?Sized,
    {
        let mut work_done = false;
        loop {
            let rx = self.rx.get_or_insert_with(RxBuffer::new);
            let len = match stream.read_nonblocking(rx.read_space()) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Packet receive error: {e}");
                    return Ok(RecvOutcome::Failed(e));
                }
            };

            if len < HEADER_LEN {
                error!("Short packet received ({len} bytes)");
                return Err(Error::ShortPacket(len));
            }

            let payload_len = match wire::decode_frame(rx.filled(len)) {
                Ok((hdr, _)) => hdr.payload_len as usize,
                Err(e) => {
                    let raw = rx.filled(len);
                    error!("{e}");
                    error!("Unknown packet {}", hex::encode(&raw[..HEADER_LEN]));
                    for line in wire::hexdump(raw).lines() {
                        debug!("{line}");
                    }
                    return Err(Error::UnknownPacket(e));
                }
            };

            self.last_rx = Some(Instant::now());
            trace!("Got data packet of {payload_len} bytes");
            if self.trace_packets {
                for line in wire::hexdump(rx.filled(len)).lines() {
                    trace!("{line}");
                }
            }

            let payload = rx.take(HEADER_LEN, payload_len);
            self.incoming.push(Packet::new(payload)?);
            work_done = true;
        }
        Ok(RecvOutcome::Drained(work_done))
    }

    fn send_current<S, M>(&mut self, stream: &mut S, monitor: &mut M) -> Result<SendOutcome>
    where
        S: TunnelStream + ?Sized,
        M: FdMonitor + ?Sized,
    {
        let Some(frame) = self.current_tx.as_ref() else {
            return Ok(SendOutcome::Sent);
        };
        let fd = stream.raw_fd();

        self.last_tx = Some(Instant::now());
        if let Some(fd) = fd {
            monitor.unmonitor_write(fd);
        }
        if self.trace_packets {
            trace!("Packet outgoing:");
            for line in wire::hexdump(frame.as_bytes()).lines() {
                trace!("{line}");
            }
        }

        let expected = frame.len();
        match stream.write_nonblocking(frame.as_bytes()) {
            Ok(n) if n == expected => {
                self.current_tx = None;
                Ok(SendOutcome::Sent)
            }
            Ok(0) => {
                if let Some(fd) = fd {
                    monitor.monitor_write(fd);
                }
                Ok(SendOutcome::WouldBlock)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if let Some(fd) = fd {
                    monitor.monitor_write(fd);
                }
                Ok(SendOutcome::WouldBlock)
            }
            Err(e) => {
                error!("Write error: {e}");
                Ok(SendOutcome::Failed(e))
            }
            Ok(written) => {
                error!("Stream wrote too few bytes! Asked for {expected}, sent {written}");
                Err(Error::ShortWrite { expected, written })
            }
        }
    }
}
