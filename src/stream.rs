//! The stream the tunnel runs over.
//!
//! Encryption lives below this trait: production callers wrap their TLS
//! session in a [`TunnelStream`]. [`TcpTunnelStream`] carries the protocol over
//! plain TCP, which is enough for loopback gateways and tests.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::wire::{HEADER_LEN, MAGIC};

const START_TUNNEL: &[u8] = b"START_TUNNEL";
const READ_CHUNK: usize = 16 * 1024;

/// Bidirectional byte stream used by negotiation and the data plane.
///
/// The data plane relies on two contracts:
/// - one `read_nonblocking` call returns at most one whole frame;
/// - `write_nonblocking` either accepts the whole buffer or nothing.
pub trait TunnelStream {
    /// (Re-)establish the stream.
    fn open(&mut self) -> io::Result<()>;

    /// Tear the stream down. Closing a closed stream is a no-op.
    fn close(&mut self);

    /// Whether the stream is established.
    fn is_open(&self) -> bool;

    /// Blocking read, used once for the GET-tunnel response.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Blocking write of the whole buffer, used for the GET-tunnel request.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Read whatever is available. `Ok(0)` means nothing is available yet.
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write without waiting. `Ok(0)` means the stream cannot accept data yet.
    fn write_nonblocking(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Whether accepted data is still waiting to reach the transport.
    ///
    /// The data plane keeps write interest registered while this holds.
    fn has_pending_write(&self) -> bool {
        false
    }

    /// Descriptor to hand to the outer event loop, if there is one.
    fn raw_fd(&self) -> Option<RawFd>;
}

/// Plain TCP implementation of [`TunnelStream`].
///
/// TCP has no record boundaries, so inbound bytes are reassembled here and
/// handed out one frame at a time. A write the kernel only partly accepts
/// keeps its tail buffered; the tail is flushed before anything else is
/// written.
#[derive(Debug)]
pub struct TcpTunnelStream {
    addr: SocketAddr,
    connect_timeout: Option<Duration>,
    stream: Option<TcpStream>,
    nonblocking: bool,
    rx: BytesMut,
    tx_tail: BytesMut,
}

impl TcpTunnelStream {
    /// A stream that will connect to `addr` when opened.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: None,
            stream: None,
            nonblocking: false,
            rx: BytesMut::new(),
            tx_tail: BytesMut::new(),
        }
    }

    /// Bound the time `open` may spend connecting.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    fn stream(&mut self, nonblocking: bool) -> io::Result<&mut TcpStream> {
        socket(&mut self.stream, &mut self.nonblocking, nonblocking)
    }

    /// Size of the first buffered frame, once enough bytes are in to tell.
    ///
    /// A header with a bad magic is handed out as is, so the data plane can
    /// reject it instead of waiting for a length that means nothing.
    fn buffered_frame_len(&self) -> Option<usize> {
        if self.rx.len() < HEADER_LEN {
            return None;
        }
        let magic = u32::from_be_bytes([self.rx[0], self.rx[1], self.rx[2], self.rx[3]]);
        if magic != MAGIC {
            return Some(self.rx.len());
        }
        let payload_len = u16::from_be_bytes([self.rx[6], self.rx[7]]) as usize;
        let frame_len = HEADER_LEN + payload_len;
        (self.rx.len() >= frame_len).then_some(frame_len)
    }

    /// Push out the buffered tail of an earlier write. `Ok(true)` once empty.
    fn flush_tail(&mut self) -> io::Result<bool> {
        while !self.tx_tail.is_empty() {
            let stream = socket(&mut self.stream, &mut self.nonblocking, true)?;
            match stream.write(&self.tx_tail) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.tx_tail.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

/// The open socket, switched to the requested blocking mode.
fn socket<'a>(
    stream: &'a mut Option<TcpStream>,
    current: &mut bool,
    nonblocking: bool,
) -> io::Result<&'a mut TcpStream> {
    let stream = stream
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "stream is not open"))?;
    if *current != nonblocking {
        stream.set_nonblocking(nonblocking)?;
        *current = nonblocking;
    }
    Ok(stream)
}

impl TunnelStream for TcpTunnelStream {
    fn open(&mut self) -> io::Result<()> {
        self.close();
        let stream = match self.connect_timeout {
            Some(to) => TcpStream::connect_timeout(&self.addr, to)?,
            None => TcpStream::connect(self.addr)?,
        };
        stream.set_nodelay(true)?;
        debug!(addr = %self.addr, "tcp stream connected");
        self.stream = Some(stream);
        self.nonblocking = false;
        Ok(())
    }

    fn close(&mut self) {
        self.rx.clear();
        self.tx_tail.clear();
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(addr = %self.addr, "tcp stream closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream(false)?.read(buf)?;
        // Frames sent right behind START_TUNNEL belong to the data plane.
        if n > START_TUNNEL.len() && buf.starts_with(START_TUNNEL) {
            self.rx.extend_from_slice(&buf[START_TUNNEL.len()..n]);
            return Ok(START_TUNNEL.len());
        }
        Ok(n)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream(false)?.write_all(buf)
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.flush_tail()?;

        let mut chunk = [0u8; READ_CHUNK];
        let frame_len = loop {
            if let Some(len) = self.buffered_frame_len() {
                break len;
            }
            match self.stream(true)?.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed by peer"))
                }
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => return Err(e),
            }
        };

        let len = frame_len.min(buf.len());
        buf[..len].copy_from_slice(&self.rx[..len]);
        self.rx.advance(len);
        trace!(len, buffered = self.rx.len(), "frame reassembled");
        Ok(len)
    }

    fn write_nonblocking(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.flush_tail()? {
            return Ok(0);
        }
        match self.stream(true)?.write(buf) {
            Ok(0) if !buf.is_empty() => Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                if n < buf.len() {
                    trace!(written = n, total = buf.len(), "keeping unsent tail");
                    self.tx_tail.extend_from_slice(&buf[n..]);
                }
                Ok(buf.len())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn has_pending_write(&self) -> bool {
        !self.tx_tail.is_empty()
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }
}
