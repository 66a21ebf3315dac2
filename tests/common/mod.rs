//! Scripted stream shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;

use gpst::{encode_header, TunnelStream};

pub const FD: RawFd = 42;

/// Replays scripted gateway behaviour and records everything the client sends.
#[derive(Debug, Default)]
pub struct MockStream {
    pub open: bool,
    pub opens: usize,
    pub closes: usize,
    /// Results of the blocking reads made during negotiation. Empty means EOF.
    pub responses: VecDeque<io::Result<Vec<u8>>>,
    /// Every GET-tunnel request written.
    pub requests: Vec<String>,
    /// Results of data-plane reads. Empty means nothing available.
    pub frames_in: VecDeque<io::Result<Vec<u8>>>,
    /// Results of data-plane writes. Empty means the whole frame is taken.
    pub write_results: VecDeque<io::Result<usize>>,
    /// Frames fully written by the data plane.
    pub frames_out: Vec<Vec<u8>>,
}

impl MockStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stream whose gateway answers `START_TUNNEL` `times` times.
    pub fn accepting(times: usize) -> Self {
        let mut stream = Self::new();
        for _ in 0..times {
            stream.responses.push_back(Ok(b"START_TUNNEL".to_vec()));
        }
        stream
    }
}

impl TunnelStream for MockStream {
    fn open(&mut self) -> io::Result<()> {
        self.opens += 1;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.closes += 1;
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.responses.pop_front() {
            Some(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.requests.push(String::from_utf8_lossy(buf).into_owned());
        Ok(())
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.frames_in.pop_front() {
            Some(Ok(data)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }

    fn write_nonblocking(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res = self.write_results.pop_front().unwrap_or(Ok(buf.len()));
        if matches!(res, Ok(n) if n == buf.len()) {
            self.frames_out.push(buf.to_vec());
        }
        res
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.open.then_some(FD)
    }
}

/// Header followed by `payload`.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = encode_header(payload.len() as u16).to_vec();
    out.extend_from_slice(payload);
    out
}
