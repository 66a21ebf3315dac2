//! File descriptor interest registration for the outer event loop.
//!
//! The tunnel never blocks. Instead it tells the driver which readiness
//! events on the stream should wake it up again.

use std::os::fd::RawFd;

/// Receives fd interest changes from the tunnel.
pub trait FdMonitor {
    /// Wake up when `fd` becomes readable.
    fn monitor_read(&mut self, fd: RawFd);
    /// Wake up when `fd` becomes writable.
    fn monitor_write(&mut self, fd: RawFd);
    /// Stop waking up on writability of `fd`.
    fn unmonitor_write(&mut self, fd: RawFd);
    /// Wake up on exceptional conditions on `fd`.
    fn monitor_except(&mut self, fd: RawFd);
    /// Drop every interest in `fd`; it is about to be closed.
    fn unmonitor(&mut self, fd: RawFd);
}

/// The interest currently registered for one descriptor.
///
/// A `poll`-based driver reads this after every mainloop call to build its
/// poll set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterestSet {
    /// Descriptor the interest applies to.
    pub fd: Option<RawFd>,
    /// Readable.
    pub read: bool,
    /// Writable.
    pub write: bool,
    /// Exceptional condition.
    pub except: bool,
}

impl InterestSet {
    /// No interest registered.
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&mut self, fd: RawFd) {
        if self.fd != Some(fd) {
            *self = InterestSet { fd: Some(fd), ..InterestSet::default() };
        }
    }
}

impl FdMonitor for InterestSet {
    fn monitor_read(&mut self, fd: RawFd) {
        self.track(fd);
        self.read = true;
    }

    fn monitor_write(&mut self, fd: RawFd) {
        self.track(fd);
        self.write = true;
    }

    fn unmonitor_write(&mut self, fd: RawFd) {
        if self.fd == Some(fd) {
            self.write = false;
        }
    }

    fn monitor_except(&mut self, fd: RawFd) {
        self.track(fd);
        self.except = true;
    }

    fn unmonitor(&mut self, fd: RawFd) {
        if self.fd == Some(fd) {
            *self = InterestSet::default();
        }
    }
}
