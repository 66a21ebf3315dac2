//! A tunnel connection driven by an outer event loop.
//!
//! The caller owns the [`Connection`] and calls [`Connection::mainloop`]
//! whenever the stream descriptor is ready or the returned timeout expires.
//! The connection never spawns threads and only blocks while negotiating.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::TunnelConfig;
use crate::cookie::SessionAttributes;
use crate::error::{Error, NegotiationError, QuitReason, Result};
use crate::mainloop::{CycleOutcome, DataPlane};
use crate::monitor::{FdMonitor, InterestSet};
use crate::negotiate::{negotiate, InterfaceConfig};
use crate::packet::PacketQueue;
use crate::stream::TunnelStream;

/// Where a connection is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No stream is established.
    Disconnected,
    /// The GET-tunnel exchange is running.
    Negotiating,
    /// The stream carries data frames.
    DataActive,
    /// The stream is being re-established.
    Reconnecting,
    /// A quit reason was recorded; the connection is finished.
    Terminated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One tunnel connection: session, stream, fd interest and data plane.
pub struct Connection<S, M = InterestSet> {
    config: TunnelConfig,
    cookie: String,
    session: SessionAttributes,
    stream: S,
    monitor: M,
    ip_info: Option<InterfaceConfig>,
    state: ConnectionState,
    data: DataPlane,
    datagram_active: bool,
    ipv6_disabled: bool,
    quit_reason: Option<QuitReason>,
}

impl<S: TunnelStream, M: FdMonitor> Connection<S, M> {
    /// Create a connection for the session `cookie`.
    ///
    /// Nothing touches the stream until [`connect`](Self::connect) or the first
    /// [`mainloop`](Self::mainloop) call.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use gpst::{Connection, InterestSet, TcpTunnelStream, TunnelConfig};
    ///
    /// let stream = TcpTunnelStream::new("192.0.2.1:443".parse()?);
    /// let mut conn = Connection::new(
    ///     "USER=alice; AUTH=0123abcd",
    ///     stream,
    ///     InterestSet::new(),
    ///     TunnelConfig::default(),
    /// );
    /// let ip = conn.connect()?;
    /// println!("tunnel address {}", ip.address);
    ///
    /// let mut timeout = Duration::from_secs(10);
    /// while conn.mainloop(&mut timeout)? {}
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(cookie: impl Into<String>, stream: S, monitor: M, config: TunnelConfig) -> Self {
        Self {
            data: DataPlane::new(config.trace_packets),
            config,
            cookie: cookie.into(),
            session: SessionAttributes::new(),
            stream,
            monitor,
            ip_info: None,
            state: ConnectionState::Disconnected,
            datagram_active: false,
            ipv6_disabled: false,
            quit_reason: None,
        }
    }

    /// Create a connection from attributes that are already parsed.
    ///
    /// The cookie is never parsed while the attributes are populated.
    pub fn with_session(session: SessionAttributes, stream: S, monitor: M, config: TunnelConfig) -> Self {
        let mut conn = Self::new(String::new(), stream, monitor, config);
        conn.session = session;
        conn
    }

    /// Negotiate the tunnel and return the granted interface settings.
    ///
    /// # Errors
    ///
    /// [`Error::Cookie`] if the cookie is malformed, [`Error::Negotiation`]
    /// otherwise. The connection stays `Disconnected` on failure.
    pub fn connect(&mut self) -> Result<InterfaceConfig> {
        self.ensure_session()?;
        self.state = ConnectionState::Negotiating;
        // The protocol has no IPv6 support.
        self.ipv6_disabled = true;

        match negotiate(&self.session, &mut self.stream, &mut self.monitor, &self.config) {
            Ok(ip) => {
                self.ip_info = Some(ip);
                self.state = ConnectionState::DataActive;
                Ok(ip)
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e.into())
            }
        }
    }

    /// Run one data-plane cycle.
    ///
    /// Returns `Ok(true)` when work was done and the caller should call again
    /// without waiting for readiness. After a successful reconnect `timeout`
    /// is set to zero.
    ///
    /// # Errors
    ///
    /// Fatal errors record a [`QuitReason`] and move the connection to
    /// `Terminated`; every later call returns [`Error::Terminated`].
    pub fn mainloop(&mut self, timeout: &mut Duration) -> Result<bool> {
        if let Some(reason) = self.quit_reason {
            return Err(Error::Terminated(reason));
        }
        if !self.stream.is_open() {
            return self.reconnect_and_resume(timeout);
        }

        match self.data.run(&mut self.stream, &mut self.monitor, self.datagram_active) {
            Ok(CycleOutcome::Done(work_done)) => Ok(work_done),
            Ok(CycleOutcome::NeedReconnect(e)) => {
                warn!("stream failed, reconnecting: {e}");
                self.reconnect_and_resume(timeout)
            }
            Err(e) => Err(self.terminate(e)),
        }
    }

    /// Close the stream and negotiate again with the same session.
    ///
    /// Attempts follow the configured reconnect policy. The frame being sent
    /// when the stream failed is kept and retried verbatim.
    pub fn reconnect(&mut self) -> Result<()> {
        self.ensure_session()?;
        self.state = ConnectionState::Reconnecting;
        self.release_stream();

        let attempts = self.config.reconnect_attempts.max(1);
        let mut attempt = 1;
        let err = loop {
            info!(attempt, "reconnecting tunnel");
            match negotiate(&self.session, &mut self.stream, &mut self.monitor, &self.config) {
                Ok(ip) => {
                    if self.ip_info.is_some_and(|old| old != ip) {
                        warn!(address = %ip.address, mtu = ip.mtu, "tunnel configuration changed on reconnect");
                    }
                    self.ip_info = Some(ip);
                    self.state = ConnectionState::DataActive;
                    return Ok(());
                }
                Err(e) => {
                    let permanent = matches!(
                        e,
                        NegotiationError::MissingCredentials | NegotiationError::InvalidAttribute { .. }
                    );
                    if permanent || attempt >= attempts {
                        break e;
                    }
                    warn!(attempt, "reconnect attempt failed: {e}");
                    attempt += 1;
                    thread::sleep(self.config.reconnect_interval());
                }
            }
        };

        error!("Reconnect failed");
        self.state = ConnectionState::Disconnected;
        Err(Error::ReconnectFailed(err))
    }

    /// Close the stream without recording a quit reason.
    ///
    /// Interest in the old descriptor is withdrawn from the monitor.
    pub fn close(&mut self) {
        self.release_stream();
        if self.state != ConnectionState::Terminated {
            self.state = ConnectionState::Disconnected;
        }
    }

    /// Mark the datagram path as carrying traffic; queued packets then stay
    /// queued instead of going over the stream.
    pub fn set_datagram_active(&mut self, active: bool) {
        self.datagram_active = active;
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Why the connection terminated, if it did.
    pub fn quit_reason(&self) -> Option<QuitReason> {
        self.quit_reason
    }

    /// Interface settings from the last successful negotiation.
    pub fn ip_info(&self) -> Option<&InterfaceConfig> {
        self.ip_info.as_ref()
    }

    /// Whether IPv6 configuration was disabled for this connection.
    pub fn ipv6_disabled(&self) -> bool {
        self.ipv6_disabled
    }

    /// Session attributes in use.
    pub fn session(&self) -> &SessionAttributes {
        &self.session
    }

    /// Packets received from the gateway.
    pub fn incoming(&mut self) -> &mut PacketQueue {
        self.data.incoming()
    }

    /// Packets to send to the gateway.
    pub fn outgoing(&mut self) -> &mut PacketQueue {
        self.data.outgoing()
    }

    /// The data plane, for inspecting in-flight state and timestamps.
    pub fn data_plane(&self) -> &DataPlane {
        &self.data
    }

    /// The stream.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// The stream, mutably.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// The fd monitor.
    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    fn ensure_session(&mut self) -> Result<()> {
        if self.session.is_empty() {
            self.session.merge_cookie(&self.cookie).map_err(|e| {
                error!("Invalid cookie '{}'", e.entry);
                e
            })?;
        }
        Ok(())
    }

    fn release_stream(&mut self) {
        if let Some(fd) = self.stream.raw_fd() {
            self.monitor.unmonitor(fd);
        }
        self.stream.close();
        self.data.discard_rx();
    }

    fn reconnect_and_resume(&mut self, timeout: &mut Duration) -> Result<bool> {
        match self.reconnect() {
            Ok(()) => {
                *timeout = Duration::ZERO;
                Ok(true)
            }
            Err(e) => Err(self.terminate(e)),
        }
    }

    fn terminate(&mut self, err: Error) -> Error {
        if let Some(reason) = err.quit_reason() {
            error!(%reason, "connection terminated: {err}");
            self.quit_reason = Some(reason);
            self.state = ConnectionState::Terminated;
        }
        err
    }
}

impl<S, M> fmt::Debug for Connection<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("ip_info", &self.ip_info)
            .field("datagram_active", &self.datagram_active)
            .field("quit_reason", &self.quit_reason)
            .finish()
    }
}
