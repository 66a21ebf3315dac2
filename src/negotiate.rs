//! GET-tunnel negotiation.
//!
//! After login the client asks the gateway to switch the stream into tunnel
//! mode:
//!
//! ```text
//! GET <tunnel_path>?user=<urlencoded user>&authcookie=<auth> HTTP/1.1\r\n\r\n
//! ```
//!
//! The gateway answers `START_TUNNEL` and from then on the stream carries
//! data frames only. Anything else is a refusal.

use std::io;
use std::net::Ipv4Addr;

use tracing::{debug, error, info, trace};

use crate::config::TunnelConfig;
use crate::cookie::{self, SessionAttributes};
use crate::error::NegotiationError;
use crate::monitor::FdMonitor;
use crate::stream::TunnelStream;
use crate::wire;

/// Tunnel path used when the cookie carries no `TUNNEL` entry.
pub const DEFAULT_TUNNEL_PATH: &str = "/ssl-tunnel-connect.sslvpn";
/// MTU used when the cookie carries no usable `MTU` entry.
pub const DEFAULT_MTU: u32 = 1500;
/// The tunnel is point-to-point.
pub const NETMASK: Ipv4Addr = Ipv4Addr::BROADCAST;

const RESPONSE_MAX: usize = 256;
const START_TUNNEL: &[u8] = b"START_TUNNEL";
const HTTP_PREFIX: &[u8] = b"HTTP/";

/// Interface settings granted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Tunnel address.
    pub address: Ipv4Addr,
    /// Always `255.255.255.255`.
    pub netmask: Ipv4Addr,
    /// Tunnel MTU.
    pub mtu: u32,
}

/// Session parameters with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TunnelParams<'a> {
    username: &'a str,
    authcookie: &'a str,
    tunnel_path: &'a str,
    address: Ipv4Addr,
    mtu: u32,
}

impl<'a> TunnelParams<'a> {
    fn from_session(session: &'a SessionAttributes) -> Result<Self, NegotiationError> {
        let (Some(username), Some(authcookie)) = (session.get(cookie::USER), session.get(cookie::AUTH))
        else {
            error!("Missing USER and/or AUTH cookie; cannot connect");
            return Err(NegotiationError::MissingCredentials);
        };

        let tunnel_path = session.get(cookie::TUNNEL).unwrap_or_else(|| {
            info!("Missing TUNNEL cookie; assuming {DEFAULT_TUNNEL_PATH}");
            DEFAULT_TUNNEL_PATH
        });

        let address = match session.get(cookie::IP) {
            Some(ip) => ip.parse().map_err(|_| NegotiationError::InvalidAttribute {
                key: cookie::IP,
                value: ip.to_string(),
            })?,
            None => {
                info!("Missing IP cookie; setting IP address to 0.0.0.0");
                Ipv4Addr::UNSPECIFIED
            }
        };

        let mtu = match session.get(cookie::MTU).map(parse_mtu) {
            Some(mtu) if mtu > 0 => u32::try_from(mtu).unwrap_or(u32::MAX),
            _ => {
                info!("Missing or zero MTU cookie; assuming {DEFAULT_MTU}");
                DEFAULT_MTU
            }
        };

        Ok(Self { username, authcookie, tunnel_path, address, mtu })
    }

    fn request(&self) -> String {
        format!(
            "GET {}?user={}&authcookie={} HTTP/1.1\r\n\r\n",
            self.tunnel_path,
            urlencode(self.username),
            self.authcookie
        )
    }
}

/// Leading decimal integer, 0 when there is none.
fn parse_mtu(value: &str) -> i64 {
    let value = value.trim_start();
    let (sign, digits) = match value.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, value.strip_prefix('+').unwrap_or(value)),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|n| sign * n).unwrap_or(0)
}

/// Percent-encode everything except ASCII alphanumerics and `-_.~`.
pub fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Run the GET-tunnel exchange on `stream`.
///
/// Credentials are checked before the stream is touched. On success the
/// stream's descriptor is registered with `monitor` for read and exceptional
/// events; on any failure after opening, the stream is closed again.
///
/// # Errors
///
/// See [`NegotiationError`]. Only [`NegotiationError::Interrupted`] is worth
/// retrying without new credentials.
pub fn negotiate<S, M>(
    session: &SessionAttributes,
    stream: &mut S,
    monitor: &mut M,
    config: &TunnelConfig,
) -> Result<InterfaceConfig, NegotiationError>
where
    S: TunnelStream + ?Sized,
    M: FdMonitor + ?Sized,
{
    let params = TunnelParams::from_session(session)?;

    stream.open().map_err(|e| {
        error!("Failed to open stream: {e}");
        NegotiationError::TransportFailure(e)
    })?;

    match exchange(&params, stream, config) {
        Ok(ip) => {
            match stream.raw_fd() {
                Some(fd) => {
                    monitor.monitor_read(fd);
                    monitor.monitor_except(fd);
                }
                None => debug!("stream has no descriptor to monitor"),
            }
            info!(address = %ip.address, mtu = ip.mtu, "tunnel started");
            Ok(ip)
        }
        Err(e) => {
            stream.close();
            Err(e)
        }
    }
}

fn exchange<S>(
    params: &TunnelParams<'_>,
    stream: &mut S,
    config: &TunnelConfig,
) -> Result<InterfaceConfig, NegotiationError>
where
    S: TunnelStream + ?Sized,
{
    let request = params.request();
    if config.dump_http_traffic {
        for line in request.lines() {
            trace!("> {line}");
        }
    }
    stream.write_all(request.as_bytes()).map_err(|e| {
        error!("Failed to send GET-tunnel request: {e}");
        NegotiationError::TransportFailure(e)
    })?;

    let mut buf = [0u8; RESPONSE_MAX];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(NegotiationError::Interrupted),
        Err(e) => {
            error!("Error fetching GET-tunnel HTTPS response: {e}");
            return Err(NegotiationError::ReadFailure(e));
        }
    };
    let response = &buf[..n];

    if response.starts_with(START_TUNNEL) {
        Ok(InterfaceConfig { address: params.address, netmask: NETMASK, mtu: params.mtu })
    } else if response.starts_with(HTTP_PREFIX) {
        let text = String::from_utf8_lossy(response).into_owned();
        error!("Got HTTP error in response to GET-tunnel request: {text}");
        Err(NegotiationError::GatewayRejected(text))
    } else if n == 0 {
        error!("Gateway disconnected immediately after GET-tunnel request");
        Err(NegotiationError::GatewayClosedEarly)
    } else {
        error!("Got inappropriate response to GET-tunnel request:");
        for line in wire::hexdump(response).lines() {
            trace!("{line}");
        }
        Err(NegotiationError::UnexpectedResponse { hex: hex::encode(response) })
    }
}
