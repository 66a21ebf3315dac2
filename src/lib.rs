//! gpst: tunnel handshake and data-plane framing for GlobalProtect-style SSL VPNs.
//!
//! This crate implements the part of the client that runs after login:
//! the **GET-tunnel negotiation** that switches the gateway stream into tunnel
//! mode, the **16-byte frame codec** wrapping every IPv4 packet, and a
//! **non-blocking data-plane mainloop** that an outer event loop drives.
//!
//! ### Scope
//! The encrypted stream, login, tun device and route setup are left to the
//! caller. The stream is reached through [`TunnelStream`]; readiness
//! interest is reported through [`FdMonitor`]. A plain TCP stream
//! ([`TcpTunnelStream`]) is included for loopback gateways and tests.
//!
//! Only IPv4 over the stream is supported.
//!
//! See the `demos/` folder for usage.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod cookie;
pub mod error;
pub mod mainloop;
pub mod monitor;
pub mod negotiate;
pub mod packet;
pub mod stream;
pub mod wire;

// Re-export primary types
pub use crate::client::{Connection, ConnectionState};
pub use crate::config::TunnelConfig;
pub use crate::cookie::SessionAttributes;
pub use crate::error::{Error, FrameError, InvalidCookieError, NegotiationError, QuitReason};
pub use crate::monitor::{FdMonitor, InterestSet};
pub use crate::negotiate::{negotiate, InterfaceConfig};
pub use crate::packet::{Packet, PacketQueue};
pub use crate::stream::{TcpTunnelStream, TunnelStream};
pub use crate::wire::{decode_frame, decode_header, encode_header, PacketHeader};
