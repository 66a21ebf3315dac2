//! Error types for gpst.
use std::{fmt, io};

use thiserror::Error;

use crate::wire::HeaderField;

/// A convenient result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for connection setup and the data-plane mainloop.
#[derive(Debug, Error)]
pub enum Error {
    /// The session cookie could not be parsed.
    #[error(transparent)]
    Cookie(#[from] InvalidCookieError),
    /// Tunnel negotiation failed.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(String),
    /// Configuration JSON could not be decoded.
    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Too large packet/field.
    #[error("value too long: {0}")]
    TooLong(&'static str),
    /// A read returned fewer bytes than a frame header.
    #[error("short packet received ({0} bytes)")]
    ShortPacket(usize),
    /// A read did not carry a valid frame.
    #[error("unknown packet received: {0}")]
    UnknownPacket(#[source] FrameError),
    /// The stream accepted part of a frame, which the data plane cannot resume.
    #[error("stream wrote too few bytes: asked for {expected}, sent {written}")]
    ShortWrite {
        /// Size of the whole frame.
        expected: usize,
        /// Bytes the stream reported as written.
        written: usize,
    },
    /// Every reconnect attempt failed.
    #[error("reconnect failed: {0}")]
    ReconnectFailed(#[source] NegotiationError),
    /// The connection already terminated; no further work is possible.
    #[error("connection terminated: {0}")]
    Terminated(QuitReason),
}

impl Error {
    /// The quit reason a fatal data-plane error records on the connection.
    pub fn quit_reason(&self) -> Option<QuitReason> {
        match self {
            Error::ShortPacket(_) => Some(QuitReason::ShortPacket),
            Error::UnknownPacket(_) => Some(QuitReason::UnknownPacket),
            Error::ShortWrite { .. } => Some(QuitReason::InternalError),
            Error::ReconnectFailed(_) => Some(QuitReason::ReconnectFailed),
            Error::Terminated(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Why a connection stopped for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    /// A read shorter than a frame header arrived.
    ShortPacket,
    /// A read failed header validation.
    UnknownPacket,
    /// The stream broke the full-or-nothing write contract.
    InternalError,
    /// The stream could not be re-established.
    ReconnectFailed,
}

impl QuitReason {
    /// Human readable reason, as reported to the user.
    pub fn as_str(self) -> &'static str {
        match self {
            QuitReason::ShortPacket => "Short packet received",
            QuitReason::UnknownPacket => "Unknown packet received",
            QuitReason::InternalError => "Internal error",
            QuitReason::ReconnectFailed => "GPST reconnect failed",
        }
    }
}

impl fmt::Display for QuitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cookie entry had no `=` separator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cookie '{entry}'")]
pub struct InvalidCookieError {
    /// The offending entry, as it appeared in the cookie.
    pub entry: String,
}

/// Failures of the GET-tunnel exchange.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// `USER` and/or `AUTH` are absent; new credentials are required.
    #[error("missing USER and/or AUTH cookie; cannot connect")]
    MissingCredentials,
    /// An attribute has a value that cannot be used.
    #[error("invalid {key} cookie value '{value}'")]
    InvalidAttribute {
        /// Attribute name.
        key: &'static str,
        /// Value found in the cookie.
        value: String,
    },
    /// Opening or writing to the stream failed.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] io::Error),
    /// The response read was interrupted; the caller should retry.
    #[error("GET-tunnel response read interrupted")]
    Interrupted,
    /// Reading the response failed.
    #[error("error fetching GET-tunnel response: {0}")]
    ReadFailure(#[source] io::Error),
    /// The gateway answered with an HTTP status instead of starting the tunnel.
    #[error("got HTTP error in response to GET-tunnel request: {0}")]
    GatewayRejected(String),
    /// The gateway closed the stream without answering.
    #[error("gateway disconnected immediately after GET-tunnel request")]
    GatewayClosedEarly,
    /// The gateway answered with something unrecognised.
    #[error("got inappropriate response to GET-tunnel request: {hex}")]
    UnexpectedResponse {
        /// Hex encoding of the raw response bytes.
        hex: String,
    },
}

impl NegotiationError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NegotiationError::Interrupted)
    }
}

/// A frame header violated the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than 16 bytes were available.
    #[error("frame truncated: {0} bytes")]
    Truncated(usize),
    /// Wrong magic value.
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),
    /// Ethertype other than IPv4.
    #[error("expected EtherType 0x0800 for IPv4, but got 0x{0:04x}")]
    BadEthertype(u16),
    /// Declared payload length does not match the bytes read.
    #[error("unexpected packet length: read {actual} bytes (includes 16 header bytes) but header has payload_len={declared}")]
    LengthMismatch {
        /// Payload length declared in the header.
        declared: u16,
        /// Total bytes of the frame as read.
        actual: usize,
    },
    /// The first reserved word was not 1.
    #[error("expected reserved word 1 at offset 8, got {0}")]
    BadReservedOne(u32),
    /// The second reserved word was not 0.
    #[error("expected reserved word 0 at offset 12, got {0}")]
    BadReservedZero(u32),
}

impl FrameError {
    /// The header field that failed validation.
    pub fn field(&self) -> HeaderField {
        match self {
            FrameError::Truncated(_) | FrameError::LengthMismatch { .. } => HeaderField::PayloadLen,
            FrameError::BadMagic(_) => HeaderField::Magic,
            FrameError::BadEthertype(_) => HeaderField::Ethertype,
            FrameError::BadReservedOne(_) => HeaderField::ReservedOne,
            FrameError::BadReservedZero(_) => HeaderField::ReservedZero,
        }
    }
}
