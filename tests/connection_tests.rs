//! Connection life cycle: data plane, quit reasons and reconnect.

mod common;

use std::io;
use std::time::Duration;

use common::{frame, MockStream, FD};
use gpst::{
    Connection, ConnectionState, Error, InterestSet, NegotiationError, Packet, QuitReason,
    SessionAttributes, TunnelConfig,
};

const COOKIE: &str = "USER=alice; AUTH=tok123; IP=10.0.0.5; MTU=1400";
const GET: &str = "GET /ssl-tunnel-connect.sslvpn?user=alice&authcookie=tok123 HTTP/1.1\r\n\r\n";

fn quick_config(attempts: u32) -> TunnelConfig {
    TunnelConfig { reconnect_attempts: attempts, reconnect_interval_ms: 0, ..TunnelConfig::default() }
}

fn connected(stream: MockStream) -> Connection<MockStream> {
    let mut conn = Connection::new(COOKIE, stream, InterestSet::new(), quick_config(1));
    conn.connect().expect("connect");
    conn
}

#[test]
fn connect_records_interface_and_state() {
    let conn = connected(MockStream::accepting(1));
    assert_eq!(conn.state(), ConnectionState::DataActive);
    assert!(conn.ipv6_disabled());
    assert_eq!(conn.ip_info().unwrap().mtu, 1400);
    assert_eq!(conn.session().get("USER"), Some("alice"));
    assert!(conn.monitor().read);
}

#[test]
fn invalid_cookie_fails_connect() {
    let mut conn =
        Connection::new("USER=alice; garbage", MockStream::accepting(1), InterestSet::new(), quick_config(1));
    let err = conn.connect().unwrap_err();
    assert!(matches!(err, Error::Cookie(ref e) if e.entry == "garbage"));
    assert_eq!(conn.stream().opens, 0);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn rejected_connect_leaves_connection_disconnected() {
    let mut stream = MockStream::new();
    stream.responses.push_back(Ok(b"HTTP/1.1 401 Unauthorized".to_vec()));
    let mut conn = Connection::new(COOKIE, stream, InterestSet::new(), quick_config(1));

    let err = conn.connect().unwrap_err();
    assert!(matches!(err, Error::Negotiation(NegotiationError::GatewayRejected(_))));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(conn.ip_info().is_none());
}

#[test]
fn received_frames_are_queued_in_order() {
    let mut conn = connected(MockStream::accepting(1));
    for p in [&b"P1"[..], b"P2-longer", b""] {
        conn.stream_mut().frames_in.push_back(Ok(frame(p)));
    }

    let mut timeout = Duration::from_secs(10);
    assert!(conn.mainloop(&mut timeout).unwrap());
    let got: Vec<Vec<u8>> = conn.incoming().drain().map(|p| p.payload().to_vec()).collect();
    assert_eq!(got, vec![b"P1".to_vec(), b"P2-longer".to_vec(), Vec::new()]);
    assert!(conn.data_plane().last_rx().is_some());
    assert_eq!(timeout, Duration::from_secs(10));
}

#[test]
fn queued_packets_are_framed_and_sent() {
    let mut conn = connected(MockStream::accepting(1));
    conn.outgoing().push(Packet::new(vec![0x45, 0, 0, 20]).unwrap());

    assert!(conn.mainloop(&mut Duration::from_secs(1)).unwrap());
    let sent = &conn.stream().frames_out;
    assert_eq!(sent.len(), 1);
    assert_eq!(
        &sent[0][..16],
        &[0x1a, 0x2b, 0x3c, 0x4d, 0x08, 0x00, 0x00, 0x04, 1, 0, 0, 0, 0, 0, 0, 0]
    );
    assert_eq!(&sent[0][16..], &[0x45, 0, 0, 20]);
    assert!(conn.outgoing().is_empty());
}

#[test]
fn queued_packets_leave_in_fifo_order() {
    let mut conn = connected(MockStream::accepting(1));
    let payloads: [&[u8]; 3] = [b"P1", b"P2 is longer", b"P3"];
    for p in payloads {
        conn.outgoing().push(Packet::new(p).unwrap());
    }

    assert!(conn.mainloop(&mut Duration::from_secs(1)).unwrap());
    let sent = &conn.stream().frames_out;
    assert_eq!(sent.len(), 3);
    for (frame, payload) in sent.iter().zip(payloads) {
        let declared = u16::from_be_bytes([frame[6], frame[7]]) as usize;
        assert_eq!(declared, payload.len());
        assert_eq!(&frame[16..], payload);
    }
    assert!(conn.outgoing().is_empty());
    assert!(!conn.monitor().write);
}

#[test]
fn blocked_write_retries_the_same_frame() {
    let mut conn = connected(MockStream::accepting(1));
    conn.stream_mut().write_results.push_back(Err(io::Error::from(io::ErrorKind::WouldBlock)));
    conn.outgoing().push(Packet::new(&b"first"[..]).unwrap());
    conn.outgoing().push(Packet::new(&b"second"[..]).unwrap());

    assert!(!conn.mainloop(&mut Duration::from_secs(1)).unwrap());
    assert!(conn.monitor().write);
    assert_eq!(conn.monitor().fd, Some(FD));
    assert_eq!(conn.outgoing().len(), 1);
    assert!(conn.data_plane().current_outgoing().is_some());

    assert!(conn.mainloop(&mut Duration::from_secs(1)).unwrap());
    assert!(!conn.monitor().write);
    assert_eq!(conn.stream().frames_out, vec![frame(b"first"), frame(b"second")]);
}

#[test]
fn datagram_path_keeps_packets_queued() {
    let mut conn = connected(MockStream::accepting(1));
    conn.set_datagram_active(true);
    conn.outgoing().push(Packet::new(&b"udp"[..]).unwrap());

    assert!(!conn.mainloop(&mut Duration::from_secs(1)).unwrap());
    assert_eq!(conn.outgoing().len(), 1);

    conn.set_datagram_active(false);
    assert!(conn.mainloop(&mut Duration::from_secs(1)).unwrap());
    assert!(conn.outgoing().is_empty());
}

#[test]
fn short_packet_terminates_the_connection() {
    let mut conn = connected(MockStream::accepting(1));
    conn.stream_mut().frames_in.push_back(Ok(vec![0x1a, 0x2b, 0x3c]));

    let err = conn.mainloop(&mut Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, Error::ShortPacket(3)));
    assert_eq!(conn.quit_reason(), Some(QuitReason::ShortPacket));
    assert_eq!(conn.state(), ConnectionState::Terminated);
    assert_eq!(QuitReason::ShortPacket.to_string(), "Short packet received");

    let again = conn.mainloop(&mut Duration::from_secs(1)).unwrap_err();
    assert!(matches!(again, Error::Terminated(QuitReason::ShortPacket)));
}

#[test]
fn malformed_frame_terminates_the_connection() {
    let mut conn = connected(MockStream::accepting(1));
    let mut bad = frame(b"data");
    bad[0] = 0xff;
    conn.stream_mut().frames_in.push_back(Ok(bad));

    let err = conn.mainloop(&mut Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, Error::UnknownPacket(_)));
    assert_eq!(conn.quit_reason(), Some(QuitReason::UnknownPacket));
    assert!(conn.incoming().is_empty());
}

#[test]
fn partial_write_is_an_internal_error() {
    let mut conn = connected(MockStream::accepting(1));
    conn.stream_mut().write_results.push_back(Ok(3));
    conn.outgoing().push(Packet::new(&b"abcdef"[..]).unwrap());

    let err = conn.mainloop(&mut Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, Error::ShortWrite { expected: 22, written: 3 }));
    assert_eq!(conn.quit_reason(), Some(QuitReason::InternalError));
}

#[test]
fn read_error_reconnects_with_stored_session() {
    let session = SessionAttributes::parse(COOKIE).unwrap();
    let mut conn =
        Connection::with_session(session, MockStream::accepting(2), InterestSet::new(), quick_config(1));
    conn.connect().unwrap();
    conn.stream_mut().frames_in.push_back(Err(io::Error::from(io::ErrorKind::ConnectionReset)));

    let mut timeout = Duration::from_secs(30);
    assert!(conn.mainloop(&mut timeout).unwrap());
    assert_eq!(timeout, Duration::ZERO);
    assert_eq!(conn.stream().opens, 2);
    assert_eq!(conn.stream().requests, vec![GET.to_string(), GET.to_string()]);
    assert_eq!(conn.state(), ConnectionState::DataActive);
    assert!(conn.quit_reason().is_none());
}

#[test]
fn pending_frame_survives_reconnect() {
    let mut conn = connected(MockStream::accepting(2));
    conn.stream_mut().write_results.push_back(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
    conn.outgoing().push(Packet::new(&b"keep me"[..]).unwrap());

    assert!(conn.mainloop(&mut Duration::from_secs(1)).unwrap());
    assert_eq!(conn.stream().opens, 2);
    assert!(conn.data_plane().current_outgoing().is_some());

    assert!(conn.mainloop(&mut Duration::from_secs(1)).unwrap());
    assert_eq!(conn.stream().frames_out, vec![frame(b"keep me")]);
}

#[test]
fn closed_stream_is_reopened_by_mainloop() {
    let mut conn = connected(MockStream::accepting(2));
    conn.close();
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    let mut timeout = Duration::from_secs(5);
    assert!(conn.mainloop(&mut timeout).unwrap());
    assert_eq!(timeout, Duration::ZERO);
    assert!(conn.stream().open);
}

#[test]
fn close_withdraws_descriptor_interest() {
    let mut conn = connected(MockStream::accepting(1));
    assert_eq!(conn.monitor().fd, Some(FD));
    assert!(conn.monitor().read && conn.monitor().except);

    conn.close();
    assert_eq!(*conn.monitor(), InterestSet::new());
    assert!(!conn.stream().open);
}

#[test]
fn failed_reconnect_records_quit_reason() {
    let mut stream = MockStream::accepting(1);
    stream.responses.push_back(Ok(b"HTTP/1.1 503 Service Unavailable".to_vec()));
    stream.responses.push_back(Ok(b"HTTP/1.1 503 Service Unavailable".to_vec()));
    let mut conn = Connection::new(COOKIE, stream, InterestSet::new(), quick_config(2));
    conn.connect().unwrap();
    conn.stream_mut().frames_in.push_back(Err(io::Error::from(io::ErrorKind::ConnectionReset)));

    let err = conn.mainloop(&mut Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, Error::ReconnectFailed(NegotiationError::GatewayRejected(_))));
    assert_eq!(conn.quit_reason(), Some(QuitReason::ReconnectFailed));
    assert_eq!(conn.quit_reason().unwrap().as_str(), "GPST reconnect failed");
    assert_eq!(conn.stream().opens, 3);
    assert_eq!(conn.state(), ConnectionState::Terminated);
}
