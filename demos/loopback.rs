//! Run a tunnel against an in-process echo gateway.
//!
//! ```text
//! RUST_LOG=gpst=trace cargo run --example loopback [config.json]
//! ```

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use gpst::{Connection, InterestSet, Packet, TcpTunnelStream, TunnelConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).without_time())
        .try_init()
        .ok();

    let config = match std::env::args().nth(1) {
        Some(path) => TunnelConfig::from_file(path)?,
        None => TunnelConfig { dump_http_traffic: true, ..TunnelConfig::default() },
    };

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            if let Err(e) = echo_gateway(stream) {
                eprintln!("gateway: {e}");
            }
        }
    });

    let mut conn = Connection::new(
        "USER=demo user; AUTH=0123456789abcdef; IP=10.9.8.7; MTU=1400",
        TcpTunnelStream::new(addr),
        InterestSet::new(),
        config,
    );
    let ip = conn.connect()?;
    println!("tunnel up: {} netmask {} mtu {}", ip.address, ip.netmask, ip.mtu);

    for i in 0..3u8 {
        conn.outgoing().push(Packet::new(vec![0x45, 0, 0, 20, i])?);
    }

    let mut received = 0;
    while received < 3 {
        let mut timeout = Duration::from_millis(20);
        if !conn.mainloop(&mut timeout)? {
            thread::sleep(timeout);
        }
        for pkt in conn.incoming().drain() {
            received += 1;
            println!("echo {received}: {pkt:?}");
        }
    }

    conn.close();
    Ok(())
}

/// Answer the GET-tunnel request, then reflect every frame back.
fn echo_gateway(mut stream: TcpStream) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut byte = [0u8; 1];
    while !request.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte)?;
        request.push(byte[0]);
    }
    stream.write_all(b"START_TUNNEL")?;

    loop {
        let mut hdr = [0u8; 16];
        stream.read_exact(&mut hdr)?;
        let len = u16::from_be_bytes([hdr[6], hdr[7]]) as usize;
        let mut frame = hdr.to_vec();
        frame.resize(16 + len, 0);
        stream.read_exact(&mut frame[16..])?;
        stream.write_all(&frame)?;
    }
}
