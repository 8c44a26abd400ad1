//! Telemetry preflight receiver: bind a UDP port, decode incoming OSC and
//! print every message. Point the posecam telemetry output here to verify
//! what downstream clients will see.
//!
//! Usage: osc_monitor [port]   (default 5005)

use anyhow::{Context, Result};
use rosc::OscPacket;
use std::net::UdpSocket;

fn main() -> Result<()> {
    env_logger::init();

    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("invalid port argument")?,
        None => 5005,
    };

    let socket = UdpSocket::bind(("0.0.0.0", port))
        .with_context(|| format!("failed to bind port {port}"))?;
    println!("listening on port {port}...");

    let mut buf = [0u8; 8192];
    loop {
        let (size, peer) = socket.recv_from(&mut buf)?;
        match rosc::decoder::decode_udp(&buf[..size]) {
            Ok((_, packet)) => print_packet(&packet, 0),
            Err(e) => println!("undecodable packet from {peer}: {e}"),
        }
    }
}

fn print_packet(packet: &OscPacket, depth: usize) {
    let indent = "  ".repeat(depth);
    match packet {
        OscPacket::Message(msg) => {
            println!("{indent}{} {:?}", msg.addr, msg.args);
        }
        OscPacket::Bundle(bundle) => {
            println!("{indent}bundle ({} messages)", bundle.content.len());
            for inner in &bundle.content {
                print_packet(inner, depth + 1);
            }
        }
    }
}
