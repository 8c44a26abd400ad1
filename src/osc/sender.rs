use anyhow::{Context, Result};
use rosc::{encoder, OscMessage, OscPacket};
use std::net::UdpSocket;
use std::time::Duration;

/// Best-effort send timeout; a stalled socket must not hold up the loop.
const SEND_TIMEOUT: Duration = Duration::from_millis(50);

/// UDP client for the telemetry channel. Fire-and-forget: failures are
/// reported to the caller for counting, never retried.
pub struct TelemetrySender {
    socket: UdpSocket,
    target_addr: String,
}

impl TelemetrySender {
    pub fn new(target_addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind telemetry socket")?;
        socket.set_write_timeout(Some(SEND_TIMEOUT))?;
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target_addr
    }

    /// Encode and send one packet (message or bundle) as a single datagram.
    pub fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        let data = encoder::encode(packet)?;
        self.socket
            .send_to(&data, &self.target_addr)
            .with_context(|| format!("send to {} failed", self.target_addr))?;
        Ok(())
    }

    /// Send each message as its own datagram (legacy wire behavior).
    pub fn send_messages(&self, messages: &[OscMessage]) -> Result<()> {
        for msg in messages {
            self.send_packet(&OscPacket::Message(msg.clone()))?;
        }
        Ok(())
    }
}
