use anyhow::{Context, Result};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::UdpSocket;
use std::thread;

use crate::command::{Command, CommandSender};
use crate::config::InputMode;

/// UDP listener for inbound /posecam/... control messages. Producer-only:
/// it translates messages into Commands and enqueues them; it never touches
/// pipeline state directly and never blocks the controller.
pub struct ControlListener {
    port: u16,
    tx: CommandSender,
}

impl ControlListener {
    pub fn new(port: u16, tx: CommandSender) -> Self {
        Self { port, tx }
    }

    /// Bind the socket so port conflicts surface at startup. Port 0 picks an
    /// ephemeral port; `BoundControlListener::local_port` reports it.
    pub fn bind(self) -> Result<BoundControlListener> {
        let socket = UdpSocket::bind(("0.0.0.0", self.port))
            .with_context(|| format!("failed to bind control port {}", self.port))?;
        let port = socket.local_addr()?.port();
        log::info!("[listener] listening on port {port}");
        Ok(BoundControlListener {
            socket,
            tx: self.tx,
        })
    }
}

/// A listener whose socket is bound but whose receive loop has not started.
pub struct BoundControlListener {
    socket: UdpSocket,
    tx: CommandSender,
}

impl BoundControlListener {
    pub fn local_port(&self) -> u16 {
        self.socket
            .local_addr()
            .map(|a| a.port())
            .unwrap_or_default()
    }

    /// Run the blocking receive loop on its own thread.
    pub fn spawn(self) -> Result<thread::JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("osc-listener".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(self) {
        let mut buf = [0u8; 1536];
        loop {
            let size = match self.socket.recv_from(&mut buf) {
                Ok((size, _)) => size,
                Err(e) => {
                    log::warn!("[listener] receive failed: {e}");
                    continue;
                }
            };
            match rosc::decoder::decode_udp(&buf[..size]) {
                Ok((_, packet)) => self.handle_packet(packet),
                Err(e) => {
                    log::warn!("[listener] dropped undecodable packet: {e}");
                }
            }
        }
    }

    fn handle_packet(&self, packet: OscPacket) {
        match packet {
            OscPacket::Message(msg) => match command_for_message(&msg) {
                Ok(command) => {
                    log::debug!("[listener] {} -> {:?}", msg.addr, command);
                    if self.tx.send(command).is_err() {
                        log::warn!("[listener] controller gone, command dropped");
                    }
                }
                Err(reason) => {
                    log::warn!("[listener] dropped {}: {}", msg.addr, reason);
                }
            },
            OscPacket::Bundle(bundle) => {
                for inner in bundle.content {
                    self.handle_packet(inner);
                }
            }
        }
    }
}

/// Translate one control message into a Command. Unknown addresses and wrong
/// argument types are errors; callers drop the message and log.
pub fn command_for_message(msg: &OscMessage) -> Result<Command, String> {
    match msg.addr.as_str() {
        "/posecam/control/start" => Ok(Command::Start),
        "/posecam/control/stop" => Ok(Command::Stop),
        "/posecam/control/pause" => Ok(Command::Pause),
        "/posecam/input/select" => {
            let value = string_arg(msg)?;
            let mode = InputMode::parse(&value)
                .ok_or_else(|| format!("unknown input mode {value:?}"))?;
            Ok(Command::SelectInput(mode))
        }
        "/posecam/input/file" => Ok(Command::SetFile(string_arg(msg)?)),
        "/posecam/output/osc/ip" => {
            let value = string_arg(msg)?;
            value
                .parse::<std::net::IpAddr>()
                .map_err(|_| format!("invalid ip address {value:?}"))?;
            Ok(Command::SetOscIp(value))
        }
        "/posecam/output/osc/port" => {
            let value = int_arg(msg)?;
            let port =
                u16::try_from(value).map_err(|_| format!("port {value} out of range"))?;
            if port == 0 {
                return Err("port 0 is not usable".to_string());
            }
            Ok(Command::SetOscPort(port))
        }
        other => Err(format!("unknown address {other}")),
    }
}

fn string_arg(msg: &OscMessage) -> Result<String, String> {
    match msg.args.first() {
        Some(OscType::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("expected string argument, got {other:?}")),
        None => Err("missing argument".to_string()),
    }
}

fn int_arg(msg: &OscMessage) -> Result<i32, String> {
    match msg.args.first() {
        Some(OscType::Int(i)) => Ok(*i),
        Some(other) => Err(format!("expected int argument, got {other:?}")),
        None => Err("missing argument".to_string()),
    }
}
