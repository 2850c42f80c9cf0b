//! Shared helpers for the integration suites: a UDP probe that plays the
//! role of a downstream receiver or control client.

use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use rosc::{OscPacket, OscType};

pub struct OscProbe {
    socket: UdpSocket,
}

#[allow(dead_code)]
impl OscProbe {
    pub fn bind() -> OscProbe {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind probe socket");
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("set probe timeout");
        OscProbe { socket }
    }

    pub fn port(&self) -> u16 {
        self.socket.local_addr().expect("probe addr").port()
    }

    /// Send a message from this probe's socket, so replies based on the
    /// datagram's sender address come back here.
    pub fn send(&self, target: SocketAddr, path: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(rosc::OscMessage {
            addr: path.to_string(),
            args,
        });
        let buf = rosc::encoder::encode(&packet).expect("encode");
        self.socket.send_to(&buf, target).expect("send");
    }

    /// Wait for the next decodable message, up to `timeout`.
    pub fn recv(&self, timeout: Duration) -> Option<(String, Vec<OscType>)> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 65536];
        while Instant::now() < deadline {
            match self.socket.recv(&mut buf) {
                Ok(len) => {
                    if let Ok((_, OscPacket::Message(msg))) =
                        rosc::decoder::decode_udp(&buf[..len])
                    {
                        return Some((msg.addr, msg.args));
                    }
                }
                Err(_) => continue,
            }
        }
        None
    }

    /// Collect everything that arrives within the window.
    pub fn recv_all(&self, window: Duration) -> Vec<(String, Vec<OscType>)> {
        let deadline = Instant::now() + window;
        let mut msgs = Vec::new();
        let mut buf = [0u8; 65536];
        while Instant::now() < deadline {
            if let Ok(len) = self.socket.recv(&mut buf) {
                if let Ok((_, OscPacket::Message(msg))) = rosc::decoder::decode_udp(&buf[..len]) {
                    msgs.push((msg.addr, msg.args));
                }
            }
        }
        msgs
    }

    /// Wait for a message on a specific path, discarding everything else
    /// (heartbeat pings, replay traffic).
    pub fn recv_on(&self, path: &str, timeout: Duration) -> Option<Vec<OscType>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Some((addr, args)) = self.recv(remaining) {
                if addr == path {
                    return Some(args);
                }
            }
        }
        None
    }
}

pub fn float(value: &OscType) -> f32 {
    match value {
        OscType::Float(v) => *v,
        other => panic!("expected float, got {other:?}"),
    }
}
