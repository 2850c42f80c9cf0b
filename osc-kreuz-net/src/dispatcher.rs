//! Inbound OSC dispatch: three UDP listeners, the path binding table, and
//! the settings control plane.
//!
//! UI and automation traffic share one binding table; which port a datagram
//! arrived on decides the `from_ui` flag. The settings port carries
//! subscriptions, the heartbeat, debug controls and the TWonder
//! registration message.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use rosc::{OscPacket, OscType};

use osc_kreuz_types::{
    all_coordinate_formats, build_osc_paths, OscPathType, SourceAttribute,
};

use crate::context::RouterContext;
use crate::receiver::{create_receiver, ReceiverConfig, ReceiverRegistry};
use crate::subscriptions::SubscriptionManager;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);
const RECV_BUF_SIZE: usize = 65536;

const TWONDER_CONNECT_PATH: &str = "/WONDER/stream/render/connect";
const PONG_PATH: &str = "/oscrouter/pong";
const PONG_GREETING: &str = "osc-kreuz";

/// What a bound path means. `source` is a 0-based pinned index for extended
/// paths, `None` when the source index travels as the first argument.
#[derive(Debug, Clone, PartialEq)]
enum Binding {
    Position {
        fmt: String,
        source: Option<usize>,
    },
    Attribute {
        attribute: SourceAttribute,
        source: Option<usize>,
    },
    /// `(source, renderer, gain)` all in the argument list.
    GainGeneric,
    GainForRenderer {
        render_idx: usize,
        source: Option<usize>,
    },
    /// `(source, send_idx, gain)` in the argument list.
    DirectSend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortKind {
    Ui,
    Data,
    Settings,
}

/// Actually bound listener ports (differs from the config when 0 was
/// requested).
#[derive(Debug, Clone, Copy)]
pub struct Ports {
    pub ui: u16,
    pub data: u16,
    pub settings: u16,
}

struct DispatcherInner {
    ctx: Arc<RouterContext>,
    registry: Arc<ReceiverRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    bindings: HashMap<String, Binding>,
}

/// The running listener set. Stops and joins its threads on [`Dispatcher::stop`]
/// or drop.
pub struct Dispatcher {
    stop: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    ports: Ports,
}

impl Dispatcher {
    pub fn start(
        ctx: Arc<RouterContext>,
        registry: Arc<ReceiverRegistry>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> io::Result<Dispatcher> {
        let bindings = build_bindings(&ctx);
        info!(
            target: "dispatch",
            "bound {} osc paths on ui/data ports", bindings.len()
        );

        let ip = ctx.settings.ip.clone();
        let ui_socket = bind_socket(&ip, ctx.settings.port_ui)?;
        let data_socket = bind_socket(&ip, ctx.settings.port_data)?;
        let settings_socket = bind_socket(&ip, ctx.settings.port_settings)?;

        let ports = Ports {
            ui: ui_socket.local_addr()?.port(),
            data: data_socket.local_addr()?.port(),
            settings: settings_socket.local_addr()?.port(),
        };
        subscriptions.set_settings_port(ports.settings);

        let inner = Arc::new(DispatcherInner {
            ctx,
            registry,
            subscriptions,
            bindings,
        });
        let stop = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::new();
        for (socket, kind, name) in [
            (ui_socket, PortKind::Ui, "osc-ui"),
            (data_socket, PortKind::Data, "osc-data"),
            (settings_socket, PortKind::Settings, "osc-settings"),
        ] {
            let inner = Arc::clone(&inner);
            let stop = Arc::clone(&stop);
            let handle = thread::Builder::new()
                .name(name.into())
                .spawn(move || listener_loop(inner, socket, kind, stop))?;
            handles.push(handle);
        }

        Ok(Dispatcher {
            stop,
            handles: Mutex::new(handles),
            ports,
        })
    }

    pub fn ports(&self) -> Ports {
        self.ports
    }

    /// Signal the listener threads and wait for them to wind down.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_socket(ip: &str, port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((ip, port))?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    Ok(socket)
}

fn listener_loop(
    inner: Arc<DispatcherInner>,
    socket: UdpSocket,
    kind: PortKind,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; RECV_BUF_SIZE];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => match rosc::decoder::decode_udp(&buf[..len]) {
                Ok((_, packet)) => inner.handle_packet(packet, peer, kind, &socket),
                Err(e) => warn!(target: "dispatch", "dropping undecodable packet from {}: {}", peer, e),
            },
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => {
                error!(target: "dispatch", "listener error: {}", e);
                break;
            }
        }
    }
}

// ── argument helpers ────────────────────────────────────────────

fn int_arg(args: &[OscType], idx: usize) -> Option<i64> {
    match args.get(idx)? {
        OscType::Int(v) => Some(*v as i64),
        OscType::Long(v) => Some(*v),
        _ => None,
    }
}

fn float_arg(args: &[OscType], idx: usize) -> Option<f64> {
    match args.get(idx)? {
        OscType::Float(v) => Some(*v as f64),
        OscType::Double(v) => Some(*v),
        OscType::Int(v) => Some(*v as f64),
        OscType::Long(v) => Some(*v as f64),
        _ => None,
    }
}

fn string_arg(args: &[OscType], idx: usize) -> Option<String> {
    match args.get(idx)? {
        OscType::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn port_is_valid(port: i64) -> bool {
    port > 1023 && port < 65535
}

fn settings_command(path: &str) -> Option<&str> {
    path.strip_prefix("/oscrouter/")
        .or_else(|| path.strip_prefix("/osckreuz/"))
}

impl DispatcherInner {
    fn handle_packet(
        &self,
        packet: OscPacket,
        peer: SocketAddr,
        kind: PortKind,
        socket: &UdpSocket,
    ) {
        match packet {
            OscPacket::Message(msg) => {
                if self.ctx.trace_incoming() {
                    debug!(
                        target: "osc_in",
                        "incoming OSC on {:?} port: {} {:?}", kind, msg.addr, msg.args
                    );
                }
                match kind {
                    PortKind::Ui => self.handle_routing(&msg, true),
                    PortKind::Data => self.handle_routing(&msg, false),
                    PortKind::Settings => self.handle_settings(&msg, peer, socket),
                }
            }
            OscPacket::Bundle(bundle) => {
                for inner_packet in bundle.content {
                    self.handle_packet(inner_packet, peer, kind, socket);
                }
            }
        }
    }

    /// 1-based wire index → 0-based array index, with range check.
    fn source_index(&self, raw: i64) -> Option<usize> {
        let idx = raw - 1;
        if idx >= 0 && (idx as usize) < self.ctx.settings.number_sources {
            Some(idx as usize)
        } else {
            warn!(target: "dispatch", "source index {} out of range", raw);
            None
        }
    }

    fn render_index(&self, raw: i64) -> Option<usize> {
        if raw >= 0 && (raw as usize) < self.ctx.settings.renderer_count() {
            Some(raw as usize)
        } else {
            warn!(target: "dispatch", "renderengine index {} out of range", raw);
            None
        }
    }

    fn direct_send_index(&self, raw: i64) -> Option<usize> {
        if raw >= 0 && (raw as usize) < self.ctx.settings.number_direct_sends {
            Some(raw as usize)
        } else {
            warn!(target: "dispatch", "direct send index {} out of range", raw);
            None
        }
    }

    // ── routed data plane (ui + data ports) ─────────────────────

    fn handle_routing(&self, msg: &rosc::OscMessage, from_ui: bool) {
        let Some(binding) = self.bindings.get(&msg.addr) else {
            return;
        };

        match binding.clone() {
            Binding::Position { fmt, source } => match source {
                Some(idx) => self.set_position(idx, &fmt, &msg.args, from_ui),
                None => {
                    let Some(raw) = int_arg(&msg.args, 0) else {
                        warn!(target: "dispatch", "source index is no integer on {}", msg.addr);
                        return;
                    };
                    let Some(idx) = self.source_index(raw) else {
                        return;
                    };
                    self.set_position(idx, &fmt, &msg.args[1..], from_ui);
                }
            },
            Binding::Attribute { attribute, source } => {
                let (idx, value_pos) = match source {
                    Some(idx) => (idx, 0),
                    None => {
                        let Some(raw) = int_arg(&msg.args, 0) else {
                            warn!(target: "dispatch", "source index is no integer on {}", msg.addr);
                            return;
                        };
                        match self.source_index(raw) {
                            Some(idx) => (idx, 1),
                            None => return,
                        }
                    }
                };
                let Some(value) = float_arg(&msg.args, value_pos) else {
                    warn!(target: "dispatch", "invalid attribute value on {}", msg.addr);
                    return;
                };
                self.set_attribute(idx, attribute, value, from_ui);
            }
            Binding::GainGeneric => {
                let (Some(raw_source), Some(raw_render)) =
                    (int_arg(&msg.args, 0), int_arg(&msg.args, 1))
                else {
                    warn!(target: "dispatch", "invalid indices on {}", msg.addr);
                    return;
                };
                let (Some(idx), Some(render_idx)) =
                    (self.source_index(raw_source), self.render_index(raw_render))
                else {
                    return;
                };
                self.set_gain(idx, render_idx, &msg.args, from_ui);
            }
            Binding::GainForRenderer { render_idx, source } => {
                let idx = match source {
                    Some(idx) => idx,
                    None => {
                        let Some(raw) = int_arg(&msg.args, 0) else {
                            warn!(target: "dispatch", "source index is no integer on {}", msg.addr);
                            return;
                        };
                        match self.source_index(raw) {
                            Some(idx) => idx,
                            None => return,
                        }
                    }
                };
                self.set_gain(idx, render_idx, &msg.args, from_ui);
            }
            Binding::DirectSend => {
                let (Some(raw_source), Some(raw_send)) =
                    (int_arg(&msg.args, 0), int_arg(&msg.args, 1))
                else {
                    warn!(target: "dispatch", "invalid indices on {}", msg.addr);
                    return;
                };
                let (Some(idx), Some(send_idx)) = (
                    self.source_index(raw_source),
                    self.direct_send_index(raw_send),
                ) else {
                    return;
                };
                self.set_direct_send(idx, send_idx, &msg.args, from_ui);
            }
        }
    }

    fn set_position(&self, idx: usize, fmt: &str, args: &[OscType], from_ui: bool) {
        let mut values = Vec::with_capacity(args.len());
        for i in 0..args.len() {
            match float_arg(args, i) {
                Some(v) => values.push(v),
                None => {
                    warn!(target: "dispatch", "invalid position argument for source {}", idx + 1);
                    return;
                }
            }
        }

        let changed = {
            let Ok(mut source) = self.ctx.sources[idx].lock() else {
                return;
            };
            match source.set_position(fmt, &values, from_ui) {
                Ok(changed) => changed,
                Err(e) => {
                    warn!(target: "dispatch", "rejecting position for source {}: {}", idx + 1, e);
                    return;
                }
            }
        };

        if changed {
            for receiver in self.registry.snapshot() {
                receiver.position_changed(idx);
            }
        }
    }

    /// The gain is always the last argument, whatever else the path pinned.
    fn set_gain(&self, idx: usize, render_idx: usize, args: &[OscType], from_ui: bool) {
        let Some(gain) = args
            .len()
            .checked_sub(1)
            .and_then(|last| float_arg(args, last))
        else {
            warn!(target: "dispatch", "invalid gain value for source {}", idx + 1);
            return;
        };

        let changed = {
            let Ok(mut source) = self.ctx.sources[idx].lock() else {
                return;
            };
            source.set_renderer_gain(render_idx, gain, from_ui)
        };

        if changed {
            for receiver in self.registry.snapshot() {
                receiver.gain_changed(idx, render_idx);
            }
        }
    }

    fn set_direct_send(&self, idx: usize, send_idx: usize, args: &[OscType], from_ui: bool) {
        let Some(gain) = args
            .len()
            .checked_sub(1)
            .and_then(|last| float_arg(args, last))
        else {
            warn!(target: "dispatch", "invalid direct send value for source {}", idx + 1);
            return;
        };

        let changed = {
            let Ok(mut source) = self.ctx.sources[idx].lock() else {
                return;
            };
            source.set_direct_send(send_idx, gain, from_ui)
        };

        if changed {
            for receiver in self.registry.snapshot() {
                receiver.direct_send_changed(idx, send_idx);
            }
        }
    }

    fn set_attribute(&self, idx: usize, attribute: SourceAttribute, value: f64, from_ui: bool) {
        let changed = {
            let Ok(mut source) = self.ctx.sources[idx].lock() else {
                return;
            };
            source.set_attribute(attribute, value, from_ui)
        };

        if changed {
            for receiver in self.registry.snapshot() {
                receiver.attribute_changed(idx, attribute);
            }
        }
    }

    // ── settings control plane ──────────────────────────────────

    fn handle_settings(&self, msg: &rosc::OscMessage, peer: SocketAddr, socket: &UdpSocket) {
        if msg.addr == TWONDER_CONNECT_PATH {
            self.twonder_connect(msg, peer);
            return;
        }

        let Some(command) = settings_command(&msg.addr) else {
            return;
        };

        match command {
            "subscribe" => self.subscribe(msg, peer),
            "unsubscribe" => match string_arg(&msg.args, 0) {
                Some(name) => self.subscriptions.unsubscribe(&name),
                None => warn!(target: "dispatch", "not enough arguments for unsubscribe"),
            },
            "ping" => self.reply_pong(msg, peer, socket),
            "pong" => match string_arg(&msg.args, 0) {
                Some(name) => self.subscriptions.pong_received(&name),
                None => {
                    if self.ctx.verbosity() > 0 {
                        info!(target: "dispatch", "pong without client name");
                    }
                }
            },
            "dump" => {
                for receiver in self.registry.snapshot() {
                    receiver.dump_source_positions();
                    receiver.dump_source_gains();
                }
            }
            "debug/osccopy" => self.configure_debug_tap(msg),
            "debug/verbose" => match int_arg(&msg.args, 0) {
                Some(level @ 0..=2) => self.ctx.set_verbosity(level as u8),
                _ => {
                    error!(target: "dispatch", "wrong verbosity argument");
                    self.ctx.set_verbosity(0);
                }
            },
            _ => {}
        }
    }

    fn subscribe(&self, msg: &rosc::OscMessage, peer: SocketAddr) {
        let (Some(name), Some(port)) = (string_arg(&msg.args, 0), int_arg(&msg.args, 1)) else {
            warn!(target: "dispatch", "not enough arguments for view client");
            return;
        };
        if !port_is_valid(port) {
            warn!(target: "dispatch", "port {} not legit", port);
            return;
        }
        let coord_fmt = string_arg(&msg.args, 2);
        let index_in_path = int_arg(&msg.args, 3).map(|v| v != 0).unwrap_or(false);
        let interval = int_arg(&msg.args, 4).and_then(|v| u64::try_from(v).ok());

        self.subscriptions.subscribe(
            &name,
            &peer.ip().to_string(),
            port as u16,
            coord_fmt.as_deref(),
            index_in_path,
            interval,
        );
    }

    /// Reply to an application-level ping on the port the sender asked for,
    /// at the sender's address.
    fn reply_pong(&self, msg: &rosc::OscMessage, peer: SocketAddr, socket: &UdpSocket) {
        let Some(port) = int_arg(&msg.args, 0).filter(|p| port_is_valid(*p)) else {
            warn!(target: "dispatch", "ping without valid reply port");
            return;
        };
        let reply = rosc::OscPacket::Message(rosc::OscMessage {
            addr: PONG_PATH.into(),
            args: vec![OscType::String(PONG_GREETING.into())],
        });
        match rosc::encoder::encode(&reply) {
            Ok(buf) => {
                let target = SocketAddr::new(peer.ip(), port as u16);
                if let Err(e) = socket.send_to(&buf, target) {
                    error!(target: "dispatch", "could not answer ping from {}: {}", target, e);
                }
            }
            Err(e) => error!(target: "dispatch", "could not encode pong: {}", e),
        }
    }

    fn configure_debug_tap(&self, msg: &rosc::OscMessage) {
        let parsed = match (string_arg(&msg.args, 0), int_arg(&msg.args, 1)) {
            (Some(host), Some(port)) => Some((host, port)),
            (Some(hostport), None) => hostport
                .split_once(':')
                .and_then(|(h, p)| p.parse::<i64>().ok().map(|p| (h.to_string(), p))),
            _ => None,
        };

        let Some((host, port)) = parsed else {
            info!(target: "dispatch", "debug client: invalid message format");
            self.ctx.debug.disable();
            return;
        };

        let host = if host == "localhost" {
            "127.0.0.1".to_string()
        } else {
            host
        };

        let (Ok(ip), true) = (host.parse::<IpAddr>(), port_is_valid(port)) else {
            info!(target: "dispatch", "debug client: invalid ip or port");
            self.ctx.debug.disable();
            return;
        };

        if let Err(e) = self.ctx.debug.enable(SocketAddr::new(ip, port as u16)) {
            error!(target: "dispatch", "could not enable debug tap: {}", e);
        }
    }

    /// TWonder renderers announce themselves with a stream connect; register
    /// the endpoint with the existing TWonder receiver or create one.
    fn twonder_connect(&self, msg: &rosc::OscMessage, peer: SocketAddr) {
        let (hostname, port) = match (string_arg(&msg.args, 0), int_arg(&msg.args, 1)) {
            (Some(host), Some(port)) if port_is_valid(port) => (host, port as u16),
            _ => (peer.ip().to_string(), peer.port()),
        };

        for receiver in self.registry.snapshot() {
            if receiver.stream_connect(&hostname, port) {
                return;
            }
        }

        if self.ctx.settings.room_polygon.is_empty() {
            warn!(
                target: "dispatch",
                "twonder at {}:{} wants to connect but no room_polygon is configured",
                hostname, port
            );
            return;
        }

        let cfg = ReceiverConfig {
            kind: "twonder".into(),
            hostname: Some(hostname.clone()),
            port: Some(port),
            ..ReceiverConfig::default()
        };
        match create_receiver(&self.ctx, &cfg) {
            Ok(receiver) => {
                let receiver = Arc::new(receiver);
                // the connect also carries the room greeting
                receiver.stream_connect(&hostname, port);
                self.registry.add(receiver);
                info!(
                    target: "dispatch",
                    "created twonder receiver for {}:{}", hostname, port
                );
            }
            Err(e) => error!(target: "dispatch", "could not create twonder receiver: {}", e),
        }
    }
}

/// Expand the whole path matrix into the exact-match binding table shared by
/// the UI and data listeners.
fn build_bindings(ctx: &RouterContext) -> HashMap<String, Binding> {
    let mut bindings = HashMap::new();
    let n = ctx.settings.number_sources;

    // positions, in every parseable coordinate format
    for fmt in all_coordinate_formats() {
        for path in build_osc_paths(OscPathType::Position, &fmt, None) {
            bindings.insert(
                path,
                Binding::Position {
                    fmt: fmt.clone(),
                    source: None,
                },
            );
        }
        for i in 1..=n {
            for path in build_osc_paths(OscPathType::Position, &fmt, Some(i)) {
                bindings.insert(
                    path,
                    Binding::Position {
                        fmt: fmt.clone(),
                        source: Some(i - 1),
                    },
                );
            }
        }
    }

    // source attributes
    for attribute in SourceAttribute::ALL {
        for path in build_osc_paths(OscPathType::Properties, attribute.as_str(), None) {
            bindings.insert(
                path,
                Binding::Attribute {
                    attribute,
                    source: None,
                },
            );
        }
        for i in 1..=n {
            for path in build_osc_paths(OscPathType::Properties, attribute.as_str(), Some(i)) {
                bindings.insert(
                    path,
                    Binding::Attribute {
                        attribute,
                        source: Some(i - 1),
                    },
                );
            }
        }
    }

    // fully generic gain paths
    for path in ["/source/send/spatial", "/send/gain", "/source/send"] {
        bindings.insert(path.to_string(), Binding::GainGeneric);
    }

    // per render unit, through the alias matrix
    for (render_idx, unit) in ctx.settings.render_units.iter().enumerate() {
        for path in build_osc_paths(OscPathType::Gain, unit, None) {
            bindings.insert(
                path,
                Binding::GainForRenderer {
                    render_idx,
                    source: None,
                },
            );
        }
        for i in 1..=n {
            for path in build_osc_paths(OscPathType::Gain, unit, Some(i)) {
                bindings.insert(
                    path,
                    Binding::GainForRenderer {
                        render_idx,
                        source: Some(i - 1),
                    },
                );
            }
        }
    }

    bindings.insert("/source/send/direct".to_string(), Binding::DirectSend);

    bindings
}
