//! Shared router state: settings, the source array, the debug tap and the
//! runtime verbosity level. One explicit context, passed into every
//! component that needs it.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};

use osc_kreuz_types::{Source, SourceSettings};

use crate::updates::OscMessage;

/// Global configuration consumed by the routing core. Built by the binary
/// from the YAML file plus CLI overrides.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub number_sources: usize,
    pub number_direct_sends: usize,
    /// Renderer names in renderer-index order.
    pub render_units: Vec<String>,
    pub max_gain: f64,
    pub send_changes_only: bool,
    pub data_port_timeout: f64,
    pub min_dist: f64,
    pub coordinate_scaling_factor: f64,
    pub reflect_elevation: bool,
    pub ip: String,
    pub port_ui: u16,
    pub port_data: u16,
    pub port_settings: u16,
    pub room_name: String,
    pub room_polygon: Vec<[f64; 3]>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        RouterSettings {
            number_sources: 64,
            number_direct_sends: 32,
            render_units: vec!["ambi".into(), "wfs".into(), "reverb".into()],
            max_gain: 2.0,
            send_changes_only: true,
            data_port_timeout: 1.0,
            min_dist: 0.0,
            coordinate_scaling_factor: 1.0,
            reflect_elevation: false,
            ip: "0.0.0.0".into(),
            port_ui: 4455,
            port_data: 4007,
            port_settings: 4999,
            room_name: "default_room".into(),
            room_polygon: Vec::new(),
        }
    }
}

impl RouterSettings {
    pub fn renderer_count(&self) -> usize {
        self.render_units.len()
    }

    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            renderer_count: self.renderer_count(),
            direct_send_count: self.number_direct_sends,
            max_gain: self.max_gain,
            send_changes_only: self.send_changes_only,
            data_port_timeout: self.data_port_timeout,
            min_dist: self.min_dist,
            coordinate_scaling_factor: self.coordinate_scaling_factor,
            reflect_elevation: self.reflect_elevation,
        }
    }
}

/// Everything the listeners and receivers share.
pub struct RouterContext {
    pub settings: RouterSettings,
    pub sources: Vec<Mutex<Source>>,
    pub debug: DebugTap,
    verbosity: AtomicU8,
}

impl RouterContext {
    pub fn new(settings: RouterSettings) -> Self {
        let source_settings = settings.source_settings();
        let sources = (1..=settings.number_sources)
            .map(|id| Mutex::new(Source::new(id, source_settings.clone())))
            .collect();
        RouterContext {
            settings,
            sources,
            debug: DebugTap::new(),
            verbosity: AtomicU8::new(0),
        }
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity.load(Ordering::Relaxed)
    }

    pub fn set_verbosity(&self, level: u8) {
        self.verbosity.store(level.min(2), Ordering::Relaxed);
        log::debug!(target: "context", "verbosity set to {}", level.min(2));
    }

    /// Verbosity 1: outgoing OSC is traced.
    pub fn trace_outgoing(&self) -> bool {
        self.verbosity() >= 1
    }

    /// Verbosity 2: incoming OSC is traced as well.
    pub fn trace_incoming(&self) -> bool {
        self.verbosity() >= 2
    }
}

/// Global debug tap: when enabled, every outgoing datagram is duplicated to
/// the configured endpoint under a `/d<Dialect>/<dest>` prefix.
pub struct DebugTap {
    target: RwLock<Option<SocketAddr>>,
    socket: Mutex<Option<UdpSocket>>,
}

impl DebugTap {
    fn new() -> Self {
        DebugTap {
            target: RwLock::new(None),
            socket: Mutex::new(None),
        }
    }

    pub fn enable(&self, addr: SocketAddr) -> std::io::Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        if let Ok(mut s) = self.socket.lock() {
            *s = Some(socket);
        }
        if let Ok(mut t) = self.target.write() {
            *t = Some(addr);
        }
        log::info!(target: "debug_tap", "debug client connected: {}", addr);
        Ok(())
    }

    pub fn disable(&self) {
        if let Ok(mut t) = self.target.write() {
            *t = None;
        }
        if let Ok(mut s) = self.socket.lock() {
            *s = None;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.read().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Duplicate an outgoing message. Failures are silently ignored; the tap
    /// must never interfere with the real traffic.
    pub fn copy(&self, dialect: &str, dest: SocketAddr, msg: &OscMessage) {
        let Ok(target) = self.target.read() else {
            return;
        };
        let Some(target) = *target else {
            return;
        };
        let debug_path = format!("/d{}/{}{}", dialect, dest, msg.path);
        let packet = rosc::OscPacket::Message(rosc::OscMessage {
            addr: debug_path,
            args: msg.values.clone(),
        });
        let Ok(buf) = rosc::encoder::encode(&packet) else {
            return;
        };
        if let Ok(socket) = self.socket.lock() {
            if let Some(socket) = socket.as_ref() {
                let _ = socket.send_to(&buf, target);
            }
        }
    }
}
