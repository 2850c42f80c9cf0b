//! Receiver fan-out engine.
//!
//! A receiver owns a set of downstream endpoints and, per source, a pair of
//! update stacks plus a rate gate. Dialects translate canonical state
//! changes into their own wire vocabulary by pushing [`Update`]s into the
//! engine; the engine coalesces, rate-limits and sends.

mod audiomatrix;
mod audiorouter;
mod seamless;
mod spatial;
mod supercollider;
mod viewclient;
mod wonder;

pub use viewclient::create_view_client;

use std::collections::HashSet;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Deserialize;
use thiserror::Error;

use osc_kreuz_types::SourceAttribute;

use crate::context::RouterContext;
use crate::updates::{push_update, OscMessage, Update};

/// DNS retry budget during endpoint registration.
const RESOLVE_RETRIES: u32 = 120;
const RESOLVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A single datagram taking longer than this to hand to the kernel gets a
/// warning; it usually means a blocking resolver or a saturated socket.
const SLOW_SEND_WARN: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("receiver has no type specified")]
    MissingType,
    #[error("invalid receiver type {0:?}")]
    UnknownType(String),
    #[error("invalid host entry for receiver {0:?}")]
    InvalidHost(String),
    #[error("invalid receiver config: {0}")]
    InvalidConfig(String),
    #[error("can't serve twonder because no room_polygon was specified in config")]
    MissingRoomPolygon,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One receiver entry of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiverConfig {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub hosts: Option<Vec<HostEntry>>,
    /// Milliseconds between two dispatches for the same source.
    pub updateintervall: Option<u64>,
    pub dataformat: Option<String>,
    /// AudioMatrix only.
    pub paths: Option<Vec<MatrixPathEntry>>,
    /// TWonder only: endpoints are multicast, don't persist or deduplicate.
    pub multicast: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatrixPathEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub renderer: Option<String>,
    #[serde(alias = "dataformat")]
    pub format: Option<String>,
}

/// A downstream endpoint. `addr` is `None` when resolution failed at
/// registration time; sends then retry resolution per datagram.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub hostname: String,
    pub port: u16,
    pub addr: Option<SocketAddr>,
}

fn resolve_once(hostname: &str, port: u16) -> Option<SocketAddr> {
    (hostname, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
}

fn resolve_with_retries(hostname: &str, port: u16) -> Option<SocketAddr> {
    for attempt in 0..RESOLVE_RETRIES {
        if let Some(addr) = resolve_once(hostname, port) {
            return Some(addr);
        }
        if attempt + 1 < RESOLVE_RETRIES {
            warn!(
                target: "receiver",
                "getting ip for receiver {}:{} failed, retrying...",
                hostname, port
            );
            thread::sleep(RESOLVE_RETRY_DELAY);
        }
    }
    None
}

/// Dialect-agnostic half of a receiver: endpoints, update stacks, the rate
/// gate and the send path.
pub struct ReceiverCore {
    ctx: Arc<RouterContext>,
    dialect_name: String,
    pos_format: String,
    update_interval: Duration,
    socket: UdpSocket,
    endpoints: RwLock<Vec<Endpoint>>,
    stacks: Vec<Mutex<HashSet<Update>>>,
    swap_stacks: Vec<Mutex<HashSet<Update>>>,
    gates: Vec<AtomicBool>,
}

impl ReceiverCore {
    fn new(
        ctx: Arc<RouterContext>,
        dialect_name: String,
        pos_format: String,
        update_interval_ms: u64,
    ) -> Result<Self, ReceiverError> {
        let n = ctx.settings.number_sources;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(ReceiverCore {
            ctx,
            dialect_name,
            pos_format,
            update_interval: Duration::from_millis(update_interval_ms),
            socket,
            endpoints: RwLock::new(Vec::new()),
            stacks: (0..n).map(|_| Mutex::new(HashSet::new())).collect(),
            swap_stacks: (0..n).map(|_| Mutex::new(HashSet::new())).collect(),
            gates: (0..n).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn context(&self) -> &Arc<RouterContext> {
        &self.ctx
    }

    pub fn dialect_name(&self) -> &str {
        &self.dialect_name
    }

    pub fn pos_format(&self) -> &str {
        &self.pos_format
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn has_endpoint(&self, hostname: &str, port: u16) -> bool {
        self.endpoints
            .read()
            .map(|eps| eps.iter().any(|e| e.hostname == hostname && e.port == port))
            .unwrap_or(false)
    }

    /// Resolve and register a downstream endpoint. Resolution retries for up
    /// to two minutes; if it still fails the hostname is kept and every send
    /// retries resolution.
    pub fn add_endpoint(&self, hostname: &str, port: u16) {
        let addr = resolve_with_retries(hostname, port);
        if addr.is_none() {
            warn!(
                target: "receiver",
                "failed to resolve receiver {}:{}, using hostname instead",
                hostname, port
            );
        }
        if let Ok(mut endpoints) = self.endpoints.write() {
            endpoints.push(Endpoint {
                hostname: hostname.to_string(),
                port,
                addr,
            });
        }
    }

    /// Queue an update for a source and poke the rate gate.
    pub fn add_update(self: &Arc<Self>, source_idx: usize, update: Update) {
        let Some(stack) = self.stacks.get(source_idx) else {
            return;
        };
        if let Ok(mut stack) = stack.lock() {
            push_update(&mut stack, update);
        }
        self.maybe_flush(source_idx);
    }

    /// Non-blocking gate: when a flush for this source is already in flight,
    /// the pending update is picked up when the gate reopens.
    fn maybe_flush(self: &Arc<Self>, source_idx: usize) {
        if self.gates[source_idx]
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let started = Instant::now();

        let msgs: Vec<OscMessage> = {
            let Ok(mut primary) = self.stacks[source_idx].lock() else {
                self.gates[source_idx].store(false, Ordering::Release);
                return;
            };
            if primary.is_empty() {
                drop(primary);
                self.gates[source_idx].store(false, Ordering::Release);
                return;
            }
            let Ok(mut swap) = self.swap_stacks[source_idx].lock() else {
                self.gates[source_idx].store(false, Ordering::Release);
                return;
            };
            std::mem::swap(&mut *primary, &mut *swap);
            drop(primary);
            swap.drain()
                .filter_map(|u| u.to_message(&self.ctx.sources))
                .collect()
        };

        self.send_messages(&msgs, None);

        // reopen the gate after the rate-limit interval; re-check for
        // updates that arrived while the gate was closed
        let delay = self.update_interval.saturating_sub(started.elapsed());
        let core = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("rel_{:02}_{}", source_idx, self.dialect_name))
            .spawn(move || {
                thread::sleep(delay);
                core.gates[source_idx].store(false, Ordering::Release);
                let pending = core.stacks[source_idx]
                    .lock()
                    .map(|s| !s.is_empty())
                    .unwrap_or(false);
                if pending {
                    core.maybe_flush(source_idx);
                }
            });
        if spawned.is_err() {
            self.gates[source_idx].store(false, Ordering::Release);
        }
    }

    /// Send messages to every registered endpoint, or to one explicit target.
    /// Best-effort: failures are logged per `(endpoint, message)` pair and
    /// never abort the loop.
    pub fn send_messages(&self, msgs: &[OscMessage], target: Option<(&str, u16)>) {
        let endpoints: Vec<Endpoint> = match target {
            Some((hostname, port)) => vec![Endpoint {
                hostname: hostname.to_string(),
                port,
                addr: resolve_once(hostname, port),
            }],
            None => self.endpoints(),
        };

        for msg in msgs {
            let packet = rosc::OscPacket::Message(rosc::OscMessage {
                addr: msg.path.clone(),
                args: msg.values.clone(),
            });
            let buf = match rosc::encoder::encode(&packet) {
                Ok(buf) => buf,
                Err(e) => {
                    error!(target: "receiver", "failed to encode {}: {}", msg.path, e);
                    continue;
                }
            };

            for endpoint in &endpoints {
                let addr = match endpoint.addr.or_else(|| {
                    resolve_once(&endpoint.hostname, endpoint.port)
                }) {
                    Some(addr) => addr,
                    None => {
                        warn!(
                            target: "receiver",
                            "still can't resolve {}:{}, dropping {}",
                            endpoint.hostname, endpoint.port, msg.path
                        );
                        continue;
                    }
                };

                let send_start = Instant::now();
                if let Err(e) = self.socket.send_to(&buf, addr) {
                    error!(
                        target: "receiver",
                        "error while sending to {}: {}", addr, e
                    );
                } else if send_start.elapsed() > SLOW_SEND_WARN {
                    warn!(
                        target: "receiver",
                        "sending osc update {} to {} took way too long: {:.2}ms",
                        msg.path,
                        addr,
                        send_start.elapsed().as_secs_f64() * 1000.0
                    );
                }

                self.ctx.debug.copy(&self.dialect_name, addr, msg);
            }

            if self.ctx.trace_outgoing() {
                debug!(
                    target: "osc_out",
                    "OSC from {} to {} with values {:?}",
                    self.dialect_name, msg.path, msg.values
                );
            }
        }
    }
}

/// Strategy hooks a dialect can react to. Defaults are no-ops, so a dialect
/// only overrides what its downstream actually consumes.
pub trait Dialect: Send + Sync {
    fn position_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        let _ = (core, source_idx);
    }

    fn gain_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, render_idx: usize) {
        let _ = (core, source_idx, render_idx);
    }

    fn direct_send_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, send_idx: usize) {
        let _ = (core, source_idx, send_idx);
    }

    fn attribute_changed(
        &self,
        core: &Arc<ReceiverCore>,
        source_idx: usize,
        attribute: SourceAttribute,
    ) {
        let _ = (core, source_idx, attribute);
    }

    /// Called after an endpoint was registered with the core.
    fn endpoint_added(&self, core: &Arc<ReceiverCore>, hostname: &str, port: u16) {
        let _ = (core, hostname, port);
    }

    /// TWonder control-plane registration. Returns true when this dialect
    /// took care of the endpoint.
    fn stream_connect(&self, core: &Arc<ReceiverCore>, hostname: &str, port: u16) -> bool {
        let _ = (core, hostname, port);
        false
    }

    /// Whether the init log should mention the position format.
    fn logs_pos_format(&self) -> bool {
        true
    }
}

/// A fully assembled receiver: shared engine plus dialect strategy.
pub struct Receiver {
    core: Arc<ReceiverCore>,
    dialect: Box<dyn Dialect>,
}

impl Receiver {
    pub fn core(&self) -> &Arc<ReceiverCore> {
        &self.core
    }

    pub fn name(&self) -> &str {
        self.core.dialect_name()
    }

    pub fn position_changed(&self, source_idx: usize) {
        self.dialect.position_changed(&self.core, source_idx);
    }

    pub fn gain_changed(&self, source_idx: usize, render_idx: usize) {
        self.dialect.gain_changed(&self.core, source_idx, render_idx);
    }

    pub fn direct_send_changed(&self, source_idx: usize, send_idx: usize) {
        self.dialect
            .direct_send_changed(&self.core, source_idx, send_idx);
    }

    pub fn attribute_changed(&self, source_idx: usize, attribute: SourceAttribute) {
        self.dialect
            .attribute_changed(&self.core, source_idx, attribute);
    }

    pub fn stream_connect(&self, hostname: &str, port: u16) -> bool {
        self.dialect.stream_connect(&self.core, hostname, port)
    }

    /// Register an endpoint and run the dialect's registration hook.
    pub fn add_endpoint(&self, hostname: &str, port: u16) {
        self.core.add_endpoint(hostname, port);
        self.dialect.endpoint_added(&self.core, hostname, port);
    }

    /// Replay the current position of every source.
    pub fn dump_source_positions(&self) {
        for i in 0..self.core.ctx.settings.number_sources {
            self.position_changed(i);
        }
    }

    /// Replay every renderer gain of every source.
    pub fn dump_source_gains(&self) {
        let renderers = self.core.ctx.settings.renderer_count();
        for i in 0..self.core.ctx.settings.number_sources {
            for r in 0..renderers {
                self.gain_changed(i, r);
            }
        }
    }
}

/// List of live receivers. Mutated by the settings plane and shutdown only;
/// listener threads work on snapshots.
#[derive(Default)]
pub struct ReceiverRegistry {
    inner: RwLock<Vec<Arc<Receiver>>>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, receiver: Arc<Receiver>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.push(receiver);
        }
    }

    pub fn remove(&self, receiver: &Arc<Receiver>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.retain(|r| !Arc::ptr_eq(r, receiver));
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<Receiver>> {
        self.inner.read().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared assembly: build the core, attach the dialect, register configured
/// endpoints, log the init block.
fn assemble(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
    dialect_name: String,
    pos_format: String,
    default_interval_ms: u64,
    dialect: Box<dyn Dialect>,
) -> Result<Receiver, ReceiverError> {
    let interval = cfg.updateintervall.unwrap_or(default_interval_ms);
    let core = Arc::new(ReceiverCore::new(
        ctx.clone(),
        dialect_name,
        pos_format,
        interval,
    )?);
    let receiver = Receiver { core, dialect };

    if let (Some(hostname), Some(port)) = (cfg.hostname.as_deref(), cfg.port) {
        receiver.add_endpoint(hostname, port);
    }
    if let Some(hosts) = &cfg.hosts {
        for host in hosts {
            receiver.add_endpoint(&host.hostname, host.port);
        }
    }

    let endpoints = receiver.core.endpoints();
    if endpoints.is_empty() {
        warn!(
            target: "receiver",
            "receiver of type {} has no receivers", receiver.name()
        );
    }

    info!(target: "receiver", "initialized receiver {}", receiver.name());
    let hosts: Vec<String> = endpoints
        .iter()
        .map(|e| format!("{}:{}", e.hostname, e.port))
        .collect();
    info!(target: "receiver", "\thosts: {}", hosts.join(", "));
    if receiver.dialect.logs_pos_format() {
        info!(
            target: "receiver",
            "\tlistening to format {}", receiver.core.pos_format()
        );
    }

    Ok(receiver)
}

/// Construct a receiver from a config entry. ViewClients are not created
/// here; they only come in through the subscription plane.
pub fn create_receiver(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
) -> Result<Receiver, ReceiverError> {
    if cfg.kind.is_empty() {
        return Err(ReceiverError::MissingType);
    }
    match cfg.kind.to_lowercase().as_str() {
        "wonder" => wonder::create_wonder(ctx, cfg),
        "twonder" => wonder::create_twonder(ctx, cfg, None),
        "audiorouter" => audiorouter::create_audiorouter(ctx, cfg),
        "audiorouterwfs" => audiorouter::create_audiorouter_wfs(ctx, cfg),
        "audiomatrix" => audiomatrix::create_audiomatrix(ctx, cfg),
        "scengine" => supercollider::create_supercollider(ctx, cfg),
        "seamlessplugin" => seamless::create_seamless_plugin(ctx, cfg),
        "spatial" => spatial::create_spatial(ctx, cfg),
        other => Err(ReceiverError::UnknownType(other.to_string())),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn local_cfg(kind: &str) -> ReceiverConfig {
        ReceiverConfig {
            kind: kind.into(),
            hostname: Some("127.0.0.1".into()),
            port: Some(52987),
            ..ReceiverConfig::default()
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let ctx = test_ctx(4);
        let cfg = local_cfg("panoramix");
        match create_receiver(&ctx, &cfg) {
            Err(ReceiverError::UnknownType(t)) => assert_eq!(t, "panoramix"),
            other => panic!("expected UnknownType, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_type_matching_is_case_insensitive() {
        let ctx = test_ctx(4);
        let cfg = local_cfg("AudioRouter");
        assert!(create_receiver(&ctx, &cfg).is_ok());
    }

    #[test]
    fn test_endpoint_registration() {
        let ctx = test_ctx(4);
        let receiver = create_receiver(&ctx, &local_cfg("audiorouter")).unwrap();
        assert!(receiver.core().has_endpoint("127.0.0.1", 52987));
        assert!(!receiver.core().has_endpoint("127.0.0.1", 1));
        let eps = receiver.core().endpoints();
        assert_eq!(eps.len(), 1);
        assert!(eps[0].addr.is_some());
    }

    #[test]
    fn test_registry_add_remove() {
        let ctx = test_ctx(2);
        let registry = ReceiverRegistry::new();
        let r = Arc::new(create_receiver(&ctx, &local_cfg("audiorouter")).unwrap());
        registry.add(r.clone());
        assert_eq!(registry.len(), 1);
        registry.remove(&r);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_updates_coalesce_behind_closed_gate() {
        let ctx = test_ctx(2);
        let receiver = gated_receiver(&ctx, &local_cfg("scengine"));
        for _ in 0..10 {
            receiver.position_changed(1);
        }
        assert_eq!(pending(receiver.core(), 1).len(), 1);
        assert!(pending(receiver.core(), 0).is_empty());
    }
}
