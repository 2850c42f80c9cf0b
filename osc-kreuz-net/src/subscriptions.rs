//! Dynamic view-client subscriptions and their liveness watchdog.
//!
//! Every subscription gets a repeating ping timer. A subscriber that misses
//! six pongs in a row is deregistered; a pong at any point resets the
//! counter. Subscribe and unsubscribe for all clients run under one mutex so
//! two rapid subscribes for the same name cannot race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{info, warn};
use rosc::OscType;

use crate::context::RouterContext;
use crate::receiver::{create_view_client, Receiver, ReceiverRegistry};
use crate::updates::OscMessage;

const PING_PATH: &str = "/oscrouter/ping";
const PING_INTERVAL: Duration = Duration::from_secs(2);
const MAX_MISSED_PONGS: u32 = 6;

struct Subscription {
    hostname: String,
    port: u16,
    receiver: Arc<Receiver>,
    missed_pongs: Arc<AtomicU32>,
    cancelled: Arc<AtomicBool>,
}

pub struct SubscriptionManager {
    ctx: Arc<RouterContext>,
    registry: Arc<ReceiverRegistry>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    /// The actually bound settings port, sent along with every ping.
    settings_port: AtomicU16,
    ping_interval: Duration,
}

impl SubscriptionManager {
    pub fn new(ctx: Arc<RouterContext>, registry: Arc<ReceiverRegistry>) -> Arc<Self> {
        Self::with_ping_interval(ctx, registry, PING_INTERVAL)
    }

    /// Shortened intervals are for tests; production uses the 2 s heartbeat.
    pub fn with_ping_interval(
        ctx: Arc<RouterContext>,
        registry: Arc<ReceiverRegistry>,
        ping_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(SubscriptionManager {
            settings_port: AtomicU16::new(ctx.settings.port_settings),
            ctx,
            registry,
            subscriptions: Mutex::new(HashMap::new()),
            ping_interval,
        })
    }

    pub fn set_settings_port(&self, port: u16) {
        self.settings_port.store(port, Ordering::Relaxed);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.subscriptions
            .lock()
            .map(|s| s.contains_key(name))
            .unwrap_or(false)
    }

    /// Register a view client. Idempotent for an identical endpoint; a
    /// second subscription under the same name from a different endpoint is
    /// rejected.
    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        self: &Arc<Self>,
        name: &str,
        hostname: &str,
        port: u16,
        coord_fmt: Option<&str>,
        index_in_path: bool,
        update_interval_ms: Option<u64>,
    ) {
        let Ok(mut subscriptions) = self.subscriptions.lock() else {
            return;
        };

        if let Some(existing) = subscriptions.get(name) {
            if existing.hostname == hostname && existing.port == port {
                info!(
                    target: "subscriptions",
                    "client {} re-subscribed from {}:{}", name, hostname, port
                );
                existing.missed_pongs.store(0, Ordering::Relaxed);
            } else {
                warn!(
                    target: "subscriptions",
                    "rejecting subscription {}: name already registered from {}:{}",
                    name, existing.hostname, existing.port
                );
            }
            return;
        }

        let receiver = match create_view_client(
            &self.ctx,
            name,
            hostname,
            port,
            coord_fmt,
            index_in_path,
            update_interval_ms,
        ) {
            Ok(receiver) => Arc::new(receiver),
            Err(e) => {
                warn!(target: "subscriptions", "could not create view client {}: {}", name, e);
                return;
            }
        };

        self.registry.add(receiver.clone());

        // replay the whole state so the client starts in sync
        receiver.dump_source_positions();
        receiver.dump_source_gains();

        let missed_pongs = Arc::new(AtomicU32::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));

        subscriptions.insert(
            name.to_string(),
            Subscription {
                hostname: hostname.to_string(),
                port,
                receiver: receiver.clone(),
                missed_pongs: missed_pongs.clone(),
                cancelled: cancelled.clone(),
            },
        );

        info!(
            target: "subscriptions",
            "client {} subscribed from {}:{}", name, hostname, port
        );

        self.spawn_watchdog(name.to_string(), receiver, missed_pongs, cancelled);
    }

    fn spawn_watchdog(
        self: &Arc<Self>,
        name: String,
        receiver: Arc<Receiver>,
        missed_pongs: Arc<AtomicU32>,
        cancelled: Arc<AtomicBool>,
    ) {
        let manager = Arc::clone(self);
        let interval = self.ping_interval;
        let spawned = thread::Builder::new()
            .name(format!("pingtimer_{name}"))
            .spawn(move || loop {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                if missed_pongs.load(Ordering::Relaxed) >= MAX_MISSED_PONGS {
                    warn!(
                        target: "subscriptions",
                        "client {} missed {} pings, removing", name, MAX_MISSED_PONGS
                    );
                    manager.remove(&name);
                    break;
                }
                let port = manager.settings_port.load(Ordering::Relaxed);
                receiver.core().send_messages(
                    &[OscMessage::new(PING_PATH, vec![OscType::Int(port as i32)])],
                    None,
                );
                missed_pongs.fetch_add(1, Ordering::Relaxed);
                thread::sleep(interval);
            });
        if let Err(e) = spawned {
            warn!(target: "subscriptions", "could not spawn watchdog: {}", e);
        }
    }

    /// Heartbeat reply from a subscriber.
    pub fn pong_received(&self, name: &str) {
        let Ok(subscriptions) = self.subscriptions.lock() else {
            return;
        };
        match subscriptions.get(name) {
            Some(sub) => sub.missed_pongs.store(0, Ordering::Relaxed),
            None => {
                if self.ctx.verbosity() > 0 {
                    info!(target: "subscriptions", "no subscription for pong from {}", name);
                }
            }
        }
    }

    pub fn unsubscribe(&self, name: &str) {
        if !self.remove(name) {
            warn!(
                target: "subscriptions",
                "can't delete client {}, it does not exist", name
            );
        }
    }

    fn remove(&self, name: &str) -> bool {
        let Ok(mut subscriptions) = self.subscriptions.lock() else {
            return false;
        };
        match subscriptions.remove(name) {
            Some(sub) => {
                sub.cancelled.store(true, Ordering::Relaxed);
                self.registry.remove(&sub.receiver);
                info!(target: "subscriptions", "removed client {}", name);
                true
            }
            None => false,
        }
    }

    /// Cancel every watchdog and drop all subscriptions.
    pub fn shutdown(&self) {
        let Ok(mut subscriptions) = self.subscriptions.lock() else {
            return;
        };
        for (_, sub) in subscriptions.drain() {
            sub.cancelled.store(true, Ordering::Relaxed);
            self.registry.remove(&sub.receiver);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RouterSettings;

    fn manager(ping_interval: Duration) -> Arc<SubscriptionManager> {
        let settings = RouterSettings {
            number_sources: 4,
            ..RouterSettings::default()
        };
        let ctx = Arc::new(RouterContext::new(settings));
        let registry = Arc::new(ReceiverRegistry::new());
        SubscriptionManager::with_ping_interval(ctx, registry, ping_interval)
    }

    #[test]
    fn test_subscribe_registers_receiver() {
        let mgr = manager(Duration::from_secs(60));
        mgr.subscribe("gui", "127.0.0.1", 58800, Some("xyz"), false, None);
        assert!(mgr.is_subscribed("gui"));
        assert_eq!(mgr.registry.len(), 1);
    }

    #[test]
    fn test_resubscribe_same_endpoint_is_idempotent() {
        let mgr = manager(Duration::from_secs(60));
        mgr.subscribe("gui", "127.0.0.1", 58801, None, false, None);
        mgr.subscribe("gui", "127.0.0.1", 58801, None, false, None);
        assert_eq!(mgr.subscription_count(), 1);
        assert_eq!(mgr.registry.len(), 1);
    }

    #[test]
    fn test_conflicting_endpoint_is_rejected() {
        let mgr = manager(Duration::from_secs(60));
        mgr.subscribe("gui", "127.0.0.1", 58802, None, false, None);
        mgr.subscribe("gui", "127.0.0.1", 58803, None, false, None);
        assert_eq!(mgr.subscription_count(), 1);
        let receivers = mgr.registry.snapshot();
        assert!(receivers[0].core().has_endpoint("127.0.0.1", 58802));
    }

    #[test]
    fn test_unsubscribe_removes_receiver() {
        let mgr = manager(Duration::from_secs(60));
        mgr.subscribe("gui", "127.0.0.1", 58804, None, false, None);
        mgr.unsubscribe("gui");
        assert!(!mgr.is_subscribed("gui"));
        assert!(mgr.registry.is_empty());
    }

    #[test]
    fn test_missed_pongs_remove_subscription() {
        let mgr = manager(Duration::from_millis(10));
        mgr.subscribe("silent", "127.0.0.1", 58805, None, false, None);
        // 6 pings at 10ms go unanswered, the 7th tick removes the client
        thread::sleep(Duration::from_millis(300));
        assert!(!mgr.is_subscribed("silent"));
        assert!(mgr.registry.is_empty());

        // the name is free again afterwards
        mgr.subscribe("silent", "127.0.0.1", 58806, None, false, None);
        assert!(mgr.is_subscribed("silent"));
    }

    #[test]
    fn test_pong_keeps_subscription_alive() {
        let mgr = manager(Duration::from_millis(20));
        mgr.subscribe("alive", "127.0.0.1", 58807, None, false, None);
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(30));
            mgr.pong_received("alive");
        }
        assert!(mgr.is_subscribed("alive"));
    }
}
