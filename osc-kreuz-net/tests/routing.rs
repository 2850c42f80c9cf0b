//! End-to-end routing: UDP in on the listener ports, UDP out to a
//! subscribed view client.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rosc::OscType;

use osc_kreuz_net::{
    Dispatcher, ReceiverRegistry, RouterContext, RouterSettings, SubscriptionManager,
};

use common::{float, OscProbe};

struct Router {
    ctx: Arc<RouterContext>,
    subscriptions: Arc<SubscriptionManager>,
    _dispatcher: Dispatcher,
    ui: SocketAddr,
    data: SocketAddr,
    settings: SocketAddr,
}

/// Spin up a full router on ephemeral localhost ports.
fn start_router(settings: RouterSettings) -> Router {
    let settings = RouterSettings {
        ip: "127.0.0.1".into(),
        port_ui: 0,
        port_data: 0,
        port_settings: 0,
        ..settings
    };
    let ctx = Arc::new(RouterContext::new(settings));
    let registry = Arc::new(ReceiverRegistry::new());
    let subscriptions = SubscriptionManager::new(ctx.clone(), registry.clone());
    let dispatcher =
        Dispatcher::start(ctx.clone(), registry.clone(), subscriptions.clone()).unwrap();

    let ports = dispatcher.ports();
    let addr = |port| SocketAddr::from(([127, 0, 0, 1], port));
    Router {
        ctx,
        subscriptions,
        ui: addr(ports.ui),
        data: addr(ports.data),
        settings: addr(ports.settings),
        _dispatcher: dispatcher,
    }
}

/// Subscribe the probe as a view client and wait until it is registered,
/// then drain the initial state replay.
fn subscribe(router: &Router, probe: &OscProbe, name: &str, fmt: &str) {
    probe.send(
        router.settings,
        "/oscrouter/subscribe",
        vec![
            OscType::String(name.into()),
            OscType::Int(probe.port() as i32),
            OscType::String(fmt.into()),
            OscType::Int(0),
            OscType::Int(5),
        ],
    );

    let deadline = Instant::now() + Duration::from_secs(2);
    while !router.subscriptions.is_subscribed(name) {
        assert!(Instant::now() < deadline, "subscription never registered");
        std::thread::sleep(Duration::from_millis(10));
    }

    // initial replay: every position and gain once
    probe.recv_all(Duration::from_millis(300));
}

#[test]
fn test_gain_alias_reaches_view_client() {
    let router = start_router(RouterSettings {
        number_sources: 16,
        data_port_timeout: 0.0,
        ..RouterSettings::default()
    });
    let probe = OscProbe::bind();
    subscribe(&router, &probe, "probe", "xyz");

    let sender = OscProbe::bind();
    sender.send(
        router.ui,
        "/source/send/ambisonics",
        vec![OscType::Int(7), OscType::Float(0.5)],
    );

    let args = probe
        .recv_on("/source/send", Duration::from_secs(2))
        .expect("no gain update arrived");
    assert_eq!(args[0], OscType::Int(7));
    assert_eq!(args[1], OscType::Int(0), "ambi is renderer index 0");
    assert!((float(&args[2]) - 0.5).abs() < 1e-6);

    // canonical state was updated as well
    assert!(
        (router.ctx.sources[6].lock().unwrap().renderer_gain(0) - 0.5).abs() < 1e-9
    );
}

#[test]
fn test_extended_position_path() {
    let router = start_router(RouterSettings {
        number_sources: 16,
        data_port_timeout: 0.0,
        ..RouterSettings::default()
    });
    let probe = OscProbe::bind();
    subscribe(&router, &probe, "posprobe", "xyz");

    let sender = OscProbe::bind();
    sender.send(
        router.ui,
        "/source/3/pos/xyz",
        vec![
            OscType::Float(1.0),
            OscType::Float(2.0),
            OscType::Float(3.0),
        ],
    );

    let args = probe
        .recv_on("/source/xyz", Duration::from_secs(2))
        .expect("no position update arrived");
    assert_eq!(args[0], OscType::Int(3));
    assert_eq!(float(&args[1]), 1.0);
    assert_eq!(float(&args[2]), 2.0);
    assert_eq!(float(&args[3]), 3.0);
}

#[test]
fn test_ui_precedence_over_data_port() {
    let router = start_router(RouterSettings {
        number_sources: 4,
        data_port_timeout: 1.0,
        ..RouterSettings::default()
    });
    let probe = OscProbe::bind();
    subscribe(&router, &probe, "uiprobe", "xyz");

    let sender = OscProbe::bind();

    sender.send(
        router.ui,
        "/source/send/ambi",
        vec![OscType::Int(1), OscType::Float(0.5)],
    );
    let args = probe
        .recv_on("/source/send", Duration::from_secs(2))
        .expect("ui write produced no update");
    assert!((float(&args[2]) - 0.5).abs() < 1e-6);

    // an automation write inside the precedence window is swallowed
    sender.send(
        router.data,
        "/source/send/ambi",
        vec![OscType::Int(1), OscType::Float(0.1)],
    );
    assert!(
        probe
            .recv_on("/source/send", Duration::from_millis(400))
            .is_none(),
        "blocked write must not notify"
    );
    assert!(
        (router.ctx.sources[0].lock().unwrap().renderer_gain(0) - 0.5).abs() < 1e-9
    );

    // after the timeout the data port takes effect again
    std::thread::sleep(Duration::from_millis(1100));
    sender.send(
        router.data,
        "/source/send/ambi",
        vec![OscType::Int(1), OscType::Float(0.2)],
    );
    let args = probe
        .recv_on("/source/send", Duration::from_secs(2))
        .expect("post-timeout write produced no update");
    assert!((float(&args[2]) - 0.2).abs() < 1e-6);
    assert!(
        (router.ctx.sources[0].lock().unwrap().renderer_gain(0) - 0.2).abs() < 1e-9
    );
}

#[test]
fn test_ping_is_answered_on_requested_port() {
    let router = start_router(RouterSettings {
        number_sources: 2,
        ..RouterSettings::default()
    });
    let probe = OscProbe::bind();

    probe.send(
        router.settings,
        "/oscrouter/ping",
        vec![OscType::Int(probe.port() as i32)],
    );

    let args = probe
        .recv_on("/oscrouter/pong", Duration::from_secs(2))
        .expect("no pong received");
    assert_eq!(args, vec![OscType::String("osc-kreuz".into())]);
}

#[test]
fn test_dump_replays_state_with_legacy_prefix() {
    let router = start_router(RouterSettings {
        number_sources: 2,
        data_port_timeout: 0.0,
        ..RouterSettings::default()
    });
    let probe = OscProbe::bind();
    subscribe(&router, &probe, "dumpprobe", "xyz");

    probe.send(router.settings, "/osckreuz/dump", vec![]);

    let replay = probe.recv_all(Duration::from_millis(500));
    let positions = replay.iter().filter(|(p, _)| p == "/source/xyz").count();
    let gains = replay.iter().filter(|(p, _)| p == "/source/send").count();
    assert_eq!(positions, 2, "one position per source");
    // gain updates share (path, source), so the per-source burst coalesces
    // into at most two datagrams per source
    assert!((2..=4).contains(&gains), "got {gains} gain datagrams");
}

#[test]
fn test_invalid_messages_are_dropped_silently() {
    let router = start_router(RouterSettings {
        number_sources: 4,
        data_port_timeout: 0.0,
        ..RouterSettings::default()
    });
    let probe = OscProbe::bind();
    subscribe(&router, &probe, "badprobe", "xyz");

    let sender = OscProbe::bind();
    // out-of-range source index
    sender.send(
        router.ui,
        "/source/xyz",
        vec![
            OscType::Int(99),
            OscType::Float(1.0),
            OscType::Float(1.0),
            OscType::Float(1.0),
        ],
    );
    // non-integer source index
    sender.send(
        router.ui,
        "/source/send/ambi",
        vec![OscType::Float(1.5), OscType::Float(0.5)],
    );
    // wrong component count
    sender.send(
        router.ui,
        "/source/1/xyz",
        vec![OscType::Float(1.0), OscType::Float(2.0)],
    );

    assert!(
        probe.recv_all(Duration::from_millis(300)).is_empty(),
        "invalid traffic must not produce updates"
    );
}

#[test]
fn test_unsubscribe_stops_updates() {
    let router = start_router(RouterSettings {
        number_sources: 4,
        data_port_timeout: 0.0,
        ..RouterSettings::default()
    });
    let probe = OscProbe::bind();
    subscribe(&router, &probe, "leaver", "xyz");

    probe.send(
        router.settings,
        "/oscrouter/unsubscribe",
        vec![OscType::String("leaver".into())],
    );
    let deadline = Instant::now() + Duration::from_secs(2);
    while router.subscriptions.is_subscribed("leaver") {
        assert!(Instant::now() < deadline, "unsubscribe never processed");
        std::thread::sleep(Duration::from_millis(10));
    }
    probe.recv_all(Duration::from_millis(100));

    let sender = OscProbe::bind();
    sender.send(
        router.ui,
        "/source/xyz",
        vec![
            OscType::Int(1),
            OscType::Float(5.0),
            OscType::Float(0.0),
            OscType::Float(0.0),
        ],
    );
    let leftovers: Vec<_> = probe
        .recv_all(Duration::from_millis(300))
        .into_iter()
        .filter(|(p, _)| p == "/source/xyz")
        .collect();
    assert!(leftovers.is_empty());
}
