//! osc-kreuz: stateful OSC router for spatial audio installations.

mod config;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{debug, error, info, warn};

use osc_kreuz_net::receiver::create_receiver;
use osc_kreuz_net::{
    Dispatcher, ReceiverConfig, ReceiverRegistry, RouterContext, StateFile,
    SubscriptionManager,
};

#[derive(Parser)]
#[command(
    name = "osc-kreuz",
    version,
    about = "OSC message processor and router for spatial audio"
)]
struct Cli {
    /// Path to the config file.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config.
    #[arg(short = 'i', long = "ip")]
    ip: Option<String>,

    /// UI port, overrides the config.
    #[arg(short = 'u', long = "port-ui")]
    port_ui: Option<u16>,

    /// Automation data port, overrides the config.
    #[arg(short = 'd', long = "port-data")]
    port_data: Option<u16>,

    /// Settings port, overrides the config.
    #[arg(short = 's', long = "port-settings")]
    port_settings: Option<u16>,

    /// Duplicate all outgoing OSC to this endpoint, e.g. "130.149.23.46:55112".
    #[arg(long = "oscdebug", value_name = "HOST:PORT")]
    oscdebug: Option<String>,

    /// Increase verbosity level (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

    let level = if verbose > 0 {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto);
}

fn debug_prints(ctx: &RouterContext, verbose: u8) {
    let settings = &ctx.settings;
    debug!("max number of sources is set to {}", settings.number_sources);
    debug!("number of rendering units is {}", settings.renderer_count());
    for key in ["ambi", "wfs", "reverb"] {
        if let Some(idx) = settings.render_units.iter().position(|u| u == key) {
            debug!("{} index: {}", key, idx);
        }
    }
    debug!("UI listenport: {}", settings.port_ui);
    debug!("DATA listenport (for automation): {}", settings.port_data);
    debug!(
        "port for settings, ping and client subscription is: {}",
        settings.port_settings
    );
    debug!("max gain is {}", settings.max_gain);
    if ctx.debug.is_enabled() {
        debug!("osc messages will be copied to the debug client");
    } else {
        debug!("no debug client configured");
    }
    debug!("verbosity level is {}", verbose);
    if verbose == 1 {
        debug!("outgoing osc will be printed in console");
    } else if verbose > 1 {
        debug!("incoming and outgoing osc will be printed in console");
    }
}

/// Rebind TWonder endpoints recorded by a previous run.
fn restore_twonder_endpoints(ctx: &Arc<RouterContext>, registry: &ReceiverRegistry) {
    let Some(state) = StateFile::for_dialect("twonder") else {
        return;
    };
    let endpoints = state.endpoints();
    if endpoints.is_empty() {
        return;
    }
    if ctx.settings.room_polygon.is_empty() {
        warn!(
            "found {} persisted twonder endpoints but no room_polygon is configured, ignoring",
            endpoints.len()
        );
        return;
    }

    if let Some(receiver) = registry
        .snapshot()
        .into_iter()
        .find(|r| r.name() == "TWonder")
    {
        for (hostname, port) in endpoints {
            if !receiver.core().has_endpoint(&hostname, port) {
                receiver.add_endpoint(&hostname, port);
            }
        }
        return;
    }

    let cfg = ReceiverConfig {
        kind: "twonder".into(),
        hosts: Some(
            endpoints
                .iter()
                .map(|(hostname, port)| osc_kreuz_net::receiver::HostEntry {
                    hostname: hostname.clone(),
                    port: *port,
                })
                .collect(),
        ),
        ..ReceiverConfig::default()
    };
    match create_receiver(ctx, &cfg) {
        Ok(receiver) => {
            info!("restored twonder receiver with {} endpoints", endpoints.len());
            registry.add(Arc::new(receiver));
        }
        Err(e) => error!("could not restore twonder receiver: {}", e),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(-1);
        }
    };

    if let Some(ip) = cli.ip {
        config.settings.ip = ip;
    }
    if let Some(port) = cli.port_ui {
        config.settings.port_ui = port;
    }
    if let Some(port) = cli.port_data {
        config.settings.port_data = port;
    }
    if let Some(port) = cli.port_settings {
        config.settings.port_settings = port;
    }

    let ctx = Arc::new(RouterContext::new(config.settings));
    ctx.set_verbosity(cli.verbose);

    if let Some(value) = cli.oscdebug.as_deref() {
        match value.parse() {
            Ok(addr) => {
                if let Err(e) = ctx.debug.enable(addr) {
                    warn!("could not enable debug tap: {}", e);
                }
            }
            Err(e) => warn!("invalid --oscdebug argument {:?}: {}", value, e),
        }
    }

    info!("setting up receivers");
    let registry = Arc::new(ReceiverRegistry::new());
    for receiver_config in &config.receivers {
        if receiver_config.kind.is_empty() {
            warn!("receiver has no type specified, skipping");
            continue;
        }
        match create_receiver(&ctx, receiver_config) {
            Ok(receiver) => registry.add(Arc::new(receiver)),
            Err(e) => {
                error!("{}", e);
                process::exit(-1);
            }
        }
    }

    restore_twonder_endpoints(&ctx, &registry);

    let subscriptions = SubscriptionManager::new(ctx.clone(), registry.clone());
    let dispatcher =
        match Dispatcher::start(ctx.clone(), registry.clone(), subscriptions.clone()) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                error!("could not start osc servers: {}", e);
                process::exit(-1);
            }
        };

    if cli.verbose > 0 {
        debug_prints(&ctx, cli.verbose);
    }

    info!("OSC router ready to use");
    info!("have fun...");

    // The stop signal is delivered by whoever embeds or supervises the
    // router (service manager, test harness); the sender half never fires in
    // plain standalone operation.
    let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let _ = stop_rx.recv();

    info!("shutting down");
    subscriptions.shutdown();
    dispatcher.stop();
}
