//! YAML configuration: file discovery, deprecated key migration and the
//! embedded default.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use osc_kreuz_net::{ReceiverConfig, RouterSettings};

const DEFAULT_CONFIG: &str = include_str!("../config_default.yml");

/// Filenames probed in each config directory, first hit wins.
const CONFIG_FILE_NAMES: [&str; 6] = [
    "osc-kreuz_conf.yml",
    "osc-kreuz-conf.yml",
    "osc-kreuz_config.yml",
    "osc-kreuz-config.yml",
    "config.yml",
    "conf.yml",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Fully resolved configuration.
#[derive(Debug)]
pub struct Config {
    pub settings: RouterSettings,
    pub receivers: Vec<ReceiverConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    global: Option<RawGlobal>,
    /// Deprecated spelling of `global`.
    globalconfig: Option<RawGlobal>,
    #[serde(default)]
    receivers: Vec<ReceiverConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGlobal {
    number_sources: Option<usize>,
    number_direct_sends: Option<usize>,
    render_units: Option<Vec<String>>,
    max_gain: Option<f64>,
    send_changes_only: Option<bool>,
    data_port_timeout: Option<f64>,
    min_dist: Option<f64>,
    coordinate_scaling_factor: Option<f64>,
    reflect_elevation: Option<bool>,
    ip: Option<String>,
    port_ui: Option<u16>,
    port_data: Option<u16>,
    port_settings: Option<u16>,
    room_name: Option<String>,
    room_polygon: Option<Vec<[f64; 3]>>,

    // deprecated spellings, still accepted
    oscr_ip: Option<String>,
    inputport_ui: Option<u16>,
    inputport_data: Option<u16>,
    inputport_settings: Option<u16>,
}

/// Load the config from an explicit path, a discovered file, or the
/// embedded default (in that order).
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let contents = match path {
        Some(path) => read(path)?,
        None => match discover() {
            Some(path) => {
                log::info!(target: "config", "loading config file {}", path.display());
                read(&path)?
            }
            None => {
                log::warn!(target: "config", "could not find config, loading default config");
                DEFAULT_CONFIG.to_string()
            }
        },
    };
    parse(&contents)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Probe the config directories in precedence order.
fn discover() -> Option<PathBuf> {
    let mut bases = Vec::new();
    if let Some(user) = dirs::config_dir() {
        bases.push(user);
    }
    bases.push(PathBuf::from("/etc"));
    bases.push(PathBuf::from("/usr/local/etc"));

    for base in bases {
        for name in CONFIG_FILE_NAMES {
            let candidate = base.join("osc-kreuz").join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

fn parse(contents: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(contents)?;

    let global = match (raw.global, raw.globalconfig) {
        (Some(global), _) => global,
        (None, Some(global)) => {
            log::warn!(
                target: "config",
                "option globalconfig is deprecated, please use global instead"
            );
            global
        }
        (None, None) => RawGlobal::default(),
    };

    Ok(Config {
        settings: merge_settings(global),
        receivers: raw.receivers,
    })
}

fn deprecated<T>(new_value: Option<T>, old_value: Option<T>, old: &str, new: &str) -> Option<T> {
    if new_value.is_none() && old_value.is_some() {
        log::warn!(
            target: "config",
            "option {} is deprecated, please use {} instead", old, new
        );
        return old_value;
    }
    new_value
}

fn merge_settings(global: RawGlobal) -> RouterSettings {
    let mut settings = RouterSettings::default();

    if let Some(v) = global.number_sources {
        settings.number_sources = v;
    }
    if let Some(v) = global.number_direct_sends {
        settings.number_direct_sends = v;
    }
    if let Some(v) = global.render_units {
        settings.render_units = v;
    }
    if let Some(v) = global.max_gain {
        settings.max_gain = v;
    }
    if let Some(v) = global.send_changes_only {
        settings.send_changes_only = v;
    }
    if let Some(v) = global.data_port_timeout {
        settings.data_port_timeout = v;
    }
    if let Some(v) = global.min_dist {
        settings.min_dist = v;
    }
    if let Some(v) = global.coordinate_scaling_factor {
        settings.coordinate_scaling_factor = v;
    }
    if let Some(v) = global.reflect_elevation {
        settings.reflect_elevation = v;
    }
    if let Some(v) = deprecated(global.ip, global.oscr_ip, "oscr_ip", "ip") {
        settings.ip = v;
    }
    if let Some(v) = deprecated(global.port_ui, global.inputport_ui, "inputport_ui", "port_ui") {
        settings.port_ui = v;
    }
    if let Some(v) = deprecated(
        global.port_data,
        global.inputport_data,
        "inputport_data",
        "port_data",
    ) {
        settings.port_data = v;
    }
    if let Some(v) = deprecated(
        global.port_settings,
        global.inputport_settings,
        "inputport_settings",
        "port_settings",
    ) {
        settings.port_settings = v;
    }
    if let Some(v) = global.room_name {
        settings.room_name = v;
    }
    if let Some(v) = global.room_polygon {
        settings.room_polygon = v;
    }

    settings
}
