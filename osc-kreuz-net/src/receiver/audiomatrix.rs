//! Configurable matrix dialect: arbitrary downstream paths declared in the
//! config file, each bound to either a renderer gain or a position format.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::context::RouterContext;
use crate::updates::{GainUpdate, PositionUpdate, Update};

use super::{assemble, Dialect, Receiver, ReceiverConfig, ReceiverCore, ReceiverError};

pub(super) struct AudioMatrix {
    /// renderer index → paths that mirror its gain
    gain_paths: HashMap<usize, Vec<String>>,
    /// (path, coordinate format) pairs fed on every position change
    pos_paths: Vec<(String, String)>,
}

impl Dialect for AudioMatrix {
    fn position_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        for (path, coord_fmt) in &self.pos_paths {
            core.add_update(
                source_idx,
                Update::Position(PositionUpdate {
                    path: path.clone(),
                    source: source_idx,
                    source_arg: Some(source_idx as i32),
                    coord_fmt: coord_fmt.clone(),
                    post_arg: None,
                }),
            );
        }
    }

    fn gain_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, render_idx: usize) {
        let Some(paths) = self.gain_paths.get(&render_idx) else {
            return;
        };
        for path in paths {
            core.add_update(
                source_idx,
                Update::Gain(GainUpdate {
                    path: path.clone(),
                    source: source_idx,
                    source_arg: Some(source_idx as i32),
                    render_idx,
                    include_render_idx: false,
                }),
            );
        }
    }
}

pub(super) fn create_audiomatrix(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
) -> Result<Receiver, ReceiverError> {
    let entries = cfg
        .paths
        .as_ref()
        .ok_or_else(|| ReceiverError::InvalidConfig("audiomatrix requires paths".into()))?;

    let mut gain_paths: HashMap<usize, Vec<String>> = HashMap::new();
    let mut pos_paths = Vec::new();

    for entry in entries {
        match entry.kind.as_str() {
            "gain" => {
                let renderer = entry.renderer.as_deref().ok_or_else(|| {
                    ReceiverError::InvalidConfig(format!(
                        "gain path {} has no renderer",
                        entry.path
                    ))
                })?;
                let render_idx = ctx
                    .settings
                    .render_units
                    .iter()
                    .position(|u| u == renderer)
                    .ok_or_else(|| {
                        ReceiverError::InvalidConfig(format!(
                            "unknown render unit {renderer:?}"
                        ))
                    })?;
                gain_paths
                    .entry(render_idx)
                    .or_default()
                    .push(entry.path.clone());
            }
            "position" | "pos" => {
                let fmt = entry.format.clone().unwrap_or_else(|| "xyz".into());
                pos_paths.push((entry.path.clone(), fmt));
            }
            other => {
                return Err(ReceiverError::InvalidConfig(format!(
                    "invalid path type {other:?} for {}",
                    entry.path
                )))
            }
        }
    }

    debug!(target: "receiver", "audio matrix initialized");

    let fmt = cfg.dataformat.clone().unwrap_or_else(|| "xyz".into());
    assemble(
        ctx,
        cfg,
        "AudioMatrix".into(),
        fmt,
        10,
        Box::new(AudioMatrix {
            gain_paths,
            pos_paths,
        }),
    )
}
