//! Audiorouter dialects: gain-only receivers in front of the mixing matrix.
//!
//! The plain Audiorouter carries every renderer send except WFS (that one
//! has its own dedicated router instance) and all direct sends. Positions
//! are never emitted.

use std::sync::Arc;

use osc_kreuz_types::SourceAttribute;

use crate::context::RouterContext;
use crate::updates::{DirectSendUpdate, GainUpdate, Update};

use super::{assemble, Dialect, Receiver, ReceiverConfig, ReceiverCore, ReceiverError};

const PATH_GAIN_RENDERER: &str = "/source/send/spatial";
const PATH_GAIN_REVERB: &str = "/source/reverb/gain";
const PATH_GAIN_DIRECT: &str = "/source/send/direct";

/// Renderer index reserved for the WFS router.
const WFS_RENDER_IDX: usize = 1;
/// Renderer index of the reverb bus.
const REVERB_RENDER_IDX: usize = 2;

pub(super) struct Audiorouter;

impl Dialect for Audiorouter {
    fn gain_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, render_idx: usize) {
        if render_idx == WFS_RENDER_IDX {
            return;
        }

        let (path, include_render_idx) = if render_idx == REVERB_RENDER_IDX {
            (PATH_GAIN_REVERB, false)
        } else {
            (PATH_GAIN_RENDERER, true)
        };

        core.add_update(
            source_idx,
            Update::Gain(GainUpdate {
                path: path.into(),
                source: source_idx,
                source_arg: Some(source_idx as i32),
                render_idx,
                include_render_idx,
            }),
        );
    }

    fn direct_send_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, send_idx: usize) {
        core.add_update(
            source_idx,
            Update::DirectSend(DirectSendUpdate {
                path: PATH_GAIN_DIRECT.into(),
                source: source_idx,
                source_arg: Some(source_idx as i32),
                send_idx,
                include_send_idx: true,
            }),
        );
    }

    fn attribute_changed(
        &self,
        _core: &Arc<ReceiverCore>,
        _source_idx: usize,
        _attribute: SourceAttribute,
    ) {
    }

    fn logs_pos_format(&self) -> bool {
        false
    }
}

/// The WFS half: emits *only* renderer index 1, on the same spatial path.
pub(super) struct AudiorouterWfs;

impl Dialect for AudiorouterWfs {
    fn gain_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, render_idx: usize) {
        if render_idx != WFS_RENDER_IDX {
            return;
        }
        core.add_update(
            source_idx,
            Update::Gain(GainUpdate {
                path: PATH_GAIN_RENDERER.into(),
                source: source_idx,
                source_arg: Some(source_idx as i32),
                render_idx,
                include_render_idx: true,
            }),
        );
    }

    fn logs_pos_format(&self) -> bool {
        false
    }
}

pub(super) fn create_audiorouter(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
) -> Result<Receiver, ReceiverError> {
    let fmt = cfg.dataformat.clone().unwrap_or_else(|| "xyz".into());
    assemble(ctx, cfg, "Audiorouter".into(), fmt, 10, Box::new(Audiorouter))
}

pub(super) fn create_audiorouter_wfs(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
) -> Result<Receiver, ReceiverError> {
    let fmt = cfg.dataformat.clone().unwrap_or_else(|| "xyz".into());
    assemble(
        ctx,
        cfg,
        "AudiorouterWFS".into(),
        fmt,
        10,
        Box::new(AudiorouterWfs),
    )
}
