//! Seamless plugin dialect: DAW plugin instances that expect 1-based source
//! indices as the first argument.

use std::sync::Arc;

use crate::context::RouterContext;
use crate::updates::{GainUpdate, PositionUpdate, Update};

use super::{assemble, Dialect, Receiver, ReceiverConfig, ReceiverCore, ReceiverError};

const PATH_GAIN: &str = "/send/gain";

pub(super) struct SeamlessPlugin {
    position_path: String,
}

impl Dialect for SeamlessPlugin {
    fn position_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        core.add_update(
            source_idx,
            Update::Position(PositionUpdate {
                path: self.position_path.clone(),
                source: source_idx,
                source_arg: Some(source_idx as i32 + 1),
                coord_fmt: core.pos_format().to_string(),
                post_arg: None,
            }),
        );
    }

    fn gain_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, render_idx: usize) {
        core.add_update(
            source_idx,
            Update::Gain(GainUpdate {
                path: PATH_GAIN.into(),
                source: source_idx,
                source_arg: Some(source_idx as i32 + 1),
                render_idx,
                include_render_idx: true,
            }),
        );
    }
}

pub(super) fn create_seamless_plugin(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
) -> Result<Receiver, ReceiverError> {
    let fmt = cfg.dataformat.clone().unwrap_or_else(|| "xyz".into());
    let dialect = SeamlessPlugin {
        position_path: format!("/source/pos/{fmt}"),
    };
    assemble(
        ctx,
        cfg,
        "SeamlessPlugin".into(),
        fmt,
        10,
        Box::new(dialect),
    )
}
