//! SuperCollider spatialisation engine: positions as `aed` on a fixed path.

use std::sync::Arc;

use crate::context::RouterContext;
use crate::updates::{PositionUpdate, Update};

use super::{assemble, Dialect, Receiver, ReceiverConfig, ReceiverCore, ReceiverError};

const PATH_POSITION: &str = "/source/pos/aed";

pub(super) struct SuperColliderEngine;

impl Dialect for SuperColliderEngine {
    fn position_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        core.add_update(
            source_idx,
            Update::Position(PositionUpdate {
                path: PATH_POSITION.into(),
                source: source_idx,
                source_arg: Some(source_idx as i32),
                coord_fmt: core.pos_format().to_string(),
                post_arg: None,
            }),
        );
    }
}

pub(super) fn create_supercollider(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
) -> Result<Receiver, ReceiverError> {
    let fmt = cfg.dataformat.clone().unwrap_or_else(|| "aed".into());
    assemble(
        ctx,
        cfg,
        "SuperColliderEngine".into(),
        fmt,
        10,
        Box::new(SuperColliderEngine),
    )
}
