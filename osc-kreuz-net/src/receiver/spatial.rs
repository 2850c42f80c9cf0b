//! Generic spatial dialect: positions in the configured format on
//! `/source/<format>`, nothing else.

use std::sync::Arc;

use crate::context::RouterContext;
use crate::updates::{PositionUpdate, Update};

use super::{assemble, Dialect, Receiver, ReceiverConfig, ReceiverCore, ReceiverError};

pub(super) struct Spatial {
    position_path: String,
}

impl Dialect for Spatial {
    fn position_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        core.add_update(
            source_idx,
            Update::Position(PositionUpdate {
                path: self.position_path.clone(),
                source: source_idx,
                source_arg: Some(source_idx as i32),
                coord_fmt: core.pos_format().to_string(),
                post_arg: None,
            }),
        );
    }
}

pub(super) fn create_spatial(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
) -> Result<Receiver, ReceiverError> {
    let fmt = cfg.dataformat.clone().unwrap_or_else(|| "xyz".into());
    let dialect = Spatial {
        position_path: format!("/source/{fmt}"),
    };
    assemble(ctx, cfg, "Spatial".into(), fmt, 10, Box::new(dialect))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_spatial_path_follows_format() {
        let ctx = test_ctx(2);
        let cfg = ReceiverConfig {
            kind: "spatial".into(),
            hostname: Some("127.0.0.1".into()),
            port: Some(58500),
            dataformat: Some("aedrad".into()),
            ..ReceiverConfig::default()
        };
        let receiver = gated_receiver(&ctx, &cfg);
        receiver.position_changed(0);
        receiver.gain_changed(0, 0);

        let updates = pending(receiver.core(), 0);
        assert_eq!(updates.len(), 1, "gain changes are ignored");
        assert_eq!(updates[0].path(), "/source/aedrad");
    }
}
