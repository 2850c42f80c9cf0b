//! Dynamically subscribed view clients (GUIs and monitors).
//!
//! A view client picks its coordinate format and one of two emission modes
//! at subscription time: *index-in-path* bakes the 1-based source number
//! into the address, *index-in-value* sends it as the first argument on
//! generic paths. Direct sends and attributes always use value mode.

use std::sync::Arc;

use osc_kreuz_types::SourceAttribute;

use crate::context::RouterContext;
use crate::updates::{
    AttributeUpdate, DirectSendUpdate, GainUpdate, PositionUpdate, Update,
};

use super::{assemble, Dialect, Receiver, ReceiverConfig, ReceiverCore, ReceiverError};

const PATH_GAIN: &str = "/source/send";
const PATH_DIRECT: &str = "/source/direct";
const PATH_ATTRIBUTE: &str = "/source/attribute";

const DEFAULT_FORMAT: &str = "xyz";
const DEFAULT_INTERVAL_MS: u64 = 10;

pub(super) struct ViewClient {
    index_in_path: bool,
    /// `/source/{i}/{fmt}`, one per source.
    position_paths: Vec<String>,
    /// `/source/{i}/{renderer_name}`, per source per renderer.
    gain_paths: Vec<Vec<String>>,
    /// `/source/{fmt}` for value mode.
    base_position_path: String,
}

impl ViewClient {
    fn new(ctx: &RouterContext, fmt: &str, index_in_path: bool) -> Self {
        let n = ctx.settings.number_sources;
        let position_paths = (1..=n).map(|i| format!("/source/{i}/{fmt}")).collect();
        let gain_paths = (1..=n)
            .map(|i| {
                ctx.settings
                    .render_units
                    .iter()
                    .map(|unit| format!("/source/{i}/{unit}"))
                    .collect()
            })
            .collect();
        ViewClient {
            index_in_path,
            position_paths,
            gain_paths,
            base_position_path: format!("/source/{fmt}"),
        }
    }
}

impl Dialect for ViewClient {
    fn position_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        let (path, source_arg) = if self.index_in_path {
            match self.position_paths.get(source_idx) {
                Some(path) => (path.clone(), None),
                None => return,
            }
        } else {
            (self.base_position_path.clone(), Some(source_idx as i32 + 1))
        };
        core.add_update(
            source_idx,
            Update::Position(PositionUpdate {
                path,
                source: source_idx,
                source_arg,
                coord_fmt: core.pos_format().to_string(),
                post_arg: None,
            }),
        );
    }

    fn gain_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, render_idx: usize) {
        let (path, source_arg, include_render_idx) = if self.index_in_path {
            match self
                .gain_paths
                .get(source_idx)
                .and_then(|paths| paths.get(render_idx))
            {
                Some(path) => (path.clone(), None, false),
                None => return,
            }
        } else {
            (PATH_GAIN.to_string(), Some(source_idx as i32 + 1), true)
        };
        core.add_update(
            source_idx,
            Update::Gain(GainUpdate {
                path,
                source: source_idx,
                source_arg,
                render_idx,
                include_render_idx,
            }),
        );
    }

    fn direct_send_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize, send_idx: usize) {
        core.add_update(
            source_idx,
            Update::DirectSend(DirectSendUpdate {
                path: PATH_DIRECT.into(),
                source: source_idx,
                source_arg: Some(source_idx as i32 + 1),
                send_idx,
                include_send_idx: true,
            }),
        );
    }

    fn attribute_changed(
        &self,
        core: &Arc<ReceiverCore>,
        source_idx: usize,
        attribute: SourceAttribute,
    ) {
        core.add_update(
            source_idx,
            Update::Attribute(AttributeUpdate {
                path: PATH_ATTRIBUTE.into(),
                source: source_idx,
                source_arg: Some(source_idx as i32 + 1),
                attribute,
                include_attribute_name: true,
                post_arg: None,
            }),
        );
    }
}

/// Build a view client for a subscription. The caller is responsible for
/// the state replay and the liveness watchdog.
pub fn create_view_client(
    ctx: &Arc<RouterContext>,
    name: &str,
    hostname: &str,
    port: u16,
    coord_fmt: Option<&str>,
    index_in_path: bool,
    update_interval_ms: Option<u64>,
) -> Result<Receiver, ReceiverError> {
    let fmt = coord_fmt.unwrap_or(DEFAULT_FORMAT).to_string();
    let cfg = ReceiverConfig {
        kind: "viewclient".into(),
        hostname: Some(hostname.to_string()),
        port: Some(port),
        updateintervall: update_interval_ms,
        ..ReceiverConfig::default()
    };
    let dialect = ViewClient::new(ctx, &fmt, index_in_path);
    assemble(
        ctx,
        &cfg,
        format!("ViewClient_{name}"),
        fmt,
        DEFAULT_INTERVAL_MS,
        Box::new(dialect),
    )
}
