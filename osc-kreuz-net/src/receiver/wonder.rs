//! Wonder / TWonder wave-field-synthesis dialects.
//!
//! Wonder speaks the cwonder control vocabulary: positions carry a trailing
//! interpolation time, the planewave attribute is transmitted inverted as
//! `type`, and a planar source keeps its propagation angle in sync with the
//! azimuth. TWonder additionally replaces cwonder itself: it greets every
//! renderer with the room geometry and persists its endpoints.

use std::sync::Arc;

use log::{error, warn};
use rosc::OscType;

use osc_kreuz_types::SourceAttribute;

use crate::context::RouterContext;
use crate::state_file::StateFile;
use crate::updates::{AttributeUpdate, OscMessage, PositionUpdate, Update};

use super::{assemble, Dialect, Receiver, ReceiverConfig, ReceiverCore, ReceiverError};

const PATH_POSITION: &str = "/WONDER/source/position";
const PATH_DOPPLER: &str = "/WONDER/source/dopplerEffect";
const PATH_TYPE: &str = "/WONDER/source/type";
const PATH_ANGLE: &str = "/WONDER/source/angle";

const PATH_MAX_NO_SOURCES: &str = "/WONDER/global/maxNoSources";
const PATH_RENDER_POLYGON: &str = "/WONDER/global/renderpolygon";
const PATH_ACTIVATE_SOURCE: &str = "/WONDER/source/activate";

const DEFAULT_INTERVAL_MS: u64 = 50;

pub(super) struct Wonder {
    position_path: String,
    interpol_time: f32,
    link_position_and_angle: bool,
}

impl Wonder {
    fn new(position_path: String, interval_ms: u64) -> Self {
        Wonder {
            position_path,
            interpol_time: interval_ms as f32 / 1000.0,
            link_position_and_angle: true,
        }
    }

    fn planewave_is_set(&self, core: &ReceiverCore, source_idx: usize) -> bool {
        core.context()
            .sources
            .get(source_idx)
            .and_then(|s| s.lock().ok())
            .map(|s| s.attribute(SourceAttribute::Planewave) != 0.0)
            .unwrap_or(false)
    }

    /// A planar wavefront has no position, only a direction; derive the
    /// outgoing angle from the current azimuth.
    fn push_auto_angle(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        core.add_update(
            source_idx,
            Update::Position(PositionUpdate {
                path: PATH_ANGLE.into(),
                source: source_idx,
                source_arg: Some(source_idx as i32),
                coord_fmt: "azim".into(),
                post_arg: Some(self.interpol_time),
            }),
        );
    }
}

impl Dialect for Wonder {
    fn position_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        core.add_update(
            source_idx,
            Update::Position(PositionUpdate {
                path: self.position_path.clone(),
                source: source_idx,
                source_arg: Some(source_idx as i32),
                coord_fmt: core.pos_format().to_string(),
                post_arg: Some(self.interpol_time),
            }),
        );

        if self.link_position_and_angle && self.planewave_is_set(core, source_idx) {
            self.push_auto_angle(core, source_idx);
        }
    }

    fn attribute_changed(
        &self,
        core: &Arc<ReceiverCore>,
        source_idx: usize,
        attribute: SourceAttribute,
    ) {
        match attribute {
            SourceAttribute::Planewave => {
                core.add_update(
                    source_idx,
                    Update::WonderPlanewave(AttributeUpdate {
                        path: PATH_TYPE.into(),
                        source: source_idx,
                        source_arg: Some(source_idx as i32),
                        attribute,
                        include_attribute_name: false,
                        post_arg: None,
                    }),
                );
                if self.planewave_is_set(core, source_idx) {
                    self.push_auto_angle(core, source_idx);
                }
            }
            SourceAttribute::Angle => {
                core.add_update(
                    source_idx,
                    Update::Attribute(AttributeUpdate {
                        path: PATH_ANGLE.into(),
                        source: source_idx,
                        source_arg: Some(source_idx as i32),
                        attribute,
                        include_attribute_name: false,
                        post_arg: Some(self.interpol_time),
                    }),
                );
            }
            SourceAttribute::Doppler => {
                core.add_update(
                    source_idx,
                    Update::Attribute(AttributeUpdate {
                        path: PATH_DOPPLER.into(),
                        source: source_idx,
                        source_arg: Some(source_idx as i32),
                        attribute,
                        include_attribute_name: false,
                        post_arg: None,
                    }),
                );
            }
        }
    }
}

pub(super) struct TWonder {
    wonder: Wonder,
    multicast: bool,
    state_file: Option<StateFile>,
}

impl TWonder {
    /// Greet a renderer with the global state it would normally get from
    /// cwonder: source count, room polygon, active sources.
    fn send_room_information(&self, core: &ReceiverCore, hostname: &str, port: u16) {
        let settings = &core.context().settings;
        let mut msgs = vec![OscMessage::new(
            PATH_MAX_NO_SOURCES,
            vec![OscType::Int(settings.number_sources as i32)],
        )];

        let mut polygon_args: Vec<OscType> = vec![
            OscType::String(settings.room_name.clone()),
            OscType::Int(settings.room_polygon.len() as i32),
        ];
        for point in &settings.room_polygon {
            polygon_args.extend(point.iter().map(|p| OscType::Float(*p as f32)));
        }
        if settings.room_polygon.is_empty() {
            warn!(target: "receiver", "room polygon has no points");
        }
        msgs.push(OscMessage::new(PATH_RENDER_POLYGON, polygon_args));

        for i in 0..settings.number_sources {
            msgs.push(OscMessage::new(
                PATH_ACTIVATE_SOURCE,
                vec![OscType::Int(i as i32)],
            ));
        }

        core.send_messages(&msgs, Some((hostname, port)));
    }
}

impl Dialect for TWonder {
    fn position_changed(&self, core: &Arc<ReceiverCore>, source_idx: usize) {
        self.wonder.position_changed(core, source_idx);
    }

    fn attribute_changed(
        &self,
        core: &Arc<ReceiverCore>,
        source_idx: usize,
        attribute: SourceAttribute,
    ) {
        self.wonder.attribute_changed(core, source_idx, attribute);
    }

    fn endpoint_added(&self, _core: &Arc<ReceiverCore>, hostname: &str, port: u16) {
        if self.multicast {
            return;
        }
        if let Some(state_file) = &self.state_file {
            if let Err(e) = state_file.append(hostname, port) {
                error!(
                    target: "receiver",
                    "could not persist twonder endpoint {}:{}: {}", hostname, port, e
                );
            }
        }
    }

    fn stream_connect(&self, core: &Arc<ReceiverCore>, hostname: &str, port: u16) -> bool {
        if core.context().settings.room_polygon.is_empty() {
            error!(
                target: "receiver",
                "can't connect twonder because no room_polygon was specified in config"
            );
            return true;
        }

        if !self.multicast && !core.has_endpoint(hostname, port) {
            core.add_endpoint(hostname, port);
            self.endpoint_added(core, hostname, port);
        }

        self.send_room_information(core, hostname, port);
        true
    }
}

pub(super) fn create_wonder(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
) -> Result<Receiver, ReceiverError> {
    let fmt = cfg.dataformat.clone().unwrap_or_else(|| "xy".into());
    let interval = cfg.updateintervall.unwrap_or(DEFAULT_INTERVAL_MS);
    let dialect = Wonder::new(PATH_POSITION.into(), interval);
    assemble(
        ctx,
        cfg,
        "Wonder".into(),
        fmt,
        DEFAULT_INTERVAL_MS,
        Box::new(dialect),
    )
}

/// `state_file` override is for tests; `None` uses the XDG state location.
pub(super) fn create_twonder(
    ctx: &Arc<RouterContext>,
    cfg: &ReceiverConfig,
    state_file: Option<StateFile>,
) -> Result<Receiver, ReceiverError> {
    if ctx.settings.room_polygon.is_empty() {
        return Err(ReceiverError::MissingRoomPolygon);
    }

    let fmt = cfg.dataformat.clone().unwrap_or_else(|| "xy".into());
    // 3D positions when the renderer consumes full xyz
    let position_path = if fmt == "xyz" {
        format!("{PATH_POSITION}3D")
    } else {
        PATH_POSITION.into()
    };

    let interval = cfg.updateintervall.unwrap_or(DEFAULT_INTERVAL_MS);
    let dialect = TWonder {
        wonder: Wonder::new(position_path, interval),
        multicast: cfg.multicast.unwrap_or(false),
        state_file: state_file.or_else(|| StateFile::for_dialect("twonder")),
    };
    assemble(
        ctx,
        cfg,
        "TWonder".into(),
        fmt,
        DEFAULT_INTERVAL_MS,
        Box::new(dialect),
    )
}
