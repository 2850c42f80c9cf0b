//! Pending output deltas and their serialisation to wire messages.
//!
//! An [`Update`] does not carry the value it will send. It records *what* to
//! read from which source; the value is read when the receiver flushes. Two
//! updates are equal when they would write to the same `(path, source)`
//! slot, so a burst of writes to one channel collapses to a single pending
//! update and the last value wins.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use rosc::OscType;

use osc_kreuz_types::{Source, SourceAttribute};

/// One OSC message ready to be encoded and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub path: String,
    pub values: Vec<OscType>,
}

impl OscMessage {
    pub fn new(path: impl Into<String>, values: Vec<OscType>) -> Self {
        OscMessage {
            path: path.into(),
            values,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub path: String,
    /// 0-based index into the source array.
    pub source: usize,
    /// Wire-level source index, if the dialect sends it as the first value.
    pub source_arg: Option<i32>,
    pub coord_fmt: String,
    /// Trailing interpolation time, for engines that fade between positions.
    pub post_arg: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct GainUpdate {
    pub path: String,
    pub source: usize,
    pub source_arg: Option<i32>,
    pub render_idx: usize,
    pub include_render_idx: bool,
}

#[derive(Debug, Clone)]
pub struct DirectSendUpdate {
    pub path: String,
    pub source: usize,
    pub source_arg: Option<i32>,
    pub send_idx: usize,
    pub include_send_idx: bool,
}

#[derive(Debug, Clone)]
pub struct AttributeUpdate {
    pub path: String,
    pub source: usize,
    pub source_arg: Option<i32>,
    pub attribute: SourceAttribute,
    pub include_attribute_name: bool,
    pub post_arg: Option<f32>,
}

/// A pending state delta, keyed for set-coalescing.
#[derive(Debug, Clone)]
pub enum Update {
    Position(PositionUpdate),
    Gain(GainUpdate),
    DirectSend(DirectSendUpdate),
    Attribute(AttributeUpdate),
    /// The Wonder `type` attribute inverts the planewave boolean on the wire.
    WonderPlanewave(AttributeUpdate),
}

impl Update {
    fn kind(&self) -> u8 {
        match self {
            Update::Position(_) => 0,
            Update::Gain(_) => 1,
            Update::DirectSend(_) => 2,
            Update::Attribute(_) => 3,
            Update::WonderPlanewave(_) => 4,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Update::Position(u) => &u.path,
            Update::Gain(u) => &u.path,
            Update::DirectSend(u) => &u.path,
            Update::Attribute(u) | Update::WonderPlanewave(u) => &u.path,
        }
    }

    pub fn source(&self) -> usize {
        match self {
            Update::Position(u) => u.source,
            Update::Gain(u) => u.source,
            Update::DirectSend(u) => u.source,
            Update::Attribute(u) | Update::WonderPlanewave(u) => u.source,
        }
    }

    /// Serialise against the live source state. The value emitted is whatever
    /// the source holds *now*, not at enqueue time.
    pub fn to_message(&self, sources: &[Mutex<Source>]) -> Option<OscMessage> {
        let Ok(mut source) = sources.get(self.source())?.lock() else {
            return None;
        };

        let mut values = Vec::new();

        match self {
            Update::Position(u) => {
                if let Some(idx) = u.source_arg {
                    values.push(OscType::Int(idx));
                }
                let coords = source.get_position(&u.coord_fmt).ok()?;
                values.extend(coords.iter().map(|v| OscType::Float(*v as f32)));
                if let Some(t) = u.post_arg {
                    values.push(OscType::Float(t));
                }
                Some(OscMessage::new(u.path.clone(), values))
            }
            Update::Gain(u) => {
                if let Some(idx) = u.source_arg {
                    values.push(OscType::Int(idx));
                }
                if u.include_render_idx {
                    values.push(OscType::Int(u.render_idx as i32));
                }
                values.push(OscType::Float(source.renderer_gain(u.render_idx) as f32));
                Some(OscMessage::new(u.path.clone(), values))
            }
            Update::DirectSend(u) => {
                if let Some(idx) = u.source_arg {
                    values.push(OscType::Int(idx));
                }
                if u.include_send_idx {
                    values.push(OscType::Int(u.send_idx as i32));
                }
                values.push(OscType::Float(source.direct_send(u.send_idx) as f32));
                Some(OscMessage::new(u.path.clone(), values))
            }
            Update::Attribute(u) => {
                if let Some(idx) = u.source_arg {
                    values.push(OscType::Int(idx));
                }
                if u.include_attribute_name {
                    values.push(OscType::String(u.attribute.as_str().to_string()));
                }
                let raw = source.attribute(u.attribute);
                values.push(attribute_value(u.attribute, raw));
                if let Some(t) = u.post_arg {
                    values.push(OscType::Float(t));
                }
                Some(OscMessage::new(u.path.clone(), values))
            }
            Update::WonderPlanewave(u) => {
                if let Some(idx) = u.source_arg {
                    values.push(OscType::Int(idx));
                }
                // historical encoding: type 1 means point source
                let planewave = source.attribute(u.attribute) != 0.0;
                values.push(OscType::Int(i32::from(!planewave)));
                Some(OscMessage::new(u.path.clone(), values))
            }
        }
    }
}

fn attribute_value(attribute: SourceAttribute, raw: f64) -> OscType {
    match attribute {
        SourceAttribute::Angle => OscType::Float(raw as f32),
        SourceAttribute::Planewave | SourceAttribute::Doppler => {
            OscType::Int(i32::from(raw != 0.0))
        }
    }
}

impl PartialEq for Update {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.path() == other.path()
            && self.source() == other.source()
    }
}

impl Eq for Update {}

impl Hash for Update {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.path().hash(state);
        self.source().hash(state);
    }
}

/// Insert an update, replacing any equal pending one so the newest payload
/// (pre/post arguments, coordinate format) survives.
pub fn push_update(stack: &mut HashSet<Update>, update: Update) {
    stack.replace(update);
}

#[cfg(test)]
mod tests {
    use super::*;
    use osc_kreuz_types::SourceSettings;

    fn sources(n: usize) -> Vec<Mutex<Source>> {
        let settings = SourceSettings {
            data_port_timeout: 0.0,
            ..SourceSettings::default()
        };
        (1..=n)
            .map(|id| Mutex::new(Source::new(id, settings.clone())))
            .collect()
    }

    fn position(path: &str, source: usize) -> Update {
        Update::Position(PositionUpdate {
            path: path.into(),
            source,
            source_arg: Some(source as i32),
            coord_fmt: "xyz".into(),
            post_arg: None,
        })
    }

    #[test]
    fn test_set_equality_ignores_payload() {
        let a = Update::Position(PositionUpdate {
            path: "/source/position".into(),
            source: 3,
            source_arg: Some(3),
            coord_fmt: "xyz".into(),
            post_arg: None,
        });
        let b = Update::Position(PositionUpdate {
            path: "/source/position".into(),
            source: 3,
            source_arg: Some(3),
            coord_fmt: "aed".into(),
            post_arg: Some(0.05),
        });
        assert_eq!(a, b);

        let mut stack = HashSet::new();
        push_update(&mut stack, a);
        push_update(&mut stack, b);
        assert_eq!(stack.len(), 1);
        // the replacement wins
        match stack.iter().next().unwrap() {
            Update::Position(u) => assert_eq!(u.coord_fmt, "aed"),
            other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn test_different_sources_do_not_coalesce() {
        let mut stack = HashSet::new();
        push_update(&mut stack, position("/source/position", 0));
        push_update(&mut stack, position("/source/position", 1));
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_different_kinds_do_not_coalesce() {
        let mut stack = HashSet::new();
        push_update(&mut stack, position("/p", 0));
        push_update(
            &mut stack,
            Update::Gain(GainUpdate {
                path: "/p".into(),
                source: 0,
                source_arg: None,
                render_idx: 0,
                include_render_idx: false,
            }),
        );
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_position_message_reads_live_value() {
        let sources = sources(2);
        let update = position("/source/position", 1);
        sources[1]
            .lock()
            .unwrap()
            .set_position("xyz", &[4.0, 5.0, 6.0], true)
            .unwrap();

        let msg = update.to_message(&sources).unwrap();
        assert_eq!(msg.path, "/source/position");
        assert_eq!(
            msg.values,
            vec![
                OscType::Int(1),
                OscType::Float(4.0),
                OscType::Float(5.0),
                OscType::Float(6.0),
            ]
        );
    }

    #[test]
    fn test_gain_message_shape() {
        let sources = sources(1);
        sources[0].lock().unwrap().set_renderer_gain(2, 0.4, true);
        let update = Update::Gain(GainUpdate {
            path: "/source/send".into(),
            source: 0,
            source_arg: Some(1),
            render_idx: 2,
            include_render_idx: true,
        });
        let msg = update.to_message(&sources).unwrap();
        assert_eq!(
            msg.values,
            vec![OscType::Int(1), OscType::Int(2), OscType::Float(0.4)]
        );
    }

    #[test]
    fn test_planewave_inversion() {
        let sources = sources(1);
        let update = Update::WonderPlanewave(AttributeUpdate {
            path: "/WONDER/source/type".into(),
            source: 0,
            source_arg: Some(0),
            attribute: SourceAttribute::Planewave,
            include_attribute_name: false,
            post_arg: None,
        });

        let msg = update.to_message(&sources).unwrap();
        assert_eq!(msg.values, vec![OscType::Int(0), OscType::Int(1)]);

        sources[0]
            .lock()
            .unwrap()
            .set_attribute(SourceAttribute::Planewave, 1.0, true);
        let msg = update.to_message(&sources).unwrap();
        assert_eq!(msg.values, vec![OscType::Int(0), OscType::Int(0)]);
    }

    #[test]
    fn test_attribute_message_with_name() {
        let sources = sources(1);
        sources[0]
            .lock()
            .unwrap()
            .set_attribute(SourceAttribute::Angle, 90.0, true);
        let update = Update::Attribute(AttributeUpdate {
            path: "/source/attribute".into(),
            source: 0,
            source_arg: Some(1),
            attribute: SourceAttribute::Angle,
            include_attribute_name: true,
            post_arg: None,
        });
        let msg = update.to_message(&sources).unwrap();
        assert_eq!(
            msg.values,
            vec![
                OscType::Int(1),
                OscType::String("angle".into()),
                OscType::Float(90.0),
            ]
        );
    }
}
