//! Canonical per-source state: position, per-renderer gains, direct sends,
//! attributes, and the UI-vs-automation write arbitration.

use std::time::Instant;

use crate::coordinates::{
    parse_format, Coordinate, CoordinateKey, CoordinateSystem, ElevationWrap, FormatError,
};

/// Settings shared by every source. Replaces the class-level global config of
/// earlier designs with an explicit context (one copy per router).
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub renderer_count: usize,
    pub direct_send_count: usize,
    pub max_gain: f64,
    pub send_changes_only: bool,
    /// Seconds a UI write blocks automation writes on the same channel.
    /// Zero disables UI precedence entirely.
    pub data_port_timeout: f64,
    /// Floor applied to the distance component on polar input paths.
    pub min_dist: f64,
    pub coordinate_scaling_factor: f64,
    pub reflect_elevation: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings {
            renderer_count: 3,
            direct_send_count: 32,
            max_gain: 2.0,
            send_changes_only: true,
            data_port_timeout: 1.0,
            min_dist: 0.0,
            coordinate_scaling_factor: 1.0,
            reflect_elevation: false,
        }
    }
}

/// The small per-source attribute vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceAttribute {
    Planewave,
    Doppler,
    Angle,
}

impl SourceAttribute {
    pub const ALL: [SourceAttribute; 3] = [
        SourceAttribute::Planewave,
        SourceAttribute::Doppler,
        SourceAttribute::Angle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceAttribute::Planewave => "planewave",
            SourceAttribute::Doppler => "doppler",
            SourceAttribute::Angle => "angle",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "planewave" => Some(SourceAttribute::Planewave),
            "doppler" => Some(SourceAttribute::Doppler),
            "angle" => Some(SourceAttribute::Angle),
            _ => None,
        }
    }
}

/// Per-channel UI precedence state.
#[derive(Debug, Clone)]
struct UiLock {
    last_ui: Instant,
    blocked: bool,
}

impl UiLock {
    fn new() -> Self {
        UiLock {
            last_ui: Instant::now(),
            blocked: false,
        }
    }

    /// A UI write always passes and arms the block. An automation write is
    /// rejected while the block is armed and the timeout has not elapsed.
    fn should_process(&mut self, from_ui: bool, timeout: f64) -> bool {
        if from_ui {
            self.blocked = true;
            self.last_ui = Instant::now();
            return true;
        }
        if timeout == 0.0 {
            return true;
        }
        if self.blocked && self.last_ui.elapsed().as_secs_f64() > timeout {
            self.blocked = false;
        }
        !self.blocked
    }
}

/// Three parallel position representations with lazy reconversion.
///
/// Exactly the systems a write has touched are valid; any read in another
/// system reconverts on demand from a valid one.
#[derive(Debug, Clone)]
struct PositionStore {
    repr: [Coordinate; 3],
    valid: [bool; 3],
}

fn slot(system: CoordinateSystem) -> usize {
    match system {
        CoordinateSystem::Cartesian => 0,
        CoordinateSystem::Polar => 1,
        CoordinateSystem::PolarRadians => 2,
    }
}

impl PositionStore {
    fn new(elevation_wrap: ElevationWrap) -> Self {
        PositionStore {
            repr: [
                Coordinate::new_cartesian(0.0, 1.0, 0.0),
                Coordinate::new_polar(0.0, 0.0, 1.0).with_elevation_wrap(elevation_wrap),
                Coordinate::new_polar_radians(0.0, 0.0, 1.0).with_elevation_wrap(elevation_wrap),
            ],
            valid: [true, false, false],
        }
    }

    /// Make `target` valid, converting from a valid representation.
    /// Returns whether a reconversion actually happened.
    fn ensure(&mut self, target: CoordinateSystem) -> bool {
        let t = slot(target);
        if self.valid[t] {
            return false;
        }
        // prefer the polar sibling for pure angle rescales, then fall back to
        // whichever representation is valid
        let preference: [CoordinateSystem; 2] = match target {
            CoordinateSystem::Cartesian => {
                [CoordinateSystem::Polar, CoordinateSystem::PolarRadians]
            }
            CoordinateSystem::Polar => {
                [CoordinateSystem::PolarRadians, CoordinateSystem::Cartesian]
            }
            CoordinateSystem::PolarRadians => {
                [CoordinateSystem::Polar, CoordinateSystem::Cartesian]
            }
        };
        for from in preference {
            if self.valid[slot(from)] {
                let converted = self.repr[slot(from)].convert_to(target);
                self.repr[t].set_all(converted);
                self.valid[t] = true;
                return true;
            }
        }
        // no representation valid at all cannot happen; a write always leaves
        // its own system valid
        self.valid[t] = true;
        true
    }
}

/// One logical sound object.
pub struct Source {
    id: usize,
    settings: SourceSettings,
    position: PositionStore,
    renderer_gains: Vec<f64>,
    direct_sends: Vec<f64>,
    planewave: f64,
    doppler: f64,
    angle: f64,
    lock_position: UiLock,
    lock_attribute: UiLock,
    lock_gains: Vec<UiLock>,
    lock_direct_sends: Vec<UiLock>,
}

impl Source {
    /// `id` is the 1-based source number used on the wire.
    pub fn new(id: usize, settings: SourceSettings) -> Self {
        let elevation_wrap = if settings.reflect_elevation {
            ElevationWrap::Reflect
        } else {
            ElevationWrap::Modulo
        };
        Source {
            id,
            position: PositionStore::new(elevation_wrap),
            renderer_gains: vec![0.0; settings.renderer_count],
            direct_sends: vec![0.0; settings.direct_send_count],
            planewave: 0.0,
            doppler: 0.0,
            angle: 0.0,
            lock_position: UiLock::new(),
            lock_attribute: UiLock::new(),
            lock_gains: (0..settings.renderer_count).map(|_| UiLock::new()).collect(),
            lock_direct_sends: (0..settings.direct_send_count)
                .map(|_| UiLock::new())
                .collect(),
            settings,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Write position components in the given format.
    ///
    /// Returns whether downstream receivers should be notified: `false` when
    /// the write was blocked by UI precedence, or when change-only emission
    /// is on and nothing changed. A reconversion of a stale representation
    /// forces `true` regardless of numeric equality.
    pub fn set_position(
        &mut self,
        format: &str,
        values: &[f64],
        from_ui: bool,
    ) -> Result<bool, FormatError> {
        let (system, keys) = parse_format(format)?;
        if values.len() != keys.len() {
            return Err(FormatError::ValueCount {
                expected: keys.len(),
                got: values.len(),
            });
        }

        let timeout = self.settings.data_port_timeout;
        if !self.lock_position.should_process(from_ui, timeout) {
            return Ok(false);
        }

        let mut changed = false;

        // a partial write into a stale representation first has to pull that
        // representation up to date
        let full = keys.len() == 3;
        if !self.position.valid[slot(system)] && !full {
            self.position.ensure(system);
            changed = true;
        }

        // scaling and the polar-only distance floor happen before the
        // equality comparison
        let scale = self.settings.coordinate_scaling_factor;
        let adjusted: Vec<f64> = keys
            .iter()
            .zip(values.iter())
            .map(|(key, val)| match key {
                CoordinateKey::D => (val * scale).max(self.settings.min_dist),
                k if k.is_linear() => val * scale,
                _ => *val,
            })
            .collect();

        let wrote = self.position.repr[slot(system)].set_keys(&keys, &adjusted, 1.0)?;
        if self.settings.send_changes_only {
            changed |= wrote;
        } else {
            changed = true;
        }

        self.position.valid = [false, false, false];
        self.position.valid[slot(system)] = true;

        Ok(changed)
    }

    /// Read position components in the given format.
    pub fn get_position(&mut self, format: &str) -> Result<Vec<f64>, FormatError> {
        let (system, keys) = parse_format(format)?;
        self.position.ensure(system);
        self.position.repr[slot(system)].get(&keys)
    }

    pub fn set_renderer_gain(&mut self, renderer_idx: usize, gain: f64, from_ui: bool) -> bool {
        if renderer_idx >= self.renderer_gains.len() {
            return false;
        }
        let timeout = self.settings.data_port_timeout;
        if !self.lock_gains[renderer_idx].should_process(from_ui, timeout) {
            return false;
        }
        let gain = gain.clamp(0.0, self.settings.max_gain);
        if self.settings.send_changes_only && self.renderer_gains[renderer_idx] == gain {
            return false;
        }
        self.renderer_gains[renderer_idx] = gain;
        true
    }

    pub fn renderer_gain(&self, renderer_idx: usize) -> f64 {
        self.renderer_gains.get(renderer_idx).copied().unwrap_or(0.0)
    }

    pub fn renderer_gains(&self) -> &[f64] {
        &self.renderer_gains
    }

    pub fn set_direct_send(&mut self, send_idx: usize, gain: f64, from_ui: bool) -> bool {
        if send_idx >= self.direct_sends.len() {
            return false;
        }
        let timeout = self.settings.data_port_timeout;
        if !self.lock_direct_sends[send_idx].should_process(from_ui, timeout) {
            return false;
        }
        let gain = gain.clamp(0.0, self.settings.max_gain);
        if self.settings.send_changes_only && self.direct_sends[send_idx] == gain {
            return false;
        }
        self.direct_sends[send_idx] = gain;
        true
    }

    pub fn direct_send(&self, send_idx: usize) -> f64 {
        self.direct_sends.get(send_idx).copied().unwrap_or(0.0)
    }

    pub fn set_attribute(&mut self, attribute: SourceAttribute, value: f64, from_ui: bool) -> bool {
        let timeout = self.settings.data_port_timeout;
        if !self.lock_attribute.should_process(from_ui, timeout) {
            return false;
        }
        let change_only = self.settings.send_changes_only;
        let stored = self.attribute_slot(attribute);
        if change_only && *stored == value {
            return false;
        }
        *stored = value;
        true
    }

    pub fn attribute(&self, attribute: SourceAttribute) -> f64 {
        match attribute {
            SourceAttribute::Planewave => self.planewave,
            SourceAttribute::Doppler => self.doppler,
            SourceAttribute::Angle => self.angle,
        }
    }

    fn attribute_slot(&mut self, attribute: SourceAttribute) -> &mut f64 {
        match attribute {
            SourceAttribute::Planewave => &mut self.planewave,
            SourceAttribute::Doppler => &mut self.doppler,
            SourceAttribute::Angle => &mut self.angle,
        }
    }
}
