//! Coordinate kernel: three coordinate systems, format-string parsing and
//! spherical↔Cartesian conversion.
//!
//! Incoming OSC traffic addresses positions in a free mix of formats
//! ("xyz", "aed", "azim", "elevrad", …). A parsed format is a coordinate
//! system plus the subset of keys that a message carries.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{LazyLock, RwLock};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("invalid coordinate format {0:?}")]
    InvalidFormat(String),
    #[error("invalid coordinate key {0:?}")]
    InvalidKey(String),
    #[error("coordinate value count mismatch: expected {expected}, got {got}")]
    ValueCount { expected: usize, got: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateSystem {
    Cartesian,
    Polar,
    PolarRadians,
}

impl CoordinateSystem {
    /// The full key set of this system, in declaration order.
    pub fn keys(self) -> [CoordinateKey; 3] {
        match self {
            CoordinateSystem::Cartesian => {
                [CoordinateKey::X, CoordinateKey::Y, CoordinateKey::Z]
            }
            CoordinateSystem::Polar | CoordinateSystem::PolarRadians => {
                [CoordinateKey::A, CoordinateKey::E, CoordinateKey::D]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateKey {
    X,
    Y,
    Z,
    A,
    E,
    D,
}

impl CoordinateKey {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'x' => Some(CoordinateKey::X),
            'y' => Some(CoordinateKey::Y),
            'z' => Some(CoordinateKey::Z),
            'a' => Some(CoordinateKey::A),
            'e' => Some(CoordinateKey::E),
            'd' => Some(CoordinateKey::D),
            _ => None,
        }
    }

    /// Linear keys get multiplied by the coordinate scaling factor; angles don't.
    pub fn is_linear(self) -> bool {
        matches!(
            self,
            CoordinateKey::X | CoordinateKey::Y | CoordinateKey::Z | CoordinateKey::D
        )
    }
}

/// How out-of-range elevations are brought back into range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElevationWrap {
    /// Same modulo wrap as azimuth. Historical behaviour, kept for
    /// bit-compatibility with existing installations.
    #[default]
    Modulo,
    /// Reflect across ±90° so elevation stays on the hemisphere.
    Reflect,
}

const RADIANS_SUFFIX: &str = "rad";

static FORMAT_CACHE: LazyLock<RwLock<HashMap<String, ParsedFormat>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

const FORMAT_CACHE_CAP: usize = 128;

pub type ParsedFormat = (CoordinateSystem, Vec<CoordinateKey>);

fn long_alias(s: &str) -> Option<CoordinateKey> {
    match s {
        "azimuth" | "azim" => Some(CoordinateKey::A),
        "elevation" | "elev" => Some(CoordinateKey::E),
        "distance" | "dist" => Some(CoordinateKey::D),
        _ => None,
    }
}

/// Parse a coordinate format string ("aed", "xy", "azim", "elevrad", …) into
/// a coordinate system and the ordered keys the format addresses.
///
/// Results are cached process-wide; the same handful of format strings
/// arrives on every position message.
pub fn parse_format(format_str: &str) -> Result<ParsedFormat, FormatError> {
    if let Ok(cache) = FORMAT_CACHE.read() {
        if let Some(parsed) = cache.get(format_str) {
            return Ok(parsed.clone());
        }
    }

    let parsed = parse_format_uncached(format_str)?;

    if let Ok(mut cache) = FORMAT_CACHE.write() {
        if cache.len() < FORMAT_CACHE_CAP {
            cache.insert(format_str.to_string(), parsed.clone());
        }
    }
    Ok(parsed)
}

fn parse_format_uncached(format_str: &str) -> Result<ParsedFormat, FormatError> {
    let mut rest = format_str;
    let mut system = CoordinateSystem::Cartesian;

    if let Some(stripped) = rest.strip_suffix(RADIANS_SUFFIX) {
        rest = stripped;
        system = CoordinateSystem::PolarRadians;
    } else {
        match rest.chars().next().and_then(CoordinateKey::from_char) {
            Some(key) if matches!(key, CoordinateKey::A | CoordinateKey::E | CoordinateKey::D) => {
                system = CoordinateSystem::Polar;
            }
            Some(_) => {}
            None => return Err(FormatError::InvalidFormat(format_str.to_string())),
        }
    }

    let mut keys = Vec::new();

    // long aliases only exist for the polar families
    if system != CoordinateSystem::Cartesian {
        if let Some(key) = long_alias(rest) {
            keys.push(key);
            rest = "";
        }
    }

    for c in rest.chars() {
        match CoordinateKey::from_char(c) {
            Some(key) => keys.push(key),
            None => return Err(FormatError::InvalidKey(c.to_string())),
        }
    }

    if keys.is_empty() {
        return Err(FormatError::InvalidFormat(format_str.to_string()));
    }

    // reject keys that don't belong to the parsed system ("xrad", "ax", ...)
    let allowed = system.keys();
    if keys.iter().any(|k| !allowed.contains(k)) {
        return Err(FormatError::InvalidFormat(format_str.to_string()));
    }

    Ok((system, keys))
}

/// Wrap a value into a centered range: `[-range/2, range/2)`.
pub fn wrap_centered(val: f64, range: f64) -> f64 {
    let half = range / 2.0;
    ((val + half).rem_euclid(range)) - half
}

fn wrap_elevation(val: f64, range: f64, mode: ElevationWrap) -> f64 {
    let wrapped = if val < -range / 2.0 || val > range / 2.0 {
        wrap_centered(val, range)
    } else {
        val
    };
    match mode {
        ElevationWrap::Modulo => wrapped,
        ElevationWrap::Reflect => {
            let quarter = range / 4.0;
            if wrapped > quarter {
                range / 2.0 - wrapped
            } else if wrapped < -quarter {
                -range / 2.0 - wrapped
            } else {
                wrapped
            }
        }
    }
}

/// Spherical → Cartesian, angles in radians, elevation measured from the
/// equator: `x = d·cos(e)·cos(a)`, `y = d·cos(e)·sin(a)`, `z = d·sin(e)`.
pub fn aed_to_xyz(a: f64, e: f64, d: f64) -> [f64; 3] {
    [
        d * e.cos() * a.cos(),
        d * e.cos() * a.sin(),
        d * e.sin(),
    ]
}

/// Cartesian → spherical, angles in radians.
pub fn xyz_to_aed(x: f64, y: f64, z: f64) -> [f64; 3] {
    let dist = (x * x + y * y + z * z).sqrt();
    let azim = y.atan2(x);
    let elev = z.atan2((x * x + y * y).sqrt());
    [azim, elev, dist]
}

/// A position in one concrete coordinate system.
///
/// Values are stored in the declaration order of [`CoordinateSystem::keys`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    system: CoordinateSystem,
    values: [f64; 3],
    elevation_wrap: ElevationWrap,
}

impl Coordinate {
    pub fn new_cartesian(x: f64, y: f64, z: f64) -> Self {
        Coordinate {
            system: CoordinateSystem::Cartesian,
            values: [x, y, z],
            elevation_wrap: ElevationWrap::default(),
        }
    }

    pub fn new_polar(a: f64, e: f64, d: f64) -> Self {
        let mut c = Coordinate {
            system: CoordinateSystem::Polar,
            values: [a, e, d],
            elevation_wrap: ElevationWrap::default(),
        };
        c.validate();
        c
    }

    pub fn new_polar_radians(a: f64, e: f64, d: f64) -> Self {
        let mut c = Coordinate {
            system: CoordinateSystem::PolarRadians,
            values: [a, e, d],
            elevation_wrap: ElevationWrap::default(),
        };
        c.validate();
        c
    }

    pub fn with_elevation_wrap(mut self, mode: ElevationWrap) -> Self {
        self.elevation_wrap = mode;
        self.validate();
        self
    }

    pub fn system(&self) -> CoordinateSystem {
        self.system
    }

    /// Set all three components in declaration order.
    pub fn set_all(&mut self, values: [f64; 3]) {
        self.values = values;
        self.validate();
    }

    pub fn get_all(&self) -> [f64; 3] {
        self.values
    }

    /// Write the given components, scaling linear components by `scale`.
    ///
    /// Returns whether any stored component changed (exact comparison on the
    /// stored representation). Angle wrapping runs after a change.
    pub fn set_keys(
        &mut self,
        keys: &[CoordinateKey],
        values: &[f64],
        scale: f64,
    ) -> Result<bool, FormatError> {
        if keys.len() != values.len() {
            return Err(FormatError::ValueCount {
                expected: keys.len(),
                got: values.len(),
            });
        }

        let own_keys = self.system.keys();
        let mut changed = false;

        for (key, val) in keys.iter().zip(values.iter()) {
            let val = if key.is_linear() { val * scale } else { *val };
            let slot = own_keys
                .iter()
                .position(|k| k == key)
                .ok_or_else(|| FormatError::InvalidKey(format!("{key:?}")))?;
            if self.values[slot] != val {
                self.values[slot] = val;
                changed = true;
            }
        }

        if changed {
            self.validate();
        }
        Ok(changed)
    }

    /// Read the given components in the requested order.
    pub fn get(&self, keys: &[CoordinateKey]) -> Result<Vec<f64>, FormatError> {
        let own_keys = self.system.keys();
        keys.iter()
            .map(|key| {
                own_keys
                    .iter()
                    .position(|k| k == key)
                    .map(|slot| self.values[slot])
                    .ok_or_else(|| FormatError::InvalidKey(format!("{key:?}")))
            })
            .collect()
    }

    /// Wrap angles back into range after a write. Cartesian coordinates need
    /// no post-processing.
    fn validate(&mut self) {
        let range = match self.system {
            CoordinateSystem::Cartesian => return,
            CoordinateSystem::Polar => 360.0,
            CoordinateSystem::PolarRadians => 2.0 * PI,
        };
        if self.values[0] < -range / 2.0 || self.values[0] > range / 2.0 {
            self.values[0] = wrap_centered(self.values[0], range);
        }
        self.values[1] = wrap_elevation(self.values[1], range, self.elevation_wrap);
    }

    /// Convert to another system. Within the polar family this is a pure
    /// degree/radian rescale; across families it goes through the spherical
    /// transform.
    pub fn convert_to(&self, target: CoordinateSystem) -> [f64; 3] {
        let [v0, v1, v2] = self.values;
        match (self.system, target) {
            (a, b) if a == b => self.values,
            (CoordinateSystem::Polar, CoordinateSystem::PolarRadians) => {
                [v0.to_radians(), v1.to_radians(), v2]
            }
            (CoordinateSystem::PolarRadians, CoordinateSystem::Polar) => {
                [v0.to_degrees(), v1.to_degrees(), v2]
            }
            (CoordinateSystem::Polar, CoordinateSystem::Cartesian) => {
                aed_to_xyz(v0.to_radians(), v1.to_radians(), v2)
            }
            (CoordinateSystem::PolarRadians, CoordinateSystem::Cartesian) => {
                aed_to_xyz(v0, v1, v2)
            }
            (CoordinateSystem::Cartesian, CoordinateSystem::Polar) => {
                let [a, e, d] = xyz_to_aed(v0, v1, v2);
                [a.to_degrees(), e.to_degrees(), d]
            }
            (CoordinateSystem::Cartesian, CoordinateSystem::PolarRadians) => {
                xyz_to_aed(v0, v1, v2)
            }
            _ => unreachable!(),
        }
    }
}

/// Every coordinate format string the dispatcher binds paths for: the
/// non-empty ordered subsets of each key family plus the long aliases, with
/// their radians variants.
pub fn all_coordinate_formats() -> Vec<String> {
    let mut formats = Vec::new();

    for (letters, suffix) in [("xyz", ""), ("aed", ""), ("aed", RADIANS_SUFFIX)] {
        let chars: Vec<char> = letters.chars().collect();
        for mask in 1u8..(1 << chars.len()) {
            let combo: String = chars
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, c)| c)
                .collect();
            formats.push(format!("{combo}{suffix}"));
        }
    }

    for alias in ["azimuth", "azim", "elevation", "elev", "distance", "dist"] {
        formats.push(alias.to_string());
        formats.push(format!("{alias}{RADIANS_SUFFIX}"));
    }

    formats
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4 || (b != 0.0 && ((a - b) / b).abs() < 1e-6)
    }

    #[test]
    fn test_parse_common_formats() {
        let cases: [(&str, CoordinateSystem, &[CoordinateKey]); 8] = [
            (
                "aed",
                CoordinateSystem::Polar,
                &[CoordinateKey::A, CoordinateKey::E, CoordinateKey::D],
            ),
            (
                "aedrad",
                CoordinateSystem::PolarRadians,
                &[CoordinateKey::A, CoordinateKey::E, CoordinateKey::D],
            ),
            (
                "xyz",
                CoordinateSystem::Cartesian,
                &[CoordinateKey::X, CoordinateKey::Y, CoordinateKey::Z],
            ),
            ("x", CoordinateSystem::Cartesian, &[CoordinateKey::X]),
            ("distance", CoordinateSystem::Polar, &[CoordinateKey::D]),
            ("azim", CoordinateSystem::Polar, &[CoordinateKey::A]),
            (
                "elevrad",
                CoordinateSystem::PolarRadians,
                &[CoordinateKey::E],
            ),
            ("arad", CoordinateSystem::PolarRadians, &[CoordinateKey::A]),
        ];
        for (input, system, keys) in cases {
            let (parsed_system, parsed_keys) = parse_format(input).unwrap();
            assert_eq!(parsed_system, system, "system for {input}");
            assert_eq!(parsed_keys, keys, "keys for {input}");
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_format("").is_err());
        assert!(parse_format("rad").is_err());
        assert!(parse_format("foo").is_err());
        assert!(parse_format("xq").is_err());
        assert!(parse_format("xrad").is_err());
        assert!(parse_format("ax").is_err());
    }

    #[test]
    fn test_parse_cache_is_stable() {
        let first = parse_format("aed").unwrap();
        let second = parse_format("aed").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_azimuth_wrapping() {
        let c = Coordinate::new_polar(270.0, 0.0, 1.0);
        assert!(close(c.get_all()[0], -90.0));

        let c = Coordinate::new_polar_radians(1.5 * PI, 0.0, 1.0);
        assert!(close(c.get_all()[0], -0.5 * PI));
    }

    #[test]
    fn test_elevation_historical_wrap() {
        // elevation uses the azimuth formula, not hemisphere reflection
        let c = Coordinate::new_polar(0.0, 200.0, 1.0);
        assert!(close(c.get_all()[1], -160.0));
    }

    #[test]
    fn test_elevation_reflect_mode() {
        let c = Coordinate::new_polar(0.0, 100.0, 1.0).with_elevation_wrap(ElevationWrap::Reflect);
        assert!(close(c.get_all()[1], 80.0));
        let c = Coordinate::new_polar(0.0, -100.0, 1.0).with_elevation_wrap(ElevationWrap::Reflect);
        assert!(close(c.get_all()[1], -80.0));
    }

    #[test]
    fn test_azimuth_only_set() {
        let mut c = Coordinate::new_polar(90.0, 0.0, 1.0);
        c.set_keys(&[CoordinateKey::A], &[180.0], 1.0).unwrap();
        let [x, y, z] = c.convert_to(CoordinateSystem::Cartesian);
        assert!(close(x, -1.0));
        assert!(close(y, 0.0));
        assert!(close(z, 0.0));
    }

    #[test]
    fn test_set_keys_reports_change() {
        let mut c = Coordinate::new_cartesian(1.0, 2.0, 3.0);
        assert!(!c.set_keys(&[CoordinateKey::X], &[1.0], 1.0).unwrap());
        assert!(c.set_keys(&[CoordinateKey::X], &[1.5], 1.0).unwrap());
        assert!(c
            .set_keys(&[CoordinateKey::A], &[0.0], 1.0)
            .is_err());
    }

    #[test]
    fn test_set_keys_scales_linear_components() {
        let mut c = Coordinate::new_polar(0.0, 0.0, 1.0);
        c.set_keys(
            &[CoordinateKey::A, CoordinateKey::D],
            &[45.0, 2.0],
            0.5,
        )
        .unwrap();
        let got = c.get_all();
        assert!(close(got[0], 45.0), "angles are never scaled");
        assert!(close(got[2], 1.0));
    }

    #[test]
    fn test_conversion_round_trip() {
        for (a, e, d) in [
            (0.0, 0.0, 1.0),
            (45.0, 45.0, 3.0),
            (-120.0, 30.0, 0.5),
            (179.0, -60.0, 10.0),
        ] {
            let c = Coordinate::new_polar(a, e, d);
            let [x, y, z] = c.convert_to(CoordinateSystem::Cartesian);
            let back = Coordinate::new_cartesian(x, y, z).convert_to(CoordinateSystem::Polar);
            assert!(close(back[0], a), "azim {a}: got {}", back[0]);
            assert!(close(back[1], e), "elev {e}: got {}", back[1]);
            assert!(close(back[2], d), "dist {d}: got {}", back[2]);
        }
    }

    #[test]
    fn test_polar_to_cartesian_equator() {
        let c = Coordinate::new_polar(90.0, 0.0, 2.0);
        let [x, y, z] = c.convert_to(CoordinateSystem::Cartesian);
        assert!(close(x, 0.0));
        assert!(close(y, 2.0));
        assert!(close(z, 0.0));
    }

    #[test]
    fn test_degree_radian_rescale() {
        let c = Coordinate::new_polar(90.0, -45.0, 1.5);
        let [a, e, d] = c.convert_to(CoordinateSystem::PolarRadians);
        assert!(close(a, PI / 2.0));
        assert!(close(e, -PI / 4.0));
        assert!(close(d, 1.5));
    }

    #[test]
    fn test_all_coordinate_formats_parse() {
        let formats = all_coordinate_formats();
        // 7 per family times three families, plus 6 aliases in two variants
        assert_eq!(formats.len(), 33);
        for f in formats {
            parse_format(&f).unwrap_or_else(|e| panic!("{f}: {e}"));
        }
    }
}
