//! # osc-kreuz-types
//!
//! Shared core types for the osc-kreuz OSC router: the coordinate kernel,
//! the canonical per-source state model, and the inbound OSC path blueprints.
//! Pure logic, no I/O; the wire lives in osc-kreuz-net.

pub mod coordinates;
pub mod paths;
pub mod source;

pub use coordinates::{
    all_coordinate_formats, parse_format, Coordinate, CoordinateKey, CoordinateSystem,
    ElevationWrap, FormatError,
};
pub use paths::{build_osc_paths, renderer_aliases, OscPathType};
pub use source::{Source, SourceAttribute, SourceSettings};
