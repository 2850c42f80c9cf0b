//! OSC path blueprints for inbound bindings.
//!
//! Each path type has `base` patterns (source index travels as the first
//! argument) and `extended` patterns (source index is part of the address).
//! Renderer values additionally expand through an alias table, so
//! `/source/send/ambisonics` and `/source/send/hoa` land on the same handler.

/// What kind of data a path carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OscPathType {
    Position,
    Properties,
    Gain,
}

const POSITION_BASE: [&str; 3] = [
    "/source/{val}",
    "/source/pos/{val}",
    "/source/position/{val}",
];

const POSITION_EXTENDED: [&str; 3] = [
    "/source/{idx}/{val}",
    "/source/{idx}/pos/{val}",
    "/source/{idx}/position/{val}",
];

const PROPERTIES_BASE: [&str; 1] = ["/source/{val}"];

const PROPERTIES_EXTENDED: [&str; 1] = ["/source/{idx}/{val}"];

const GAIN_BASE: [&str; 6] = [
    "/source/send/{val}",
    "/source/send/{val}/gain",
    "/send/{val}",
    "/send/{val}/gain",
    "/source/{val}",
    "/source/{val}/gain",
];

const GAIN_EXTENDED: [&str; 6] = [
    "/source/{idx}/send/{val}",
    "/source/{idx}/send/{val}/gain",
    "/send/{idx}/{val}",
    "/send/{idx}/{val}/gain",
    "/source/{idx}/{val}",
    "/source/{idx}/{val}/gain",
];

fn patterns(path_type: OscPathType, extended: bool) -> &'static [&'static str] {
    match (path_type, extended) {
        (OscPathType::Position, false) => &POSITION_BASE,
        (OscPathType::Position, true) => &POSITION_EXTENDED,
        (OscPathType::Properties, false) => &PROPERTIES_BASE,
        (OscPathType::Properties, true) => &PROPERTIES_EXTENDED,
        (OscPathType::Gain, false) => &GAIN_BASE,
        (OscPathType::Gain, true) => &GAIN_EXTENDED,
    }
}

/// Spellings accepted for a renderer name. Unknown names pass through
/// unexpanded.
pub fn renderer_aliases(value: &str) -> &'static [&'static str] {
    match value {
        "ambi" => &["hoa", "ambi", "ambisonics"],
        "wfs" => &["wfs", "wavefieldsynthesis"],
        "reverb" => &["reverb", "rev"],
        _ => &[],
    }
}

/// Build every concrete path for a path type and value. With `idx` the
/// extended patterns are used and the 1-based source index is baked into the
/// address.
pub fn build_osc_paths(path_type: OscPathType, value: &str, idx: Option<usize>) -> Vec<String> {
    let aliases = renderer_aliases(value);
    let aliases: Vec<&str> = if aliases.is_empty() {
        vec![value]
    } else {
        aliases.to_vec()
    };

    let pats = patterns(path_type, idx.is_some());

    let mut paths = Vec::with_capacity(aliases.len() * pats.len());
    for alias in &aliases {
        for pat in pats {
            let mut path = pat.replace("{val}", alias);
            if let Some(idx) = idx {
                path = path.replace("{idx}", &idx.to_string());
            }
            paths.push(path);
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_base_paths() {
        let paths = build_osc_paths(OscPathType::Position, "xyz", None);
        assert_eq!(
            paths,
            vec![
                "/source/xyz",
                "/source/pos/xyz",
                "/source/position/xyz",
            ]
        );
    }

    #[test]
    fn test_position_extended_paths() {
        let paths = build_osc_paths(OscPathType::Position, "aed", Some(12));
        assert_eq!(
            paths,
            vec![
                "/source/12/aed",
                "/source/12/pos/aed",
                "/source/12/position/aed",
            ]
        );
    }

    #[test]
    fn test_gain_alias_expansion() {
        let paths = build_osc_paths(OscPathType::Gain, "ambi", None);
        assert_eq!(paths.len(), 18);
        assert!(paths.contains(&"/source/send/hoa".to_string()));
        assert!(paths.contains(&"/source/send/ambisonics/gain".to_string()));
        assert!(paths.contains(&"/send/ambi".to_string()));
        assert!(paths.contains(&"/source/ambi/gain".to_string()));
    }

    #[test]
    fn test_gain_extended_inserts_index() {
        let paths = build_osc_paths(OscPathType::Gain, "reverb", Some(3));
        assert!(paths.contains(&"/source/3/send/reverb".to_string()));
        assert!(paths.contains(&"/send/3/rev/gain".to_string()));
        assert_eq!(paths.len(), 12);
    }

    #[test]
    fn test_unknown_value_bypasses_aliases() {
        let paths = build_osc_paths(OscPathType::Properties, "doppler", Some(1));
        assert_eq!(paths, vec!["/source/1/doppler"]);
    }
}
