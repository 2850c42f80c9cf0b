//! Persistence of previously seen receiver endpoints across restarts.
//!
//! One file per dialect under the XDG state directory, one `hostname;port`
//! line per endpoint. Only endpoints that were successfully added end up
//! here, and duplicates are never re-appended.

use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

fn state_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("osc-kreuz"))
}

impl StateFile {
    /// The default location: `$XDG_STATE_HOME/osc-kreuz/<dialect>_state.csv`.
    pub fn for_dialect(dialect: &str) -> Option<StateFile> {
        state_dir().map(|dir| StateFile {
            path: dir.join(format!("{dialect}_state.csv")),
        })
    }

    pub fn at(path: PathBuf) -> StateFile {
        StateFile { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// All endpoints recorded so far. A missing file is an empty list;
    /// malformed lines are skipped.
    pub fn endpoints(&self) -> Vec<(String, u16)> {
        let Ok(contents) = fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter_map(|line| {
                let (hostname, port) = line.split_once(';')?;
                let port: u16 = port.trim().parse().ok()?;
                if hostname.is_empty() {
                    return None;
                }
                Some((hostname.to_string(), port))
            })
            .collect()
    }

    /// Record an endpoint unless it is already present.
    pub fn append(&self, hostname: &str, port: u16) -> io::Result<()> {
        let existing = self.endpoints();
        if existing.iter().any(|(h, p)| h == hostname && *p == port) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = String::new();
        for (h, p) in &existing {
            contents.push_str(&format!("{h};{p}\n"));
        }
        contents.push_str(&format!("{hostname};{port}\n"));
        fs::write(&self.path, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::at(dir.path().join("twonder_state.csv"));
        assert!(state.endpoints().is_empty());
    }

    #[test]
    fn test_append_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::at(dir.path().join("twonder_state.csv"));
        state.append("192.168.1.20", 58100).unwrap();
        state.append("wfs-node-2", 58100).unwrap();
        assert_eq!(
            state.endpoints(),
            vec![
                ("192.168.1.20".to_string(), 58100),
                ("wfs-node-2".to_string(), 58100),
            ]
        );
    }

    #[test]
    fn test_duplicates_are_not_reappended() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::at(dir.path().join("twonder_state.csv"));
        state.append("host", 9000).unwrap();
        state.append("host", 9000).unwrap();
        state.append("host", 9001).unwrap();
        assert_eq!(state.endpoints().len(), 2);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twonder_state.csv");
        std::fs::write(&path, "host;9000\ngarbage\n;123\nother;not_a_port\n").unwrap();
        let state = StateFile::at(path);
        assert_eq!(state.endpoints(), vec![("host".to_string(), 9000)]);
    }
}
