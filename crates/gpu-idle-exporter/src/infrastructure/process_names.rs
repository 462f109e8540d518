//! Resolves pids to short process names from procfs

use std::collections::HashMap;
use std::path::PathBuf;

use crate::domain::Pid;

pub const UNKNOWN_PROCESS: &str = "unknown";
const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct ProcessNames {
    proc_root: PathBuf,
}

impl Default for ProcessNames {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcessNames {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Contents of `<proc_root>/<pid>/comm`, sanitised, or [`UNKNOWN_PROCESS`]
    pub fn resolve(&self, pid: Pid) -> String {
        let path = self.proc_root.join(pid.to_string()).join("comm");
        match std::fs::read_to_string(&path) {
            Ok(raw) => sanitize(&raw),
            Err(e) => {
                tracing::trace!(pid, "Failed to read {}: {e}", path.display());
                UNKNOWN_PROCESS.to_string()
            }
        }
    }

    /// Resolves each distinct pid once
    pub fn resolve_all(&self, pids: impl IntoIterator<Item = Pid>) -> HashMap<Pid, String> {
        let mut names = HashMap::new();
        for pid in pids {
            names.entry(pid).or_insert_with(|| self.resolve(pid));
        }
        names
    }
}

/// Strips control characters (label values must stay printable) and caps the length.
pub fn sanitize(raw: &str) -> String {
    let name: String = raw
        .trim()
        .chars()
        .filter(|c| *c >= '\u{20}' && *c != '\u{7f}')
        .take(MAX_NAME_LEN)
        .collect();

    if name.is_empty() {
        UNKNOWN_PROCESS.to_string()
    } else {
        name
    }
}
