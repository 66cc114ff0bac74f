//! Town workspace discovery and rig membership.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Walk up from `start` looking for a town root: a directory containing a
/// `mayor/` subdirectory.
pub fn find(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join("mayor").is_dir())
        .map(Path::to_path_buf)
}

/// Rig names currently present in the workspace.
///
/// A rig is a top-level directory exhibiting rig-shaped substructure: a
/// `polecats/` or `crew/` subdirectory. `mayor/` and hidden directories are
/// never rigs. Re-derived on every call — rig membership changes between
/// calls and stale caches are exactly what orphan detection exists to catch.
pub fn valid_rig_names(town_root: &Path) -> HashSet<String> {
    let mut rigs = HashSet::new();
    let entries = match std::fs::read_dir(town_root) {
        Ok(entries) => entries,
        Err(_) => return rigs,
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "mayor" || name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.join("polecats").is_dir() || path.join("crew").is_dir() {
            rigs.insert(name);
        }
    }
    rigs
}

/// Worker names under a rig's `polecats/` directory, sorted for stable
/// display. Used as the live monitored-worker set for `status`.
pub fn polecat_names(town_root: &Path, rig: &str) -> Vec<String> {
    let dir = town_root.join(rig).join("polecats");
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}
