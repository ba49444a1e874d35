//! Filesystem helpers: output-path resolution, free-space checks, and
//! human-readable size formatting.

use std::path::{Component, Path, PathBuf};

/// Returns true when `name` is acceptable as an output path relative to the
/// configured directory. Embedded `/` separators are legitimate (extracted
/// FS dumps name nested paths); absolute paths and parent-directory
/// components are not.
pub fn is_safe_relative_path(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

/// Resolve a console-supplied filename under the output directory.
pub fn resolve_output_path(output_dir: &Path, filename: &str) -> Option<PathBuf> {
    if !is_safe_relative_path(filename) {
        return None;
    }
    Some(output_dir.join(filename))
}

/// Free bytes on the filesystem holding `path`. `None` when the query
/// itself fails; the check is advisory either way.
pub fn available_space(path: &Path) -> Option<u64> {
    fs2::available_space(path).ok()
}

/// Format a byte count with binary units, matching the transfer logs.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

    let mut unit = 0;
    while unit < UNITS.len() - 1 && bytes >= 1u64 << (10 * (unit + 1)) {
        unit += 1;
    }

    let divisor = 1u64 << (10 * unit);
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.2} {}", bytes as f64 / divisor as f64, UNITS[unit])
    }
}
