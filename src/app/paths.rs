//! Download path construction
//!
//! Target paths are `<root>/<module_key>/<sub_folder>/<download_tag>/<file_name>`.
//! Every segment is sanitized on its own before joining, so a segment can never
//! escape its parent or collide with reserved names.

use std::fs::{File, FileTimes};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use crate::app::models::{QueueItem, TrackedSource};
use crate::constants::files;

/// Replace reserved characters and truncate to the platform component limit
///
/// `download_tag` and `sub_folder` may be logical sub-paths (`a/b`); use
/// [`sanitize_sub_path`] for those.
pub fn sanitize_segment(segment: &str) -> String {
    let mapped: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Windows rejects trailing dots and spaces
    let trimmed = mapped.trim().trim_end_matches('.');
    let cleaned = if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    };

    truncate_component(&cleaned, files::MAX_COMPONENT_BYTES)
}

/// Sanitize each `/`-separated part of a logical sub-path
///
/// Empty parts are dropped, so `""` yields no components at all.
pub fn sanitize_sub_path(sub_path: &str) -> Vec<String> {
    sub_path
        .split(['/', '\\'])
        .filter(|part| !part.trim().is_empty())
        .map(sanitize_segment)
        .collect()
}

/// Truncate to at most `max_bytes`, keeping the extension when possible
pub fn truncate_component(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 && name.len() - idx <= 16 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };

    let budget = max_bytes.saturating_sub(ext.len());
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], ext)
}

/// Directory that holds everything one module downloads
pub fn module_root(root: &Path, module_key: &str) -> PathBuf {
    root.join(sanitize_segment(module_key))
}

/// Full target path for a queued item
pub fn target_path(root: &Path, source: &TrackedSource, item: &QueueItem) -> PathBuf {
    let mut path = module_root(root, &source.module_key);
    for part in sanitize_sub_path(&source.sub_folder) {
        path.push(part);
    }
    for part in sanitize_sub_path(&item.download_tag) {
        path.push(part);
    }
    path.push(sanitize_segment(&item.file_name));
    path
}

/// Refresh timestamps of every directory between `file` and `stop_at`
///
/// `stop_at` itself is left untouched. Failures are logged and ignored; a stale
/// directory time never fails a download.
pub fn refresh_ancestor_times(file: &Path, stop_at: &Path) {
    let now = SystemTime::now();
    let times = FileTimes::new().set_accessed(now).set_modified(now);

    for dir in file.ancestors().skip(1) {
        if dir == stop_at || !dir.starts_with(stop_at) {
            break;
        }
        let result = File::open(dir).and_then(|handle| handle.set_times(times));
        if let Err(e) = result {
            debug!("Could not refresh times on {}: {}", dir.display(), e);
        }
    }
}
