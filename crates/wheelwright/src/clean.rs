//! Removal of previous build output.
//!
//! Entries are paths relative to the project root. The final component may
//! be `*<suffix>` (e.g. `*.egg-info`), matched against the directory listing
//! at call time because those directories are produced by the very build
//! that follows.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Removes every existing path named by `patterns`, returning what was
/// removed in pattern order. Missing paths are skipped, so a second call
/// removes nothing.
pub fn clean(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for pattern in patterns {
        for path in expand(root, pattern)? {
            if remove_path(&path)? {
                removed.push(path);
            }
        }
    }
    Ok(removed)
}

/// Removes a file, symlink or directory tree. Returns `false` if nothing was there.
pub fn remove_path(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to inspect {}", path.display()));
        }
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory {}", path.display()))?;
    } else {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    debug!(path = %path.display(), "removed");
    Ok(true)
}

fn expand(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let relative = Path::new(pattern);
    if pattern.trim().is_empty() {
        bail!("empty clean pattern");
    }
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        bail!("clean pattern '{pattern}' must stay inside the project root");
    }

    let file_name = relative
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let Some(suffix) = file_name.strip_prefix('*') else {
        if pattern.contains('*') {
            bail!("clean pattern '{pattern}': only a leading '*' in the last component is supported");
        }
        return Ok(vec![root.join(relative)]);
    };
    if suffix.is_empty() || suffix.contains('*') {
        bail!("clean pattern '{pattern}' needs a literal suffix after '*'");
    }

    let dir = match relative.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => root.join(parent),
        _ => root.to_path_buf(),
    };
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to list {}", dir.display()));
        }
    };
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(suffix))
        })
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    Ok(matches)
}
