//! Package name consistency between the manifest, the module directory and
//! the entry point.
//!
//! The manifest is scanned line by line rather than parsed, so the one
//! remediation offered can rewrite a single line and leave the rest of the
//! file (comments, ordering, formatting) untouched.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WheelwrightError;
use crate::types::MANIFEST_FILE;

/// Directories that are never import packages.
const NON_PACKAGE_DIRS: &[&str] = &["build", "dist", "test", "tests"];

/// First console script declared in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub script: String,
    /// `module.path:function`
    pub target: String,
    /// Text before the first `.` or `:` of the target
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mismatch {
    /// Module directories exist but none is named after the declared name
    MissingModuleDirectory { declared: String },
    /// The entry point imports from a different top-level module
    EntryPointPrefix { declared: String, prefix: String },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::MissingModuleDirectory { declared } => {
                write!(f, "declared name '{declared}' has no matching module directory")
            }
            Mismatch::EntryPointPrefix { declared, prefix } => write!(
                f,
                "declared name '{declared}' differs from entry point module '{prefix}'"
            ),
        }
    }
}

/// The single fix the checker knows how to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Remediation {
    RenameDeclaredName { from: String, to: String },
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remediation::RenameDeclaredName { from, to } => write!(
                f,
                "change the declared name in {MANIFEST_FILE} from '{from}' to '{to}'"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub manifest_path: PathBuf,
    pub declared_name: String,
    /// Module directory matching the declared name, if one exists
    pub module_dir: Option<String>,
    /// Every import package found on disk
    pub module_dirs: Vec<String>,
    pub entry_point: Option<EntryPoint>,
    pub mismatches: Vec<Mismatch>,
    pub remediation: Option<Remediation>,
}

impl ConsistencyReport {
    pub fn is_mismatch(&self) -> bool {
        !self.mismatches.is_empty()
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_mismatch() {
            return write!(f, "package name '{}' is consistent", self.declared_name);
        }
        let parts: Vec<String> = self.mismatches.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Normalized import name (`my-pkg` and `my_pkg` compare equal).
pub fn normalize_name(name: &str) -> String {
    name.trim().replace('-', "_")
}

/// Cross-checks the declared name against the project tree.
pub fn check(manifest_path: &Path) -> Result<ConsistencyReport, WheelwrightError> {
    let content = fs::read_to_string(manifest_path)
        .with_context(|| format!("failed to read manifest {}", manifest_path.display()))?;
    let root = manifest_path.parent().unwrap_or_else(|| Path::new("."));

    let Some(declared) = find_declared_name(&content) else {
        return Err(WheelwrightError::ConsistencyMismatch(format!(
            "{} declares no package name",
            manifest_path.display()
        )));
    };
    let declared_name = declared.value;
    let normalized = normalize_name(&declared_name);
    let entry_point = find_entry_point(&content);
    let module_dirs = module_directories(root)?;
    debug!(declared = %declared_name, ?module_dirs, ?entry_point, "consistency inputs");

    let module_dir = module_dirs.iter().find(|d| **d == normalized).cloned();

    let mut mismatches = Vec::new();
    if module_dir.is_none() && !module_dirs.is_empty() {
        mismatches.push(Mismatch::MissingModuleDirectory {
            declared: declared_name.clone(),
        });
    }
    if let Some(ep) = &entry_point
        && normalize_name(&ep.prefix) != normalized
    {
        mismatches.push(Mismatch::EntryPointPrefix {
            declared: declared_name.clone(),
            prefix: ep.prefix.clone(),
        });
    }

    let remediation = if mismatches.is_empty() {
        None
    } else {
        let from_entry_point = entry_point
            .as_ref()
            .map(|ep| normalize_name(&ep.prefix))
            .filter(|prefix| module_dirs.contains(prefix));
        let single_dir = match module_dirs.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        };
        from_entry_point
            .or(single_dir)
            .filter(|target| *target != normalized)
            .map(|to| Remediation::RenameDeclaredName {
                from: declared_name.clone(),
                to,
            })
    };

    Ok(ConsistencyReport {
        manifest_path: manifest_path.to_path_buf(),
        declared_name,
        module_dir,
        module_dirs,
        entry_point,
        mismatches,
        remediation,
    })
}

/// Rewrites the declared name line in place. Every other byte of the
/// manifest is preserved.
pub fn apply_remediation(manifest_path: &Path, remediation: &Remediation) -> Result<()> {
    let Remediation::RenameDeclaredName { from, to } = remediation;
    let content = fs::read_to_string(manifest_path)
        .with_context(|| format!("failed to read manifest {}", manifest_path.display()))?;
    let Some(declared) = find_declared_name(&content) else {
        bail!("{} declares no package name", manifest_path.display());
    };
    if declared.value != *from {
        bail!(
            "declared name is '{}', expected '{from}'; manifest changed since the check",
            declared.value
        );
    }

    let mut out = String::with_capacity(content.len() + to.len());
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        if idx == declared.line {
            out.push_str(&line[..declared.start]);
            out.push_str(to);
            out.push_str(&line[declared.end..]);
        } else {
            out.push_str(line);
        }
    }
    fs::write(manifest_path, out)
        .with_context(|| format!("failed to write manifest {}", manifest_path.display()))?;
    Ok(())
}

/// A quoted value located in the manifest text.
struct Located {
    value: String,
    line: usize,
    /// Byte range of the value (inside the quotes) within its line
    start: usize,
    end: usize,
}

/// First `name = "..."` in `[project]`; without a `[project]` table, the
/// first `name` key anywhere (e.g. `[tool.poetry]`).
fn find_declared_name(content: &str) -> Option<Located> {
    let mut in_project = false;
    let mut fallback = None;
    for (idx, line) in content.split_inclusive('\n').enumerate() {
        if let Some(table) = table_header(line) {
            in_project = table == "project";
            continue;
        }
        let Some((key, located)) = quoted_assignment(line, idx) else {
            continue;
        };
        if key != "name" {
            continue;
        }
        if in_project {
            return Some(located);
        }
        if fallback.is_none() {
            fallback = Some(located);
        }
    }
    if has_table(content, "project") {
        None
    } else {
        fallback
    }
}

fn find_entry_point(content: &str) -> Option<EntryPoint> {
    for table_name in ["project.scripts", "tool.poetry.scripts"] {
        let mut inside = false;
        for (idx, line) in content.split_inclusive('\n').enumerate() {
            if let Some(table) = table_header(line) {
                inside = table == table_name;
                continue;
            }
            if !inside {
                continue;
            }
            if let Some((script, located)) = quoted_assignment(line, idx) {
                let target = located.value;
                let prefix = target
                    .split(['.', ':'])
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                return Some(EntryPoint {
                    script,
                    target,
                    prefix,
                });
            }
        }
    }
    None
}

fn has_table(content: &str, name: &str) -> bool {
    content.lines().any(|l| table_header(l) == Some(name))
}

fn table_header(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('[')?;
    let end = inner.find(']')?;
    let name = inner[..end].trim_start_matches('[').trim();
    Some(name)
}

/// Parses `key = "value"` (or single quotes). Returns the unquoted key and
/// the located value.
fn quoted_assignment(line: &str, idx: usize) -> Option<(String, Located)> {
    let (key, rest) = line.split_once('=')?;
    let key = key.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
    if key.is_empty() || key.starts_with('#') {
        return None;
    }
    let value_part = rest.trim_start();
    let quote = value_part.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let start = line.len() - value_part.len() + quote.len_utf8();
    let len = line[start..].find(quote)?;
    Some((
        key,
        Located {
            value: line[start..start + len].to_string(),
            line: idx,
            start,
            end: start + len,
        },
    ))
}

/// Import packages at the root or under `src/`, sorted.
fn module_directories(root: &Path) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for base in [root.to_path_buf(), root.join("src")] {
        if !base.is_dir() {
            continue;
        }
        let entries = fs::read_dir(&base)
            .with_context(|| format!("failed to list {}", base.display()))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.')
                || name.ends_with(".egg-info")
                || NON_PACKAGE_DIRS.contains(&name)
                || !path.join("__init__.py").is_file()
            {
                continue;
            }
            found.push(name.to_string());
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}
