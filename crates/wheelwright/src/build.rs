//! Multi-strategy build pipeline.
//!
//! Each category (binary, source) walks its own candidate list and keeps the
//! first candidate that succeeds. A category that runs out of candidates
//! contributes nothing but does not stop the other one. The run as a whole
//! only fails when the output directory ends up without any artifact.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, instrument, warn};
use wheelwright_process::{CommandRunner, LineObserver};

use crate::cascade::{Attempt, CascadeOutcome, Failure, first_success};
use crate::clean::remove_path;
use crate::engine::Reporter;
use crate::error::WheelwrightError;
use crate::types::{
    ArtifactKind, ArtifactSet, BuildCandidate, BuildStrategy, CategoryResult, Interpreter,
    RuntimeOptions, SuccessPredicate,
};

/// Everything a successful pipeline run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub artifacts: ArtifactSet,
    pub categories: Vec<CategoryResult>,
}

impl BuildOutcome {
    pub fn category(&self, kind: ArtifactKind) -> Option<&CategoryResult> {
        self.categories
            .iter()
            .find(|c| c.category.artifact_kind() == kind)
    }
}

/// Where and how candidates run.
pub struct BuildContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub python: &'a Interpreter,
    /// Working directory of every candidate
    pub project_root: &'a Path,
    /// Absolute output directory
    pub output_dir: &'a Path,
    pub opts: &'a RuntimeOptions,
}

/// Runs every strategy in order and classifies the output directory.
///
/// On cancellation the output directory is removed and
/// [`WheelwrightError::UserCancelled`] is returned without trying anything else.
#[instrument(skip_all, fields(output_dir = %ctx.output_dir.display()))]
pub fn build(
    ctx: &BuildContext<'_>,
    strategies: &[BuildStrategy],
    reporter: &mut dyn Reporter,
    observer: &mut dyn LineObserver,
) -> Result<BuildOutcome, WheelwrightError> {
    fs::create_dir_all(ctx.output_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            ctx.output_dir.display()
        )
    })?;

    let mut categories = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let _span = info_span!("category", category = %strategy.category).entered();
        if strategy.candidates.is_empty() {
            debug!("no candidates configured, skipping");
            continue;
        }
        reporter.info(&format!("building {} artifacts...", strategy.category));

        let outcome = first_success(&strategy.candidates, |candidate| {
            reporter.info(&format!("  trying {}", candidate.label));
            attempt_candidate(ctx, strategy, candidate, &mut *observer)
        });

        match outcome {
            CascadeOutcome::Selected {
                label, failures, value, ..
            } => {
                reporter.info(&format!(
                    "  {} produced {} {} artifact(s)",
                    label,
                    value.len(),
                    strategy.category
                ));
                categories.push(CategoryResult {
                    category: strategy.category,
                    succeeded_with: Some(label),
                    failures,
                });
            }
            CascadeOutcome::Exhausted { failures } => {
                reporter.warn(&format!(
                    "every {} candidate failed; continuing without {} artifacts",
                    strategy.category, strategy.category
                ));
                categories.push(CategoryResult {
                    category: strategy.category,
                    succeeded_with: None,
                    failures,
                });
            }
            CascadeOutcome::Cancelled { label, .. } => {
                warn!(candidate = %label, "build cancelled");
                remove_path(ctx.output_dir)?;
                return Err(WheelwrightError::UserCancelled);
            }
        }
    }

    let artifacts = ArtifactSet::scan(ctx.output_dir)?;
    if artifacts.is_empty() {
        let failures: Vec<Failure> = categories
            .into_iter()
            .flat_map(|c| c.failures)
            .collect();
        return Err(WheelwrightError::BuildFailed { failures });
    }

    Ok(BuildOutcome {
        artifacts,
        categories,
    })
}

fn attempt_candidate(
    ctx: &BuildContext<'_>,
    strategy: &BuildStrategy,
    candidate: &BuildCandidate,
    observer: &mut dyn LineObserver,
) -> Attempt<Vec<PathBuf>> {
    let kind = strategy.category.artifact_kind();
    let before = match snapshot(ctx.output_dir, kind) {
        Ok(s) => s,
        Err(e) => return Attempt::Failed(format!("{e:#}")),
    };

    // Held until the candidate is done, whichever way it ends.
    let _shim = if candidate.setup_shim {
        match SetupShim::install(ctx.project_root) {
            Ok(shim) => shim,
            Err(e) => return Attempt::Failed(format!("{e:#}")),
        }
    } else {
        None
    };

    let invocation = ctx
        .python
        .invocation()
        .args(candidate.resolved_args(ctx.output_dir))
        .current_dir(ctx.project_root)
        .timeout(ctx.opts.build_timeout)
        .streaming();
    debug!(command = %invocation, "running build candidate");
    let result = ctx.runner.run(&invocation, observer);
    if result.is_cancelled() {
        return Attempt::Cancelled;
    }

    let produced = match snapshot(ctx.output_dir, kind) {
        Ok(after) => changed_paths(&before, &after),
        Err(e) => return Attempt::Failed(format!("{e:#}")),
    };

    if !result.is_success() {
        discard(&produced);
        return Attempt::Failed(result.failure_summary(ctx.opts.output_lines));
    }
    if strategy.success == SuccessPredicate::ArtifactProduced && produced.is_empty() {
        return Attempt::Failed(format!("exited successfully but produced no {kind} artifact"));
    }
    Attempt::Success(produced)
}

type Snapshot = BTreeMap<PathBuf, Option<SystemTime>>;

fn snapshot(dir: &Path, kind: ArtifactKind) -> Result<Snapshot> {
    let set = ArtifactSet::scan(dir)?;
    Ok(set
        .of_kind(kind)
        .iter()
        .map(|p| (p.clone(), fs::metadata(p).and_then(|m| m.modified()).ok()))
        .collect())
}

/// Paths that are new, or were rewritten, since `before`.
fn changed_paths(before: &Snapshot, after: &Snapshot) -> Vec<PathBuf> {
    after
        .iter()
        .filter(|(path, modified)| before.get(*path) != Some(*modified))
        .map(|(path, _)| path.clone())
        .collect()
}

/// Removes whatever a failed candidate left behind so a later candidate (or
/// the final classification) never sees half-written files.
fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = remove_path(path) {
            let error = format!("{e:#}");
            warn!(path = %path.display(), %error, "failed to discard partial artifact");
        }
    }
}

const SETUP_SCRIPT: &str = "setup.py";

/// Minimal `setup.py` that takes its metadata from the `[project]` table.
const SETUP_SHIM: &str = r#"# Temporary file written by wheelwright; removed after the build.
from setuptools import find_packages, setup

try:
    import tomllib
except ImportError:
    import tomli as tomllib

with open("pyproject.toml", "rb") as f:
    project = tomllib.load(f).get("project", {})

setup(
    name=project["name"],
    version=project.get("version", "0.0.0"),
    description=project.get("description", ""),
    packages=find_packages(exclude=["tests", "tests.*"]),
    install_requires=project.get("dependencies", []),
    python_requires=project.get("requires-python"),
    entry_points={
        "console_scripts": [
            f"{name} = {target}" for name, target in project.get("scripts", {}).items()
        ],
    },
)
"#;

/// A generated `setup.py`, deleted on drop.
struct SetupShim {
    path: PathBuf,
}

impl SetupShim {
    /// Writes the shim unless the project already has a `setup.py`, which is
    /// then used (and kept) as is.
    fn install(project_root: &Path) -> Result<Option<Self>> {
        let path = project_root.join(SETUP_SCRIPT);
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to create {}", path.display()));
            }
        };
        let shim = Self { path };
        io::Write::write_all(&mut file, SETUP_SHIM.as_bytes())
            .with_context(|| format!("failed to write {}", shim.path.display()))?;
        debug!(path = %shim.path.display(), "wrote temporary setup.py");
        Ok(Some(shim))
    }
}

impl Drop for SetupShim {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            let error = e.to_string();
            warn!(path = %self.path.display(), %error, "failed to remove temporary setup.py");
        }
    }
}

/// Runs the optional pre-build smoke test with the selected interpreter.
#[instrument(skip(runner, python, opts))]
pub fn run_smoke_test(
    runner: &dyn CommandRunner,
    python: &Interpreter,
    project_root: &Path,
    script: &Path,
    opts: &RuntimeOptions,
) -> Result<(), WheelwrightError> {
    let resolved = if script.is_absolute() {
        script.to_path_buf()
    } else {
        project_root.join(script)
    };
    if !resolved.is_file() {
        return Err(WheelwrightError::SmokeTestFailed {
            script: script.to_path_buf(),
            detail: "script not found".to_string(),
        });
    }

    let result = runner.run_buffered(
        &python
            .invocation()
            .arg(resolved.display().to_string())
            .current_dir(project_root)
            .timeout(opts.build_timeout),
    );
    if result.is_cancelled() {
        return Err(WheelwrightError::UserCancelled);
    }
    if !result.is_success() {
        return Err(WheelwrightError::SmokeTestFailed {
            script: script.to_path_buf(),
            detail: result.failure_summary(opts.output_lines),
        });
    }
    Ok(())
}
