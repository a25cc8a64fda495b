//! Interpreter discovery and auxiliary tool checks.
//!
//! Candidates are probed in order with a bounded `--version` query. Names
//! that are known to resolve to placeholder stubs on some platforms must also
//! execute a trivial statement before they are accepted.

use tracing::{debug, instrument};
use wheelwright_process::{CommandRunner, Invocation};

use crate::cascade::{Attempt, CascadeOutcome, Failure, first_success};
use crate::error::WheelwrightError;
use crate::types::{Interpreter, RuntimeOptions};

/// Result of a successful probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub interpreter: Interpreter,
    /// Candidates tried before the selected one, with the reason each was skipped
    pub rejected: Vec<Failure>,
    /// Candidates that answered `--version` but could not run code
    pub stubs: Vec<Interpreter>,
    /// The selected interpreter is older than the configured floor
    pub below_floor: bool,
}

/// Finds the first working interpreter in `opts.interpreter_candidates`.
///
/// Candidates after the selected one are never run.
#[instrument(skip_all)]
pub fn locate_interpreter(
    runner: &dyn CommandRunner,
    opts: &RuntimeOptions,
) -> Result<ProbeReport, WheelwrightError> {
    let mut stubs = Vec::new();
    let outcome = first_success(&opts.interpreter_candidates, |name| {
        probe_candidate(runner, opts, name, &mut stubs)
    });

    match outcome {
        CascadeOutcome::Selected {
            value: interpreter,
            failures,
            ..
        } => {
            let below_floor = interpreter
                .version
                .is_some_and(|v| !v.at_least(&opts.min_version));
            debug!(interpreter = %interpreter, below_floor, "selected interpreter");
            Ok(ProbeReport {
                interpreter,
                rejected: failures,
                stubs,
                below_floor,
            })
        }
        CascadeOutcome::Cancelled { .. } => Err(WheelwrightError::UserCancelled),
        CascadeOutcome::Exhausted { failures } => {
            let detail = if failures.is_empty() {
                "no candidates configured".to_string()
            } else {
                failures
                    .iter()
                    .map(|f| format!("{}: {}", f.label, f.reason))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            Err(WheelwrightError::ToolUnavailable {
                tool: "python interpreter".to_string(),
                detail,
            })
        }
    }
}

fn probe_candidate(
    runner: &dyn CommandRunner,
    opts: &RuntimeOptions,
    name: &str,
    stubs: &mut Vec<Interpreter>,
) -> Attempt<Interpreter> {
    let query = runner.run_buffered(
        &Invocation::new(name)
            .arg("--version")
            .timeout(opts.probe_timeout),
    );
    if query.is_cancelled() {
        return Attempt::Cancelled;
    }
    if !query.is_success() {
        return Attempt::Failed(format!(
            "version query: {}",
            query.failure_summary(opts.output_lines)
        ));
    }

    // Older interpreters print the version on stderr.
    let version_text = query
        .stdout
        .iter()
        .chain(query.stderr.iter())
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string();
    let version = crate::types::Version::find_in(&version_text);

    if opts.liveness_required.iter().any(|n| n == name) {
        let live = runner.run_buffered(
            &Invocation::new(name)
                .arg("-c")
                .arg(opts.liveness_statement.as_str())
                .timeout(opts.probe_timeout),
        );
        if live.is_cancelled() {
            return Attempt::Cancelled;
        }
        if !live.is_success() {
            stubs.push(Interpreter {
                command: name.to_string(),
                version,
                version_text,
                usable: false,
            });
            return Attempt::Failed(format!(
                "answers --version but cannot run code (placeholder stub?): {}",
                live.failure_summary(opts.output_lines)
            ));
        }
    }

    Attempt::Success(Interpreter {
        command: name.to_string(),
        version,
        version_text,
        usable: true,
    })
}

/// Availability of an auxiliary tool after [`ensure_tool_available`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    Present,
    /// Was missing and has been installed
    Installed,
    Missing { detail: String },
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        !matches!(self, ToolStatus::Missing { .. })
    }
}

/// Checks whether `tool` is installed for the interpreter without installing it.
pub fn check_tool(
    runner: &dyn CommandRunner,
    python: &Interpreter,
    tool: &str,
    opts: &RuntimeOptions,
) -> Result<bool, WheelwrightError> {
    let show = runner.run_buffered(
        &python
            .invocation()
            .args(["-m", "pip", "show", tool])
            .timeout(opts.install_timeout),
    );
    if show.is_cancelled() {
        return Err(WheelwrightError::UserCancelled);
    }
    Ok(show.is_success())
}

/// Makes sure `tool` is importable by the interpreter, installing it with pip
/// when allowed. Failure to install is not an error; only cancellation is.
#[instrument(skip(runner, python, opts))]
pub fn ensure_tool_available(
    runner: &dyn CommandRunner,
    python: &Interpreter,
    tool: &str,
    opts: &RuntimeOptions,
) -> Result<ToolStatus, WheelwrightError> {
    if check_tool(runner, python, tool, opts)? {
        return Ok(ToolStatus::Present);
    }
    if !opts.install_missing {
        return Ok(ToolStatus::Missing {
            detail: "not installed (automatic install disabled)".to_string(),
        });
    }

    debug!("installing missing tool");
    let install = runner.run_buffered(
        &python
            .invocation()
            .args(["-m", "pip", "install", tool])
            .timeout(opts.install_timeout),
    );
    if install.is_cancelled() {
        return Err(WheelwrightError::UserCancelled);
    }
    if !install.is_success() {
        return Ok(ToolStatus::Missing {
            detail: format!("install failed: {}", install.failure_summary(opts.output_lines)),
        });
    }

    if check_tool(runner, python, tool, opts)? {
        Ok(ToolStatus::Installed)
    } else {
        Ok(ToolStatus::Missing {
            detail: "still not found after install".to_string(),
        })
    }
}
