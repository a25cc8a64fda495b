//! Post-build artifact verification.
//!
//! Missing artifact kinds and a rejecting integrity tool are warnings. Only
//! [`VerificationReport::enforce`] under strict mode turns them into an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use wheelwright_process::{CommandResult, CommandRunner, Outcome};

use crate::error::WheelwrightError;
use crate::types::{ArtifactSet, Interpreter, RuntimeOptions, VerifyStrictness};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationWarning {
    MissingBinaryArtifact,
    MissingSourceArtifact,
    IntegrityCheckFailed {
        exit_code: Option<i32>,
        detail: String,
    },
    /// The integrity tool could not be started (not installed, timed out, ...)
    IntegrityToolUnavailable { detail: String },
}

impl fmt::Display for VerificationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationWarning::MissingBinaryArtifact => {
                write!(f, "no binary artifact (.whl) was produced")
            }
            VerificationWarning::MissingSourceArtifact => {
                write!(f, "no source artifact (.tar.gz/.zip) was produced")
            }
            VerificationWarning::IntegrityCheckFailed { detail, .. } => {
                write!(f, "integrity check rejected the artifacts: {detail}")
            }
            VerificationWarning::IntegrityToolUnavailable { detail } => {
                write!(f, "integrity check could not run: {detail}")
            }
        }
    }
}

/// State of the integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    Passed,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub binary_count: usize,
    pub source_count: usize,
    pub integrity: IntegrityStatus,
    pub warnings: Vec<VerificationWarning>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Applies the strictness policy: strict turns any warning into
    /// [`WheelwrightError::VerificationFailed`].
    pub fn enforce(&self, strictness: VerifyStrictness) -> Result<(), WheelwrightError> {
        if strictness == VerifyStrictness::Strict && !self.is_clean() {
            return Err(WheelwrightError::VerificationFailed {
                warnings: self.warnings.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(())
    }
}

/// Counts artifact kinds and runs `twine check` over every artifact.
#[instrument(skip_all, fields(artifacts = artifacts.all().count()))]
pub fn verify(
    runner: &dyn CommandRunner,
    python: &Interpreter,
    artifacts: &ArtifactSet,
    opts: &RuntimeOptions,
) -> Result<VerificationReport, WheelwrightError> {
    let mut warnings = Vec::new();
    if artifacts.binary.is_empty() {
        warnings.push(VerificationWarning::MissingBinaryArtifact);
    }
    if artifacts.source.is_empty() {
        warnings.push(VerificationWarning::MissingSourceArtifact);
    }

    let integrity = if artifacts.is_empty() {
        IntegrityStatus::NotRun
    } else {
        let invocation = python
            .invocation()
            .args(["-m", "twine", "check"])
            .args(artifacts.all().map(|p| p.display().to_string()))
            .timeout(opts.verify_timeout);
        let result = runner.run_buffered(&invocation);
        if result.is_cancelled() {
            return Err(WheelwrightError::UserCancelled);
        }
        match (&result.outcome, result.exit_code) {
            (Outcome::Success, _) => IntegrityStatus::Passed,
            (Outcome::Failed, _) if module_missing(&result) => {
                warnings.push(VerificationWarning::IntegrityToolUnavailable {
                    detail: result.failure_summary(opts.output_lines),
                });
                IntegrityStatus::NotRun
            }
            (Outcome::Failed, exit_code) => {
                warnings.push(VerificationWarning::IntegrityCheckFailed {
                    exit_code,
                    detail: result.failure_summary(opts.output_lines),
                });
                IntegrityStatus::Failed
            }
            _ => {
                warnings.push(VerificationWarning::IntegrityToolUnavailable {
                    detail: result.failure_summary(opts.output_lines),
                });
                IntegrityStatus::NotRun
            }
        }
    };

    Ok(VerificationReport {
        binary_count: artifacts.binary.len(),
        source_count: artifacts.source.len(),
        integrity,
        warnings,
    })
}

/// `python -m twine` exits non-zero without twine installed.
fn module_missing(result: &CommandResult) -> bool {
    result
        .stderr
        .iter()
        .chain(result.stdout.iter())
        .any(|line| line.contains("No module named"))
}
