//! Error taxonomy for the build pipeline.
//!
//! Conditions a stage recovers from (verification warnings, optional tool
//! checks) never become one of these; everything here propagates to the top
//! level, which prints it and exits non-zero.

use std::path::PathBuf;

use thiserror::Error;

use crate::cascade::Failure;

#[derive(Debug, Error)]
pub enum WheelwrightError {
    #[error("manifest not found: {} (run from the project root)", .0.display())]
    ManifestMissing(PathBuf),

    #[error("{tool} unavailable: {detail}")]
    ToolUnavailable { tool: String, detail: String },

    #[error("build failed: no binary or source artifacts were produced{}", describe_failures(.failures))]
    BuildFailed { failures: Vec<Failure> },

    #[error("smoke test {} failed: {detail}", .script.display())]
    SmokeTestFailed { script: PathBuf, detail: String },

    #[error("verification failed (strict mode): {}", .warnings.join("; "))]
    VerificationFailed { warnings: Vec<String> },

    #[error("package name mismatch: {0}")]
    ConsistencyMismatch(String),

    #[error("upload to {repository} failed: {detail}")]
    UploadFailed { repository: String, detail: String },

    #[error("cancelled by user")]
    UserCancelled,

    #[error("aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// Typed errors that travelled through `anyhow` (prompters, helpers) come
/// back out as themselves.
impl From<anyhow::Error> for WheelwrightError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<WheelwrightError>() {
            Ok(typed) => typed,
            Err(other) => WheelwrightError::Other(other),
        }
    }
}

fn describe_failures(failures: &[Failure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = failures
        .iter()
        .map(|f| format!("{}: {}", f.label, f.reason))
        .collect();
    format!(" ({})", parts.join("; "))
}
