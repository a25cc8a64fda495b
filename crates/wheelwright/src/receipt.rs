use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::build::BuildOutcome;
use crate::publish::PublishOutcome;
use crate::types::Interpreter;
use crate::verify::VerificationReport;

/// Current receipt schema version
pub const CURRENT_RECEIPT_VERSION: &str = "wheelwright.receipt.v1";

pub const RECEIPT_FILE: &str = "last-build.json";

/// Final status of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Evidence of a single build (and optional publish) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReceipt {
    pub receipt_version: String,
    pub project_root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub interpreter: Option<Interpreter>,
    /// Paths removed before building
    pub cleaned: Vec<PathBuf>,
    pub build: Option<BuildOutcome>,
    pub verification: Option<VerificationReport>,
    pub publish: Option<PublishOutcome>,
    /// Error message when the run did not succeed
    pub error: Option<String>,
}

impl BuildReceipt {
    pub fn new(project_root: &Path, started_at: DateTime<Utc>) -> Self {
        Self {
            receipt_version: CURRENT_RECEIPT_VERSION.to_string(),
            project_root: project_root.to_path_buf(),
            started_at,
            finished_at: started_at,
            status: RunStatus::Failed,
            interpreter: None,
            cleaned: Vec::new(),
            build: None,
            verification: None,
            publish: None,
            error: None,
        }
    }
}

pub fn receipt_path(state_dir: &Path) -> PathBuf {
    state_dir.join(RECEIPT_FILE)
}

pub fn write_receipt(state_dir: &Path, receipt: &BuildReceipt) -> Result<()> {
    fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;

    let path = receipt_path(state_dir);
    atomic_write_json(&path, receipt)
}

pub fn load_receipt(state_dir: &Path) -> Result<Option<BuildReceipt>> {
    let path = receipt_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read receipt file {}", path.display()))?;
    let receipt: BuildReceipt = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse receipt JSON {}", path.display()))?;
    if receipt.receipt_version != CURRENT_RECEIPT_VERSION {
        bail!(
            "unsupported receipt version '{}' in {} (expected {CURRENT_RECEIPT_VERSION})",
            receipt.receipt_version,
            path.display()
        );
    }
    Ok(Some(receipt))
}

/// Best-effort fsync of the parent directory after a rename. Errors are
/// ignored because not every platform can open a directory for sync.
fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;

    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("failed to create tmp file {}", tmp.display()))?;
        f.write_all(&data)
            .with_context(|| format!("failed to write tmp file {}", tmp.display()))?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "failed to rename tmp file {} to {}",
            tmp.display(),
            path.display()
        )
    })?;

    fsync_parent_dir(path);

    Ok(())
}
