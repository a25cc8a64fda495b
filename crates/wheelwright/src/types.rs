use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use wheelwright_process::Invocation;

use crate::cascade::{Failure, Labeled};
use crate::error::WheelwrightError;

/// The metadata manifest every project root must contain.
pub const MANIFEST_FILE: &str = "pyproject.toml";

/// Placeholder replaced by the absolute output directory in build candidate arguments.
pub const OUTDIR_PLACEHOLDER: &str = "{outdir}";

/// A project root that is known to contain a manifest.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    /// Opens `root`, failing with [`WheelwrightError::ManifestMissing`] if no
    /// manifest exists there. Nothing on disk is touched.
    ///
    /// The root is made absolute so paths handed to child processes (which
    /// run inside the root) stay valid.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, WheelwrightError> {
        let manifest = root.as_ref().join(MANIFEST_FILE);
        if !manifest.is_file() {
            return Err(WheelwrightError::ManifestMissing(manifest));
        }
        let root = std::path::absolute(root.as_ref()).with_context(|| {
            format!("failed to resolve project root {}", root.as_ref().display())
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Resolves a possibly-relative path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// `major.minor[.patch]` interpreter version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            patch: None,
        }
    }

    /// Compares only `(major, minor)`.
    pub fn at_least(&self, floor: &Version) -> bool {
        (self.major, self.minor) >= (floor.major, floor.minor)
    }

    /// Finds the first `X.Y[.Z]` token in free-form version output such as
    /// `Python 3.11.4`.
    pub fn find_in(text: &str) -> Option<Self> {
        text.split_whitespace()
            .find_map(|token| token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '.').parse().ok())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('.');
        let major = parts.next().context("empty version")?;
        let minor = parts
            .next()
            .with_context(|| format!("version '{s}' has no minor component"))?;
        // Keep only the numeric prefix of the patch ("4rc1" -> 4).
        let patch = parts.next().and_then(|p| {
            let digits: String = p.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        });
        let major = major
            .parse()
            .with_context(|| format!("invalid major version in '{s}'"))?;
        let minor = minor
            .parse()
            .with_context(|| format!("invalid minor version in '{s}'"))?;
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl TryFrom<String> for Version {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

/// The interpreter selected by probing. Immutable once chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreter {
    pub command: String,
    pub version: Option<Version>,
    /// Raw version output, kept for diagnostics when parsing failed.
    pub version_text: String,
    /// False when the command resolves but is a non-functional stub.
    pub usable: bool,
}

impl Interpreter {
    /// Starts an invocation of this interpreter; callers append arguments.
    pub fn invocation(&self) -> Invocation {
        Invocation::new(&self.command)
    }
}

impl fmt::Display for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{} (Python {v})", self.command),
            None => write!(f, "{} (version unknown)", self.command),
        }
    }
}

/// Kind of distributable, decided purely by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Prebuilt wheel (`.whl`)
    Binary,
    /// Source archive (`.tar.gz`, `.zip`)
    Source,
}

impl ArtifactKind {
    pub fn classify(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".whl") {
            Some(ArtifactKind::Binary)
        } else if name.ends_with(".tar.gz") || name.ends_with(".zip") {
            Some(ArtifactKind::Source)
        } else {
            None
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Binary => write!(f, "binary"),
            ArtifactKind::Source => write!(f, "source"),
        }
    }
}

/// Artifacts found in the flat output directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub output_dir: PathBuf,
    pub binary: Vec<PathBuf>,
    pub source: Vec<PathBuf>,
}

impl ArtifactSet {
    /// Classifies every regular file directly inside `dir`. A missing
    /// directory yields an empty set.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut set = ArtifactSet {
            output_dir: dir.to_path_buf(),
            ..Default::default()
        };
        if !dir.exists() {
            return Ok(set);
        }
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to read output directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();
        for path in entries {
            match ArtifactKind::classify(&path) {
                Some(ArtifactKind::Binary) => set.binary.push(path),
                Some(ArtifactKind::Source) => set.source.push(path),
                None => {}
            }
        }
        Ok(set)
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> &[PathBuf] {
        match kind {
            ArtifactKind::Binary => &self.binary,
            ArtifactKind::Source => &self.source,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.binary.is_empty() && self.source.is_empty()
    }

    /// All artifacts, binaries first.
    pub fn all(&self) -> impl Iterator<Item = &PathBuf> {
        self.binary.iter().chain(self.source.iter())
    }
}

/// One of the two independent build categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyCategory {
    Binary,
    Source,
}

impl StrategyCategory {
    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            StrategyCategory::Binary => ArtifactKind::Binary,
            StrategyCategory::Source => ArtifactKind::Source,
        }
    }
}

impl fmt::Display for StrategyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyCategory::Binary => write!(f, "binary"),
            StrategyCategory::Source => write!(f, "source"),
        }
    }
}

/// One way of producing artifacts: arguments handed to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCandidate {
    pub label: String,
    pub args: Vec<String>,
    /// Write a temporary `setup.py` derived from the manifest when the
    /// project has none, and remove it once the candidate finishes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub setup_shim: bool,
}

impl BuildCandidate {
    pub fn new(label: &str, args: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            setup_shim: false,
        }
    }

    pub fn with_setup_shim(mut self) -> Self {
        self.setup_shim = true;
        self
    }

    /// Arguments with [`OUTDIR_PLACEHOLDER`] replaced. Only whole arguments
    /// are substituted.
    pub fn resolved_args(&self, output_dir: &Path) -> Vec<String> {
        self.args
            .iter()
            .map(|a| {
                if a == OUTDIR_PLACEHOLDER {
                    output_dir.display().to_string()
                } else {
                    a.clone()
                }
            })
            .collect()
    }
}

impl Labeled for BuildCandidate {
    fn label(&self) -> &str {
        &self.label
    }
}

/// What counts as success for a build candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPredicate {
    /// Zero exit status is enough.
    ExitStatus,
    /// Zero exit status and at least one new artifact of the category's kind.
    #[default]
    ArtifactProduced,
}

/// Ordered fallback list for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStrategy {
    pub category: StrategyCategory,
    pub candidates: Vec<BuildCandidate>,
    pub success: SuccessPredicate,
}

impl BuildStrategy {
    pub fn binary_defaults() -> Self {
        Self {
            category: StrategyCategory::Binary,
            candidates: default_binary_candidates(),
            success: SuccessPredicate::default(),
        }
    }

    pub fn source_defaults() -> Self {
        Self {
            category: StrategyCategory::Source,
            candidates: default_source_candidates(),
            success: SuccessPredicate::default(),
        }
    }
}

/// Direct `pip wheel` first; the `build` frontend can hang under isolation.
pub fn default_binary_candidates() -> Vec<BuildCandidate> {
    vec![
        BuildCandidate::new(
            "pip wheel",
            &["-m", "pip", "wheel", ".", "--no-deps", "--wheel-dir", OUTDIR_PLACEHOLDER],
        ),
        BuildCandidate::new(
            "build --wheel (no isolation)",
            &["-m", "build", "--wheel", "--no-isolation", "--outdir", OUTDIR_PLACEHOLDER],
        ),
    ]
}

pub fn default_source_candidates() -> Vec<BuildCandidate> {
    vec![
        BuildCandidate::new(
            "build --sdist",
            &["-m", "build", "--sdist", "--outdir", OUTDIR_PLACEHOLDER],
        ),
        BuildCandidate::new(
            "setup.py sdist",
            &["setup.py", "sdist", "--dist-dir", OUTDIR_PLACEHOLDER],
        )
        .with_setup_shim(),
    ]
}

/// Per-category result of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category: StrategyCategory,
    /// Label of the candidate that succeeded, if any
    pub succeeded_with: Option<String>,
    pub failures: Vec<Failure>,
}

impl CategoryResult {
    pub fn succeeded(&self) -> bool {
        self.succeeded_with.is_some()
    }
}

/// Whether warnings found during verification are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStrictness {
    /// Warnings are reported, the build still succeeds
    #[default]
    Lenient,
    /// Any warning fails the run
    Strict,
}

/// Publish menu selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishTarget {
    Test,
    Production,
    Both,
}

/// All runtime knobs, after merging the config file with CLI overrides.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub interpreter_candidates: Vec<String>,
    pub liveness_required: Vec<String>,
    pub liveness_statement: String,
    pub probe_timeout: Duration,
    pub min_version: Version,
    pub tools: Vec<String>,
    pub install_missing: bool,
    pub install_timeout: Duration,
    pub output_dir: PathBuf,
    pub clean_paths: Vec<String>,
    pub build_timeout: Duration,
    pub smoke_test: Option<PathBuf>,
    pub strategies: Vec<BuildStrategy>,
    pub strictness: VerifyStrictness,
    pub verify_timeout: Duration,
    pub test_repository: String,
    pub production_repository: String,
    pub upload_timeout: Duration,
    pub state_dir: PathBuf,
    /// Number of output lines kept in failure messages
    pub output_lines: usize,
}

impl RuntimeOptions {
    pub fn validate(&self) -> Result<()> {
        if self.interpreter_candidates.is_empty() {
            bail!("at least one interpreter candidate is required");
        }
        if self.strategies.iter().all(|s| s.candidates.is_empty()) {
            bail!("no build candidates configured");
        }
        if self.output_dir.as_os_str().is_empty() {
            bail!("output directory cannot be empty");
        }
        Ok(())
    }
}
