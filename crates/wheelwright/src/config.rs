//! Configuration file support for wheelwright (`.wheelwright.toml`)
//!
//! The file is optional and lives in the project root next to the manifest.
//! Every section falls back to defaults, so a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::types::{
    BuildCandidate, BuildStrategy, RuntimeOptions, StrategyCategory, SuccessPredicate, Version,
    VerifyStrictness, default_binary_candidates, default_source_candidates,
};

/// File name looked up in the project root.
pub const CONFIG_FILE: &str = ".wheelwright.toml";

/// Interpreter discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Commands probed in order
    pub candidates: Vec<String>,
    /// Commands that must also pass the liveness check (stub detection)
    pub liveness_required: Vec<String>,
    /// Statement executed by the liveness check
    pub liveness_statement: String,
    /// Bound on each version query and liveness check
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    /// Versions below this only produce a warning
    pub min_version: Version,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            candidates: vec!["py".to_string(), "python3".to_string(), "python".to_string()],
            liveness_required: vec!["python".to_string()],
            liveness_statement: "import sys".to_string(),
            probe_timeout: Duration::from_secs(5),
            min_version: Version::new(3, 8),
        }
    }
}

/// Auxiliary tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Interpreter modules the pipeline relies on
    pub required: Vec<String>,
    /// Install missing tools with pip
    pub install_missing: bool,
    #[serde(with = "humantime_serde")]
    pub install_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            required: vec!["build".to_string(), "twine".to_string(), "wheel".to_string()],
            install_missing: true,
            install_timeout: Duration::from_secs(300),
        }
    }
}

/// Build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Flat directory receiving every artifact
    pub output_dir: PathBuf,
    /// Removed before each build; `*suffix` entries match in the project root
    pub clean: Vec<String>,
    /// Per-candidate timeout; a hanging build tool is killed and the next candidate runs
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Script run with the interpreter before building
    pub smoke_test: Option<PathBuf>,
    /// Require a new artifact, not just a zero exit status
    pub require_artifact: bool,
    pub binary: Vec<BuildCandidate>,
    pub source: Vec<BuildCandidate>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("dist"),
            clean: vec![
                "build".to_string(),
                "dist".to_string(),
                "*.egg-info".to_string(),
            ],
            timeout: Duration::from_secs(15 * 60),
            smoke_test: None,
            require_artifact: true,
            binary: default_binary_candidates(),
            source: default_source_candidates(),
        }
    }
}

/// Verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub strictness: VerifyStrictness,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            strictness: VerifyStrictness::Lenient,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Upload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Repository name passed to `twine upload --repository` for test uploads
    pub test_repository: String,
    /// Repository name for production uploads
    pub production_repository: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            test_repository: "testpypi".to_string(),
            production_repository: "pypi".to_string(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Configuration loaded from .wheelwright.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WheelwrightConfig {
    pub interpreter: InterpreterConfig,
    pub tools: ToolsConfig,
    pub build: BuildConfig,
    pub verify: VerifyConfig,
    pub publish: PublishConfig,
    /// Directory for build receipts (never cleaned)
    pub state_dir: PathBuf,
    /// Number of output lines quoted in failure messages
    pub output_lines: usize,
}

impl Default for WheelwrightConfig {
    fn default() -> Self {
        Self {
            interpreter: InterpreterConfig::default(),
            tools: ToolsConfig::default(),
            build: BuildConfig::default(),
            verify: VerifyConfig::default(),
            publish: PublishConfig::default(),
            state_dir: PathBuf::from(".wheelwright"),
            output_lines: 5,
        }
    }
}

/// CLI overrides for merging with config file values.
///
/// `Option` fields mean "user did not pass this flag" when `None`.
/// `bool` fields mean "user explicitly enabled this" when `true`.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub python: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub build_timeout: Option<Duration>,
    pub state_dir: Option<PathBuf>,
    pub strict: bool,
    pub no_install: bool,
}

impl WheelwrightConfig {
    /// Load configuration from the project root.
    ///
    /// Returns `Ok(None)` if no config file exists.
    pub fn load_from_project(root: &Path) -> Result<Option<Self>> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from_file(&path).map(Some)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: WheelwrightConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.interpreter.candidates.is_empty() {
            bail!("interpreter.candidates must not be empty");
        }
        if self.interpreter.candidates.iter().any(|c| c.trim().is_empty()) {
            bail!("interpreter.candidates must not contain empty names");
        }
        if self.interpreter.probe_timeout.is_zero() {
            bail!("interpreter.probe_timeout must be greater than 0");
        }
        if self.build.timeout.is_zero() {
            bail!("build.timeout must be greater than 0");
        }
        if self.build.binary.is_empty() && self.build.source.is_empty() {
            bail!("at least one of build.binary or build.source must list a candidate");
        }
        for candidate in self.build.binary.iter().chain(self.build.source.iter()) {
            if candidate.label.trim().is_empty() {
                bail!("build candidates need a label");
            }
            if candidate.args.is_empty() {
                bail!("build candidate '{}' has no arguments", candidate.label);
            }
        }
        if self.build.output_dir.as_os_str().is_empty() {
            bail!("build.output_dir cannot be empty");
        }
        if self.verify.timeout.is_zero() {
            bail!("verify.timeout must be greater than 0");
        }
        if self.publish.test_repository.trim().is_empty()
            || self.publish.production_repository.trim().is_empty()
        {
            bail!("publish repository names cannot be empty");
        }
        if self.publish.test_repository == self.publish.production_repository {
            bail!("publish.test_repository and publish.production_repository must differ");
        }
        if self.output_lines == 0 {
            bail!("output_lines must be greater than 0");
        }
        Ok(())
    }

    /// Merge config values with CLI overrides into [`RuntimeOptions`].
    ///
    /// For `Option` fields: CLI value takes precedence; falls back to config.
    /// For `bool` flags: `true` if either CLI or config enables it (OR).
    pub fn build_runtime_options(&self, cli: CliOverrides) -> RuntimeOptions {
        let success = if self.build.require_artifact {
            SuccessPredicate::ArtifactProduced
        } else {
            SuccessPredicate::ExitStatus
        };

        RuntimeOptions {
            interpreter_candidates: match cli.python {
                Some(python) => vec![python],
                None => self.interpreter.candidates.clone(),
            },
            liveness_required: self.interpreter.liveness_required.clone(),
            liveness_statement: self.interpreter.liveness_statement.clone(),
            probe_timeout: self.interpreter.probe_timeout,
            min_version: self.interpreter.min_version,
            tools: self.tools.required.clone(),
            install_missing: self.tools.install_missing && !cli.no_install,
            install_timeout: self.tools.install_timeout,
            output_dir: cli
                .output_dir
                .unwrap_or_else(|| self.build.output_dir.clone()),
            clean_paths: self.build.clean.clone(),
            build_timeout: cli.build_timeout.unwrap_or(self.build.timeout),
            smoke_test: self.build.smoke_test.clone(),
            strategies: vec![
                BuildStrategy {
                    category: StrategyCategory::Binary,
                    candidates: self.build.binary.clone(),
                    success,
                },
                BuildStrategy {
                    category: StrategyCategory::Source,
                    candidates: self.build.source.clone(),
                    success,
                },
            ],
            strictness: if cli.strict {
                VerifyStrictness::Strict
            } else {
                self.verify.strictness
            },
            verify_timeout: self.verify.timeout,
            test_repository: self.publish.test_repository.clone(),
            production_repository: self.publish.production_repository.clone(),
            upload_timeout: self.publish.timeout,
            state_dir: cli.state_dir.unwrap_or_else(|| self.state_dir.clone()),
            output_lines: self.output_lines,
        }
    }

    /// Generate a default configuration file content as TOML string
    pub fn default_toml_template() -> String {
        r#"# wheelwright configuration file
# Place this file in the project root (next to pyproject.toml) as .wheelwright.toml

# Directory for build receipts (never cleaned)
state_dir = ".wheelwright"
# Number of output lines quoted in failure messages
output_lines = 5

[interpreter]
# Commands probed in order; the first one that answers --version (and, for
# names in liveness_required, runs a trivial statement) is used
candidates = ["py", "python3", "python"]
# Names that may be placeholder stubs and need the liveness check
liveness_required = ["python"]
liveness_statement = "import sys"
probe_timeout = "5s"
# Older interpreters only produce a warning
min_version = "3.8"

[tools]
# Interpreter modules checked with `pip show` before building
required = ["build", "twine", "wheel"]
# Install missing tools with `pip install`
install_missing = true
install_timeout = "5m"

[build]
# Flat directory receiving wheels and source archives
output_dir = "dist"
# Removed before each build; "*suffix" entries are matched in the project root
clean = ["build", "dist", "*.egg-info"]
# Each candidate is killed after this long and the next one is tried
timeout = "15m"
# Require a new artifact in output_dir, not just a zero exit status
require_artifact = true
# Optional script run with the interpreter before building
# smoke_test = "minimal_test.py"

# Candidates are argument lists passed to the interpreter, tried in order.
# "{outdir}" is replaced by the absolute output directory.
[[build.binary]]
label = "pip wheel"
args = ["-m", "pip", "wheel", ".", "--no-deps", "--wheel-dir", "{outdir}"]

[[build.binary]]
label = "build --wheel (no isolation)"
args = ["-m", "build", "--wheel", "--no-isolation", "--outdir", "{outdir}"]

[[build.source]]
label = "build --sdist"
args = ["-m", "build", "--sdist", "--outdir", "{outdir}"]

[[build.source]]
label = "setup.py sdist"
args = ["setup.py", "sdist", "--dist-dir", "{outdir}"]
# Projects without a setup.py get a temporary one generated from pyproject.toml
setup_shim = true

[verify]
# lenient: missing artifact kinds and `twine check` failures are warnings
# strict: any of those fails the run
strictness = "lenient"
timeout = "2m"

[publish]
# Repository names understood by `twine upload --repository`
test_repository = "testpypi"
production_repository = "pypi"
timeout = "10m"
"#
        .to_string()
    }
}
