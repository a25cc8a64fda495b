//! Stage orchestration.
//!
//! Stages run strictly in sequence and each one is a gate:
//! consistency → clean → probe → build → verify → (publish). Leaf modules
//! return plain reports; this module decides what to tell the user and which
//! conditions stop the run.

use std::path::{Component, Path, PathBuf};

use anyhow::bail;
use chrono::Utc;
use tracing::{info, warn};
use wheelwright_process::{CommandRunner, LineObserver};

use crate::build::{self, BuildContext, BuildOutcome};
use crate::clean;
use crate::consistency::{self, ConsistencyReport};
use crate::error::WheelwrightError;
use crate::probe::{self, ProbeReport, ToolStatus};
use crate::prompt::{AssumeYes, Prompter};
use crate::publish::{AbortReason, PublishOutcome, Publisher};
use crate::receipt::{self, BuildReceipt, RunStatus};
use crate::types::{Interpreter, Project, PublishTarget, RuntimeOptions};
use crate::verify::{self, VerificationReport};

pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Everything a command needs: the project, the merged options and the
/// injectable collaborators.
pub struct Session<'a> {
    pub project: &'a Project,
    pub opts: &'a RuntimeOptions,
    pub runner: &'a dyn CommandRunner,
    pub prompter: &'a mut dyn Prompter,
    pub reporter: &'a mut dyn Reporter,
    /// Receives build and upload output line by line
    pub observer: &'a mut dyn LineObserver,
}

impl Session<'_> {
    /// Absolute output directory. The directory is deleted before each
    /// build, so it may not climb out with `..` and may not be (or contain)
    /// the project root, neither lexically nor through symlinks.
    pub fn output_dir(&self) -> Result<PathBuf, WheelwrightError> {
        let configured = &self.opts.output_dir;
        if configured.components().any(|c| c == Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "output directory {} must not contain '..'",
                configured.display()
            )
            .into());
        }

        let out: PathBuf = self
            .project
            .resolve(configured)
            .components()
            .filter(|c| *c != Component::CurDir)
            .collect();
        let root = self.project.root();
        let contains_root = root.starts_with(&out)
            || match (root.canonicalize(), out.canonicalize()) {
                (Ok(real_root), Ok(real_out)) => real_root.starts_with(real_out),
                _ => false,
            };
        if contains_root {
            return Err(anyhow::anyhow!(
                "output directory {} contains the project root",
                out.display()
            )
            .into());
        }
        Ok(out)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.project.resolve(&self.opts.state_dir)
    }
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub interpreter: Interpreter,
    pub cleaned: Vec<PathBuf>,
    pub outcome: BuildOutcome,
    pub verification: VerificationReport,
    /// Where the receipt was written, if writing succeeded
    pub receipt: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PublishReport {
    pub build: BuildReport,
    pub outcome: PublishOutcome,
}

/// How the publish stage is driven.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishRequest {
    /// Skip the menu
    pub target: Option<PublishTarget>,
    /// Answer the production confirmation with yes
    pub assume_yes: bool,
}

#[derive(Debug, Clone)]
pub struct DoctorReport {
    pub probe: ProbeReport,
    pub tools: Vec<(String, bool)>,
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
}

/// Consistency check on its own. An unresolved mismatch is an error; with
/// `fix`, the remediation is offered (and applied only after a yes).
pub fn run_check(s: &mut Session<'_>, fix: bool) -> Result<ConsistencyReport, WheelwrightError> {
    let manifest = s.project.manifest_path();
    let report = consistency::check(&manifest)?;
    if !report.is_mismatch() {
        s.reporter.info(&report.to_string());
        return Ok(report);
    }
    for mismatch in &report.mismatches {
        s.reporter.warn(&mismatch.to_string());
    }

    let Some(remediation) = report.remediation.clone() else {
        return Err(WheelwrightError::ConsistencyMismatch(format!(
            "{report}; no automatic fix available"
        )));
    };
    if !fix {
        s.reporter.info(&format!(
            "suggested fix: {remediation} (run `wheelwright check --fix` to apply)"
        ));
        return Err(WheelwrightError::ConsistencyMismatch(report.to_string()));
    }
    if !s.prompter.confirm(&format!("Apply fix: {remediation}?"))? {
        return Err(WheelwrightError::ConsistencyMismatch(report.to_string()));
    }
    consistency::apply_remediation(&manifest, &remediation)?;
    s.reporter.info(&format!("updated {}", manifest.display()));

    let rechecked = consistency::check(&manifest)?;
    if rechecked.is_mismatch() {
        return Err(WheelwrightError::ConsistencyMismatch(rechecked.to_string()));
    }
    s.reporter.info(&rechecked.to_string());
    Ok(rechecked)
}

/// Removes build output: the configured clean list plus the output directory.
pub fn run_clean(s: &mut Session<'_>) -> Result<Vec<PathBuf>, WheelwrightError> {
    let out = s.output_dir()?;
    let mut removed = clean::clean(s.project.root(), &s.opts.clean_paths)?;
    if clean::remove_path(&out)? {
        removed.push(out);
    }
    for path in &removed {
        s.reporter.info(&format!("removed {}", display_relative(s.project.root(), path)));
    }
    if removed.is_empty() {
        s.reporter.info("nothing to clean");
    }
    Ok(removed)
}

/// Full pipeline through verification. A receipt is written whether or not
/// the run succeeds.
pub fn run_build(s: &mut Session<'_>) -> Result<BuildReport, WheelwrightError> {
    let mut receipt = BuildReceipt::new(s.project.root(), Utc::now());
    let result = build_stages(s, &mut receipt);
    let written = finish_receipt(s, &mut receipt, result.as_ref().err());
    result.map(|mut report| {
        report.receipt = written;
        report
    })
}

/// Build, then the interactive publish flow.
pub fn run_publish(
    s: &mut Session<'_>,
    request: PublishRequest,
) -> Result<PublishReport, WheelwrightError> {
    let mut receipt = BuildReceipt::new(s.project.root(), Utc::now());
    let result = match build_stages(s, &mut receipt) {
        Ok(build) => {
            let outcome = publish_stage(s, &build, request);
            if let Ok(outcome) = &outcome {
                receipt.publish = Some(outcome.clone());
            }
            outcome
                .and_then(PublishOutcome::into_result)
                .map(|outcome| PublishReport { build, outcome })
        }
        Err(e) => Err(e),
    };
    let written = finish_receipt(s, &mut receipt, result.as_ref().err());
    result.map(|mut report| {
        report.build.receipt = written;
        report
    })
}

/// Shows the interpreter that would be selected and which tools are
/// installed. Never installs anything.
pub fn run_doctor(s: &mut Session<'_>) -> Result<DoctorReport, WheelwrightError> {
    let probe = probe::locate_interpreter(s.runner, s.opts)?;
    let mut tools = Vec::with_capacity(s.opts.tools.len());
    for tool in &s.opts.tools {
        let present = probe::check_tool(s.runner, &probe.interpreter, tool, s.opts)?;
        tools.push((tool.clone(), present));
    }
    Ok(DoctorReport {
        probe,
        tools,
        output_dir: s.output_dir()?,
        state_dir: s.state_dir(),
    })
}

fn build_stages(
    s: &mut Session<'_>,
    receipt: &mut BuildReceipt,
) -> Result<BuildReport, WheelwrightError> {
    let output_dir = s.output_dir()?;

    consistency_gate(s)?;

    s.reporter.info("cleaning previous build output...");
    receipt.cleaned = run_clean(s)?;

    s.reporter.info("locating python interpreter...");
    let probe = probe::locate_interpreter(s.runner, s.opts)?;
    for rejected in &probe.rejected {
        s.reporter
            .info(&format!("  skipped {}: {}", rejected.label, rejected.reason));
    }
    s.reporter.info(&format!("using {}", probe.interpreter));
    if probe.below_floor {
        s.reporter.warn(&format!(
            "{} is older than the supported minimum {}; continuing",
            probe.interpreter, s.opts.min_version
        ));
    }
    let python = probe.interpreter;
    receipt.interpreter = Some(python.clone());

    ensure_tools(s, &python)?;

    if let Some(script) = &s.opts.smoke_test {
        s.reporter
            .info(&format!("running smoke test {}...", script.display()));
        build::run_smoke_test(s.runner, &python, s.project.root(), script, s.opts)?;
    }

    let ctx = BuildContext {
        runner: s.runner,
        python: &python,
        project_root: s.project.root(),
        output_dir: &output_dir,
        opts: s.opts,
    };
    let outcome = build::build(&ctx, &s.opts.strategies, &mut *s.reporter, &mut *s.observer)?;
    receipt.build = Some(outcome.clone());
    for path in outcome.artifacts.all() {
        s.reporter
            .info(&format!("built {}", display_relative(s.project.root(), path)));
    }

    s.reporter.info("verifying artifacts...");
    let verification = verify::verify(s.runner, &python, &outcome.artifacts, s.opts)?;
    receipt.verification = Some(verification.clone());
    for warning in &verification.warnings {
        s.reporter.warn(&warning.to_string());
    }
    verification.enforce(s.opts.strictness)?;

    Ok(BuildReport {
        interpreter: python,
        cleaned: receipt.cleaned.clone(),
        outcome,
        verification,
        receipt: None,
    })
}

/// On mismatch: offer the fix, then offer to proceed anyway. Declining both
/// stops the run before anything is touched.
fn consistency_gate(s: &mut Session<'_>) -> Result<(), WheelwrightError> {
    s.reporter.info("checking package name consistency...");
    let manifest = s.project.manifest_path();
    let mut report = consistency::check(&manifest)?;
    if !report.is_mismatch() {
        return Ok(());
    }
    for mismatch in &report.mismatches {
        s.reporter.warn(&mismatch.to_string());
    }

    if let Some(remediation) = report.remediation.clone() {
        s.reporter.info(&format!("suggested fix: {remediation}"));
        if s.prompter.confirm(&format!("Apply fix: {remediation}?"))? {
            consistency::apply_remediation(&manifest, &remediation)?;
            s.reporter.info(&format!("updated {}", manifest.display()));
            report = consistency::check(&manifest)?;
            if !report.is_mismatch() {
                return Ok(());
            }
            for mismatch in &report.mismatches {
                s.reporter.warn(&mismatch.to_string());
            }
        }
    }

    if s.prompter.confirm("Proceed with the build anyway?")? {
        s.reporter.warn("continuing despite package name mismatch");
        Ok(())
    } else {
        Err(WheelwrightError::ConsistencyMismatch(report.to_string()))
    }
}

/// Missing tools are reported, not fatal: the stage that needs one fails on
/// its own and the fallback list decides what happens next.
fn ensure_tools(s: &mut Session<'_>, python: &Interpreter) -> Result<(), WheelwrightError> {
    for tool in &s.opts.tools {
        match probe::ensure_tool_available(s.runner, python, tool, s.opts)? {
            ToolStatus::Present => {}
            ToolStatus::Installed => s.reporter.info(&format!("installed {tool}")),
            ToolStatus::Missing { detail } => {
                s.reporter.warn(&format!("{tool} unavailable: {detail}"));
            }
        }
    }
    Ok(())
}

fn publish_stage(
    s: &mut Session<'_>,
    build: &BuildReport,
    request: PublishRequest,
) -> Result<PublishOutcome, WheelwrightError> {
    if build.outcome.artifacts.is_empty() {
        return Err(anyhow::anyhow!("nothing to publish").into());
    }
    let mut assume_yes;
    let prompter: &mut dyn Prompter = if request.assume_yes {
        assume_yes = AssumeYes::new(&mut *s.prompter);
        &mut assume_yes
    } else {
        &mut *s.prompter
    };
    let outcome = Publisher {
        runner: s.runner,
        python: &build.interpreter,
        artifacts: &build.outcome.artifacts,
        opts: s.opts,
        prompter,
        reporter: &mut *s.reporter,
        observer: &mut *s.observer,
    }
    .run(request.target)?;

    match &outcome {
        PublishOutcome::Published { targets } => {
            let names: Vec<String> = targets.iter().map(ToString::to_string).collect();
            s.reporter
                .info(&format!("published to {}", names.join(" and ")));
        }
        PublishOutcome::Aborted {
            reason: AbortReason::UserExit,
            ..
        } => s.reporter.info(&AbortReason::UserExit.to_string()),
        PublishOutcome::Aborted { .. } | PublishOutcome::Failed { .. } | PublishOutcome::Cancelled => {}
    }
    Ok(outcome)
}

fn finish_receipt(
    s: &mut Session<'_>,
    receipt: &mut BuildReceipt,
    error: Option<&WheelwrightError>,
) -> Option<PathBuf> {
    receipt.finished_at = Utc::now();
    receipt.status = match error {
        None => RunStatus::Succeeded,
        Some(WheelwrightError::UserCancelled) => RunStatus::Cancelled,
        Some(_) => RunStatus::Failed,
    };
    receipt.error = error.map(ToString::to_string);

    let state_dir = s.state_dir();
    match receipt::write_receipt(&state_dir, receipt) {
        Ok(()) => {
            info!(path = %receipt::receipt_path(&state_dir).display(), "receipt written");
            Some(receipt::receipt_path(&state_dir))
        }
        Err(e) => {
            let error = format!("{e:#}");
            warn!(%error, "failed to write receipt");
            s.reporter.warn(&format!("failed to write receipt: {error}"));
            None
        }
    }
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

/// Creates the commented default config file.
pub fn init_config(root: &Path, force: bool) -> anyhow::Result<PathBuf> {
    let path = root.join(crate::config::CONFIG_FILE);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    std::fs::write(&path, crate::config::WheelwrightConfig::default_toml_template())
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliOverrides, WheelwrightConfig};
    use crate::prompt::ScriptedPrompter;
    use crate::test_support::{CollectingReporter, FakeRunner, Response};
    use crate::types::{ArtifactSet, MANIFEST_FILE, VerifyStrictness};
    use std::fs;
    use tempfile::TempDir;
    use wheelwright_process::NullObserver;

    const WHEEL: &str = "demo-0.1.0-py3-none-any.whl";
    const SDIST: &str = "demo-0.1.0.tar.gz";

    struct Fixture {
        td: TempDir,
        project: Project,
        opts: RuntimeOptions,
    }

    impl Fixture {
        fn new(manifest: &str) -> Self {
            let td = tempfile::tempdir().expect("tempdir");
            fs::write(td.path().join(MANIFEST_FILE), manifest).expect("manifest");
            fs::create_dir(td.path().join("demo")).expect("mkdir");
            fs::write(td.path().join("demo/__init__.py"), "").expect("init");
            let project = Project::open(td.path()).expect("open");
            let opts = WheelwrightConfig::default().build_runtime_options(CliOverrides::default());
            Self { td, project, opts }
        }

        fn root(&self) -> &Path {
            self.td.path()
        }

        fn dist(&self) -> PathBuf {
            self.project.root().join("dist")
        }

        /// Interpreter, tools and a passing integrity check.
        fn healthy_runner(&self) -> FakeRunner {
            FakeRunner::new()
                .on("py --version", Response::ok(["Python 3.11.4"]))
                .on("-m pip show", Response::ok(["Name: tool"]))
                .on("-m twine check", Response::ok(["PASSED"]))
        }
    }

    const DEMO: &str = "[project]\nname = \"demo\"\nversion = \"0.1.0\"\n\n[project.scripts]\ndemo = \"demo.cli:main\"\n";

    fn session<'a>(
        fx: &'a Fixture,
        runner: &'a FakeRunner,
        prompter: &'a mut ScriptedPrompter,
        reporter: &'a mut CollectingReporter,
        observer: &'a mut NullObserver,
    ) -> Session<'a> {
        Session {
            project: &fx.project,
            opts: &fx.opts,
            runner,
            prompter,
            reporter,
            observer,
        }
    }

    #[test]
    fn end_to_end_build_with_source_fallback() {
        let fx = Fixture::new(DEMO);
        let runner = fx
            .healthy_runner()
            .on("pip wheel", Response::ok(["Successfully built demo"]).creating(fx.dist().join(WHEEL)))
            .on("build --sdist", Response::fail(1, "ERROR Backend subprocess exited"))
            .on("setup.py sdist", Response::ok(["running sdist"]).creating(fx.dist().join(SDIST)));
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let report = run_build(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect("build");

        assert_eq!(report.outcome.artifacts.binary, vec![fx.dist().join(WHEEL)]);
        assert_eq!(report.outcome.artifacts.source, vec![fx.dist().join(SDIST)]);
        assert!(report.verification.is_clean());
        assert!(reporter.warns.is_empty(), "{:?}", reporter.warns);
        assert!(prompter.asked().is_empty());

        let receipt_file = report.receipt.expect("receipt written");
        assert_eq!(receipt_file, fx.root().join(".wheelwright/last-build.json"));
        let receipt = receipt::load_receipt(&fx.root().join(".wheelwright"))
            .expect("load")
            .expect("some");
        assert_eq!(receipt.status, RunStatus::Succeeded);
        assert_eq!(receipt.interpreter.expect("interp").command, "py");
    }

    #[test]
    fn both_categories_failing_is_build_failed() {
        let fx = Fixture::new(DEMO);
        let runner = fx
            .healthy_runner()
            .on("pip wheel", Response::fail(1, "no"))
            .on("build --wheel", Response::timed_out())
            .on("build --sdist", Response::fail(1, "no"))
            .on("setup.py sdist", Response::fail(1, "no"));
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let err = run_build(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect_err("build fails");
        assert!(matches!(err, WheelwrightError::BuildFailed { .. }));
        assert!(ArtifactSet::scan(&fx.dist()).expect("scan").is_empty());
        assert!(!runner.ran("twine check"));

        let receipt = receipt::load_receipt(&fx.root().join(".wheelwright"))
            .expect("load")
            .expect("some");
        assert_eq!(receipt.status, RunStatus::Failed);
        assert!(receipt.error.expect("error").starts_with("build failed"));
    }

    #[test]
    fn declined_mismatch_stops_before_cleaning() {
        let fx = Fixture::new("[project]\nname = \"other\"\n");
        fs::create_dir(fx.dist()).expect("mkdir dist");
        let runner = fx.healthy_runner();
        let mut prompter = ScriptedPrompter::new(["n", "n"]);
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let err = run_build(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect_err("mismatch");
        assert!(matches!(err, WheelwrightError::ConsistencyMismatch(_)));
        assert_eq!(
            prompter.asked(),
            &[
                "Apply fix: change the declared name in pyproject.toml from 'other' to 'demo'?",
                "Proceed with the build anyway?"
            ]
        );
        assert!(fx.dist().exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn accepted_fix_rewrites_manifest_and_builds() {
        let fx = Fixture::new("[project]\nname = \"other\"\nversion = \"0.1.0\"\n");
        let runner = fx
            .healthy_runner()
            .on("pip wheel", Response::ok(Vec::<String>::new()).creating(fx.dist().join(WHEEL)))
            .on("build --sdist", Response::ok(Vec::<String>::new()).creating(fx.dist().join(SDIST)));
        let mut prompter = ScriptedPrompter::new(["y"]);
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        run_build(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect("build");
        let manifest = fs::read_to_string(fx.root().join(MANIFEST_FILE)).expect("read");
        assert_eq!(manifest, "[project]\nname = \"demo\"\nversion = \"0.1.0\"\n");
        assert_eq!(prompter.asked().len(), 1);
    }

    #[test]
    fn proceed_anyway_builds_without_touching_manifest() {
        let original = "[project]\nname = \"other\"\n";
        let fx = Fixture::new(original);
        let runner = fx
            .healthy_runner()
            .on("pip wheel", Response::ok(Vec::<String>::new()).creating(fx.dist().join(WHEEL)))
            .on("build --sdist", Response::ok(Vec::<String>::new()).creating(fx.dist().join(SDIST)));
        let mut prompter = ScriptedPrompter::new(["n", "y"]);
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        run_build(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect("build");
        assert_eq!(
            fs::read_to_string(fx.root().join(MANIFEST_FILE)).expect("read"),
            original
        );
        assert!(
            reporter
                .warns
                .iter()
                .any(|w| w == "continuing despite package name mismatch")
        );
    }

    #[test]
    fn strict_mode_fails_on_missing_source_artifact() {
        let mut fx = Fixture::new(DEMO);
        fx.opts.strictness = VerifyStrictness::Strict;
        let runner = fx
            .healthy_runner()
            .on("pip wheel", Response::ok(Vec::<String>::new()).creating(fx.dist().join(WHEEL)))
            .on("sdist", Response::fail(1, "no"));
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let err = run_build(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect_err("strict");
        assert!(matches!(err, WheelwrightError::VerificationFailed { .. }));
        // Artifacts are kept; only the verdict changes.
        assert!(fx.dist().join(WHEEL).exists());
    }

    #[test]
    fn missing_tools_are_installed_or_reported() {
        let fx = Fixture::new(DEMO);
        let runner = FakeRunner::new()
            .on("py --version", Response::ok(["Python 3.11.4"]))
            .once("-m pip show build", Response::fail(1, "not found"))
            .on("-m pip install build", Response::ok(["Successfully installed build"]))
            .on("-m pip show build", Response::ok(["Name: build"]))
            .on("-m pip show twine", Response::fail(1, "not found"))
            .on("-m pip install twine", Response::fail(1, "offline"))
            .on("-m pip show wheel", Response::ok(["Name: wheel"]))
            .on("pip wheel", Response::ok(Vec::<String>::new()).creating(fx.dist().join(WHEEL)))
            .on("build --sdist", Response::ok(Vec::<String>::new()).creating(fx.dist().join(SDIST)));
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let report = run_build(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect("lenient build");
        assert!(reporter.infos.iter().any(|m| m == "installed build"));
        assert!(reporter.warns.iter().any(|m| m.starts_with("twine unavailable")));
        // twine check cannot start: a warning, not a failure.
        assert!(!report.verification.is_clean());
    }

    #[test]
    fn cancelled_build_removes_output_and_records_cancellation() {
        let fx = Fixture::new(DEMO);
        let runner = fx
            .healthy_runner()
            .on("pip wheel", Response::cancelled().creating(fx.dist().join("partial.whl")));
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let err = run_build(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect_err("cancelled");
        assert!(matches!(err, WheelwrightError::UserCancelled));
        assert!(!fx.dist().exists());
        assert!(!runner.ran("sdist"));
        let receipt = receipt::load_receipt(&fx.root().join(".wheelwright"))
            .expect("load")
            .expect("some");
        assert_eq!(receipt.status, RunStatus::Cancelled);
    }

    #[test]
    fn publish_both_with_failed_test_upload_skips_production() {
        let fx = Fixture::new(DEMO);
        let runner = fx
            .healthy_runner()
            .on("pip wheel", Response::ok(Vec::<String>::new()).creating(fx.dist().join(WHEEL)))
            .on("build --sdist", Response::ok(Vec::<String>::new()).creating(fx.dist().join(SDIST)))
            .on("--repository testpypi", Response::fail(1, "403 Forbidden"))
            .on("--repository pypi", Response::ok(Vec::<String>::new()));
        let mut prompter = ScriptedPrompter::new(["3", "y"]);
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let err = run_publish(
            &mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer),
            PublishRequest::default(),
        )
        .expect_err("upload fails");
        match err {
            WheelwrightError::UploadFailed { repository, .. } => assert_eq!(repository, "testpypi"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(prompter.asked(), &["Select publish target:"]);
        assert!(!runner.ran("--repository pypi"));

        let receipt = receipt::load_receipt(&fx.root().join(".wheelwright"))
            .expect("load")
            .expect("some");
        assert!(matches!(receipt.publish, Some(PublishOutcome::Failed { .. })));
        assert_eq!(receipt.status, RunStatus::Failed);
    }

    #[test]
    fn publish_with_assume_yes_uploads_both() {
        let fx = Fixture::new(DEMO);
        let runner = fx
            .healthy_runner()
            .on("pip wheel", Response::ok(Vec::<String>::new()).creating(fx.dist().join(WHEEL)))
            .on("build --sdist", Response::ok(Vec::<String>::new()).creating(fx.dist().join(SDIST)))
            .on("twine upload", Response::ok(Vec::<String>::new()));
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let report = run_publish(
            &mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer),
            PublishRequest {
                target: Some(PublishTarget::Both),
                assume_yes: true,
            },
        )
        .expect("publish");
        assert!(matches!(report.outcome, PublishOutcome::Published { ref targets } if targets.len() == 2));
        assert!(prompter.asked().is_empty());
        assert!(reporter.infos.iter().any(|m| m == "published to test registry and production registry"));
    }

    #[test]
    fn clean_removes_custom_output_dir() {
        let mut fx = Fixture::new(DEMO);
        fx.opts.output_dir = PathBuf::from("out");
        fs::create_dir_all(fx.root().join("out")).expect("mkdir");
        fs::create_dir_all(fx.root().join("demo.egg-info")).expect("mkdir");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let removed = run_clean(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect("clean");
        assert_eq!(
            removed,
            vec![fx.project.root().join("demo.egg-info"), fx.project.root().join("out")]
        );
        assert_eq!(reporter.infos, vec!["removed demo.egg-info", "removed out"]);
    }

    #[test]
    fn output_dir_may_not_contain_the_project() {
        let mut fx = Fixture::new(DEMO);
        fx.opts.output_dir = PathBuf::from(".");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let err = run_clean(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect_err("refused");
        assert!(err.to_string().contains("contains the project root"));
        assert!(fx.root().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn output_dir_may_not_climb_out_of_the_project() {
        for configured in ["..", "dist/..", "dist/../.."] {
            let mut fx = Fixture::new(DEMO);
            fs::create_dir_all(fx.root().join("dist")).expect("mkdir");
            let sibling = fx.root().join("dist/keep.txt");
            fs::write(&sibling, "x").expect("write");
            fx.opts.output_dir = PathBuf::from(configured);
            let runner = FakeRunner::new();
            let mut prompter = ScriptedPrompter::default();
            let mut reporter = CollectingReporter::default();
            let mut observer = NullObserver;

            let err = run_clean(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
                .expect_err("refused");
            assert!(err.to_string().contains("must not contain '..'"), "{configured}: {err}");
            assert!(fx.root().join(MANIFEST_FILE).exists());
            assert!(sibling.exists());
        }
    }

    #[cfg(unix)]
    #[test]
    fn output_dir_symlink_to_an_ancestor_is_refused() {
        let mut fx = Fixture::new(DEMO);
        let parent = fx.project.root().parent().expect("parent").to_path_buf();
        std::os::unix::fs::symlink(&parent, fx.root().join("up")).expect("symlink");
        fx.opts.output_dir = PathBuf::from("up");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let err = run_clean(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect_err("refused");
        assert!(err.to_string().contains("contains the project root"));
        assert!(fx.root().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn check_without_fix_suggests_and_fails() {
        let fx = Fixture::new("[project]\nname = \"other\"\n");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let err = run_check(
            &mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer),
            false,
        )
        .expect_err("mismatch");
        assert!(matches!(err, WheelwrightError::ConsistencyMismatch(_)));
        assert!(prompter.asked().is_empty());
        assert!(reporter.infos[0].contains("wheelwright check --fix"));
    }

    #[test]
    fn check_with_fix_applies_after_yes() {
        let fx = Fixture::new("[project]\nname = \"other\"\n");
        let runner = FakeRunner::new();
        let mut prompter = ScriptedPrompter::new(["y"]);
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let report = run_check(
            &mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer),
            true,
        )
        .expect("fixed");
        assert_eq!(report.declared_name, "demo");
    }

    #[test]
    fn doctor_lists_tools_without_installing() {
        let fx = Fixture::new(DEMO);
        let runner = FakeRunner::new()
            .on("py --version", Response::ok(["Python 3.12.0"]))
            .on("-m pip show build", Response::ok(["Name: build"]))
            .on("-m pip show", Response::fail(1, "not found"));
        let mut prompter = ScriptedPrompter::default();
        let mut reporter = CollectingReporter::default();
        let mut observer = NullObserver;

        let report = run_doctor(&mut session(&fx, &runner, &mut prompter, &mut reporter, &mut observer))
            .expect("doctor");
        assert_eq!(report.probe.interpreter.command, "py");
        assert_eq!(
            report.tools,
            vec![
                ("build".to_string(), true),
                ("twine".to_string(), false),
                ("wheel".to_string(), false)
            ]
        );
        assert!(!runner.ran("pip install"));
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = init_config(td.path(), false).expect("init");
        assert!(path.exists());
        assert!(init_config(td.path(), false).is_err());
        assert!(init_config(td.path(), true).is_ok());
    }
}
