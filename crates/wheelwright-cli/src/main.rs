use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use wheelwright::config::{CliOverrides, WheelwrightConfig};
use wheelwright::engine::{self, PublishRequest, Reporter, Session};
use wheelwright::prompt::{Interruptible, Prompter, ScriptedPrompter, StdioPrompter};
use wheelwright::publish::PublishOutcome;
use wheelwright::types::{ArtifactKind, Project, PublishTarget, RuntimeOptions};
use wheelwright::verify::IntegrityStatus;
use wheelwright_process::{CancelToken, SystemRunner};

mod progress;

use progress::{CommandOutput, Console, ConsolePrompter};

#[derive(Parser, Debug)]
#[command(name = "wheelwright", version)]
#[command(about = "Build, verify and publish Python packages with fallbacks at every step")]
struct Cli {
    /// Project root containing pyproject.toml
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Config file, relative to the current directory (default: <project-dir>/.wheelwright.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use this interpreter instead of probing the candidate list
    #[arg(long)]
    python: Option<String>,

    /// Directory receiving built artifacts (default: dist)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Per-candidate build timeout (e.g. 90s, 15m)
    #[arg(long)]
    build_timeout: Option<String>,

    /// Directory for receipts (default: .wheelwright)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Treat verification warnings as errors.
    #[arg(long)]
    strict: bool,

    /// Never install missing build tools.
    #[arg(long)]
    no_install: bool,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check, clean, build and verify.
    Build,
    /// Build, then upload after confirmation.
    Publish {
        /// Skip the menu
        #[arg(long, value_enum)]
        target: Option<TargetArg>,

        /// Answer the production confirmation with yes.
        #[arg(long)]
        yes: bool,

        /// Read prompt answers from a file, one per line (relative to the current directory).
        #[arg(long)]
        answers: Option<PathBuf>,
    },
    /// Compare the declared package name with the module layout.
    Check {
        /// Offer to rewrite the declared name.
        #[arg(long)]
        fix: bool,
    },
    /// Remove build output.
    Clean,
    /// Show the interpreter and tools that would be used.
    Doctor,
    /// Write a default .wheelwright.toml.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TargetArg {
    Test,
    Production,
    Both,
}

impl From<TargetArg> for PublishTarget {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Test => PublishTarget::Test,
            TargetArg::Production => PublishTarget::Production,
            TargetArg::Both => PublishTarget::Both,
        }
    }
}

struct CliReporter {
    console: Console,
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        self.console.clear();
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        self.console.clear();
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        self.console.clear();
        eprintln!("[error] {msg}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let console = Console::new();
    let mut reporter = CliReporter {
        console: console.clone(),
    };
    match run(cli, &console, &mut reporter) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            reporter.error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "wheelwright=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn run(cli: Cli, console: &Console, reporter: &mut CliReporter) -> Result<()> {
    let project_dir = std::path::absolute(&cli.project_dir)
        .with_context(|| format!("invalid project dir {}", cli.project_dir.display()))?;

    if let Commands::Init { force } = cli.cmd {
        let path = engine::init_config(&project_dir, force)?;
        println!("created {}", path.display());
        return Ok(());
    }

    // Nothing is created or probed until the manifest is known to exist.
    let project = Project::open(&project_dir)?;
    let opts = load_options(&cli, &project)?;

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || {
        handler.cancel();
        // A running child is killed by the runner and the run unwinds
        // normally; at a prompt nothing would notice until the next Enter.
        if handler.is_idle() {
            eprintln!();
            eprintln!("[error] cancelled by user");
            std::process::exit(1);
        }
    })
    .context("failed to install Ctrl-C handler")?;
    let runner = SystemRunner::new(cancel.clone());

    let answers = match &cli.cmd {
        Commands::Publish {
            answers: Some(path),
            ..
        } => Some(ScriptedPrompter::from_file(&absolute(path)?)?),
        _ => None,
    };
    let mut prompter: Box<dyn Prompter> = match answers {
        Some(scripted) => Box::new(Interruptible::new(scripted, cancel)),
        None => Box::new(Interruptible::new(
            ConsolePrompter::new(console.clone(), StdioPrompter::terminal()),
            cancel,
        )),
    };
    let mut observer = CommandOutput(console.clone());

    let mut session = Session {
        project: &project,
        opts: &opts,
        runner: &runner,
        prompter: &mut *prompter,
        reporter,
        observer: &mut observer,
    };

    match cli.cmd {
        Commands::Build => {
            let report = engine::run_build(&mut session)?;
            console.clear();
            print_build(&report, project.root());
        }
        Commands::Publish { target, yes, .. } => {
            let request = PublishRequest {
                target: target.map(Into::into),
                assume_yes: yes,
            };
            let report = engine::run_publish(&mut session, request)?;
            console.clear();
            print_build(&report.build, project.root());
            print_publish(&report.outcome);
        }
        Commands::Check { fix } => {
            let report = engine::run_check(&mut session, fix)?;
            println!("package: {}", report.declared_name);
            if let Some(dir) = &report.module_dir {
                println!("module_dir: {dir}");
            }
            if let Some(entry) = &report.entry_point {
                println!("entry_point: {} = {}", entry.script, entry.target);
            }
        }
        Commands::Clean => {
            let removed = engine::run_clean(&mut session)?;
            println!("removed: {}", removed.len());
        }
        Commands::Doctor => {
            let report = engine::run_doctor(&mut session)?;
            print_doctor(&report, &project, &opts);
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

fn load_options(cli: &Cli, project: &Project) -> Result<RuntimeOptions> {
    let config = match &cli.config {
        Some(path) => WheelwrightConfig::load_from_file(&absolute(path)?)?,
        None => WheelwrightConfig::load_from_project(project.root())?.unwrap_or_default(),
    };
    config.validate()?;

    let overrides = CliOverrides {
        python: cli.python.clone(),
        output_dir: cli.output_dir.clone(),
        build_timeout: cli.build_timeout.as_deref().map(parse_duration).transpose()?,
        state_dir: cli.state_dir.clone(),
        strict: cli.strict,
        no_install: cli.no_install,
    };
    let opts = config.build_runtime_options(overrides);
    opts.validate()?;
    Ok(opts)
}

/// Paths given on the command line are relative to the current directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path {}", path.display()))
}

fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s).with_context(|| format!("invalid duration: {s}"))
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
        .replace('\\', "/")
}

fn print_build(report: &engine::BuildReport, root: &Path) {
    println!("interpreter: {}", report.interpreter);
    for kind in [ArtifactKind::Binary, ArtifactKind::Source] {
        let paths = report.outcome.artifacts.of_kind(kind);
        if paths.is_empty() {
            println!("{kind}: none");
        }
        for path in paths {
            println!("{kind}: {}", relative(root, path));
        }
    }
    let integrity = match report.verification.integrity {
        IntegrityStatus::Passed => "passed",
        IntegrityStatus::Failed => "failed",
        IntegrityStatus::NotRun => "not run",
    };
    println!("integrity: {integrity}");
    println!("warnings: {}", report.verification.warnings.len());
    if let Some(receipt) = &report.receipt {
        println!("receipt: {}", relative(root, receipt));
    }
}

fn print_publish(outcome: &PublishOutcome) {
    match outcome {
        PublishOutcome::Published { targets } => {
            for target in targets {
                println!("published: {target}");
            }
        }
        PublishOutcome::Aborted { reason, .. } => println!("publish: {reason}"),
        PublishOutcome::Failed { .. } | PublishOutcome::Cancelled => {}
    }
}

fn print_doctor(report: &engine::DoctorReport, project: &Project, opts: &RuntimeOptions) {
    println!("project_root: {}", project.root().display());
    println!("interpreter: {}", report.probe.interpreter);
    for rejected in &report.probe.rejected {
        println!("  skipped {}: {}", rejected.label, rejected.reason);
    }
    for stub in &report.probe.stubs {
        println!("  stub (not usable): {stub}");
    }
    if report.probe.below_floor {
        println!("  below minimum {}", opts.min_version);
    }
    for (tool, present) in &report.tools {
        let status = if *present { "installed" } else { "missing" };
        println!("{tool}: {status}");
    }
    println!("output_dir: {}", relative(project.root(), &report.output_dir));
    println!("state_dir: {}", relative(project.root(), &report.state_dir));
}
