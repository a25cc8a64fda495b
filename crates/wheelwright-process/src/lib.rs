//! Process execution for wheelwright.
//!
//! This crate runs external programs from a structured [`Invocation`]
//! (program, argument list, working directory, timeout, output mode).
//! Nothing here goes through a shell, so arguments are never re-parsed or
//! re-quoted.
//!
//! Two output modes are supported:
//!
//! - [`OutputMode::Buffered`] captures everything and hands it back once the
//!   process exits. Used for short queries such as `python --version`.
//! - [`OutputMode::Streaming`] forwards every line to a [`LineObserver`] as it
//!   arrives, so long builds show progress before their verdict is known.
//!
//! Both modes report a distinct [`Outcome::Cancelled`] when the shared
//! [`CancelToken`] is tripped (normally by a Ctrl-C handler) or when the
//! child itself died from an interrupt.
//!
//! # Example
//!
//! ```ignore
//! use wheelwright_process::{CommandRunner, Invocation, SystemRunner};
//!
//! let runner = SystemRunner::default();
//! let result = runner.run_buffered(&Invocation::new("python3").arg("--version"));
//! assert!(result.is_success());
//! ```

use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// How a command's output is delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Capture everything, report once the process has exited.
    #[default]
    Buffered,
    /// Forward each line to the observer as soon as it is read.
    Streaming,
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Stdout,
    Stderr,
}

/// A structured external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub mode: OutputMode,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
            mode: OutputMode::Buffered,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn streaming(self) -> Self {
        self.mode(OutputMode::Streaming)
    }
}

/// Renders the command line for humans. Only used for logs and receipts;
/// the runner never executes this string.
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote_arg(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote_arg(arg))?;
        }
        Ok(())
    }
}

fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

/// Normalized verdict of a finished (or abandoned) command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Ran to completion with a non-zero exit code (or a non-interrupt signal).
    Failed,
    /// Killed after exceeding the invocation timeout.
    TimedOut,
    /// Interrupted by the user; callers must not try further fallbacks.
    Cancelled,
    /// Could not be started at all (missing program, permissions, ...).
    SpawnFailed { reason: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::SpawnFailed { reason } => write!(f, "could not start: {reason}"),
        }
    }
}

/// Result of running an [`Invocation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    /// Human-readable command line
    pub command: String,
    pub outcome: Outcome,
    /// Exit code (if the process exited normally)
    pub exit_code: Option<i32>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub duration_ms: u64,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == Outcome::Cancelled
    }

    /// One-line description of why the command did not succeed, including
    /// the last few lines of stderr (or stdout when stderr is empty).
    pub fn failure_summary(&self, lines: usize) -> String {
        let mut summary = match (&self.outcome, self.exit_code) {
            (Outcome::Failed, Some(code)) => format!("exit code {code}"),
            (outcome, _) => outcome.to_string(),
        };
        let source = if self.stderr.iter().any(|l| !l.trim().is_empty()) {
            &self.stderr
        } else {
            &self.stdout
        };
        let tail = tail(source, lines);
        if !tail.is_empty() {
            summary.push_str(": ");
            summary.push_str(&tail.join(" | "));
        }
        summary
    }

    fn not_started(command: String, outcome: Outcome) -> Self {
        Self {
            command,
            outcome,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Last `n` non-blank lines of `lines`.
pub fn tail(lines: &[String], n: usize) -> Vec<String> {
    let kept: Vec<&String> = lines.iter().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(n);
    kept[start..].iter().map(|l| l.trim_end().to_string()).collect()
}

/// Receives output lines in streaming mode.
pub trait LineObserver {
    fn on_line(&mut self, stream: Stream, line: &str);
}

/// Observer that discards everything.
pub struct NullObserver;

impl LineObserver for NullObserver {
    fn on_line(&mut self, _stream: Stream, _line: &str) {}
}

impl<F> LineObserver for F
where
    F: FnMut(Stream, &str),
{
    fn on_line(&mut self, stream: Stream, line: &str) {
        (self)(stream, line)
    }
}

/// Shared cancellation flag, tripped from a signal handler and polled by the
/// runner while a child is alive.
///
/// The token also counts children currently running under it, so a signal
/// handler can tell whether anything will ever look at the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicUsize>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// No child process is running under this token.
    pub fn is_idle(&self) -> bool {
        self.running.load(Ordering::SeqCst) == 0
    }

    fn enter(&self) -> RunningGuard<'_> {
        self.running.fetch_add(1, Ordering::SeqCst);
        RunningGuard(self)
    }
}

struct RunningGuard<'a>(&'a CancelToken);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Executes invocations. The engine only ever talks to this trait so tests
/// can substitute scripted fakes.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation, observer: &mut dyn LineObserver) -> CommandResult;

    /// Run without an observer, regardless of the invocation's mode.
    fn run_buffered(&self, invocation: &Invocation) -> CommandResult {
        self.run(invocation, &mut NullObserver)
    }
}

/// Runs real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    cancel: CancelToken,
    poll_interval: Duration,
    /// How long to keep reading after the child is gone; grandchildren may
    /// hold the pipes open indefinitely.
    drain_grace: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(CancelToken::new())
    }
}

impl SystemRunner {
    pub fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            poll_interval: Duration::from_millis(50),
            drain_grace: Duration::from_secs(2),
        }
    }
}

impl CommandRunner for SystemRunner {
    #[instrument(skip_all, fields(program = %invocation.program, mode = ?invocation.mode))]
    fn run(&self, invocation: &Invocation, observer: &mut dyn LineObserver) -> CommandResult {
        let start = Instant::now();
        let command_line = invocation.to_string();

        // Registered before the flag is read, so a handler that trips the
        // flag and then finds the token idle never races a spawn.
        let _running = self.cancel.enter();
        if self.cancel.is_cancelled() {
            debug!("cancellation already requested, not starting command");
            return CommandResult::not_started(command_line, Outcome::Cancelled);
        }

        let program = match resolve_program(&invocation.program) {
            Ok(path) => path,
            Err(reason) => {
                debug!(%reason, "program not found");
                return CommandResult::not_started(command_line, Outcome::SpawnFailed { reason });
            }
        };

        let mut command = Command::new(&program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }
        // Own process group, so a timeout takes build backends and other
        // grandchildren down with the child.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        debug!(command = %command_line, "spawning child process");
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(err = %e, "failed to spawn command");
                return CommandResult::not_started(
                    command_line,
                    Outcome::SpawnFailed {
                        reason: e.to_string(),
                    },
                );
            }
        };

        let (tx, rx) = mpsc::channel();
        spawn_readers(&mut child, tx);

        let deadline = invocation.timeout.map(|t| start + t);
        let streaming = invocation.mode == OutputMode::Streaming;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut status: Option<ExitStatus> = None;
        let mut interrupted: Option<Outcome> = None;
        let mut streams_open = true;
        let mut finished_at: Option<Instant> = None;

        loop {
            if streams_open {
                match rx.recv_timeout(self.poll_interval) {
                    Ok((stream, line)) => {
                        if streaming {
                            observer.on_line(stream, &line);
                        }
                        match stream {
                            Stream::Stdout => stdout.push(line),
                            Stream::Stderr => stderr.push(line),
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => streams_open = false,
                }
            } else if status.is_none() && interrupted.is_none() {
                thread::sleep(self.poll_interval);
            }

            if status.is_none() && interrupted.is_none() {
                match child.try_wait() {
                    Ok(Some(exit)) => status = Some(exit),
                    Ok(None) => {
                        if self.cancel.is_cancelled() {
                            warn!("cancellation requested, killing child process");
                            status = kill_and_reap(&mut child);
                            interrupted = Some(Outcome::Cancelled);
                        } else if deadline.is_some_and(|d| Instant::now() >= d) {
                            warn!(
                                timeout = %humantime::format_duration(
                                    invocation.timeout.unwrap_or_default()
                                ),
                                "command timed out, killing"
                            );
                            status = kill_and_reap(&mut child);
                            interrupted = Some(Outcome::TimedOut);
                        }
                    }
                    Err(e) => {
                        warn!(err = %e, "failed to poll child process");
                        status = kill_and_reap(&mut child);
                        interrupted = Some(Outcome::SpawnFailed {
                            reason: format!("failed to poll process: {e}"),
                        });
                    }
                }
            }

            let done = status.is_some() || interrupted.is_some();
            if done && finished_at.is_none() {
                finished_at = Some(Instant::now());
                if streams_open {
                    // Whatever still holds the pipes outlived the child.
                    kill_group(&child);
                }
            }
            if done && !streams_open {
                break;
            }
            if let Some(at) = finished_at
                && at.elapsed() >= self.drain_grace
            {
                debug!("output pipes still open after exit, abandoning readers");
                break;
            }
        }

        let outcome = match interrupted {
            Some(outcome) => outcome,
            None => match status {
                Some(s) if s.success() => Outcome::Success,
                Some(s) if killed_by_interrupt(&s) => Outcome::Cancelled,
                _ => Outcome::Failed,
            },
        };
        let exit_code = status.and_then(|s| s.code());
        debug!(%outcome, ?exit_code, "command finished");

        CommandResult {
            command: command_line,
            outcome,
            exit_code,
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn kill_and_reap(child: &mut Child) -> Option<ExitStatus> {
    kill_group(child);
    let _ = child.kill();
    child.wait().ok()
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!(err = %e, pgid, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Looks bare program names up on `PATH`; anything with a directory part is
/// used as given.
fn resolve_program(program: &str) -> Result<PathBuf, String> {
    let path = Path::new(program);
    if path.components().count() > 1 || path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    which::which(program).map_err(|e| format!("{program} not found on PATH ({e})"))
}

fn spawn_readers(child: &mut Child, tx: Sender<(Stream, String)>) {
    if let Some(out) = child.stdout.take() {
        let tx = tx.clone();
        thread::spawn(move || forward_lines(out, Stream::Stdout, tx));
    }
    if let Some(err) = child.stderr.take() {
        thread::spawn(move || forward_lines(err, Stream::Stderr, tx));
    }
}

fn forward_lines<R: Read>(reader: R, stream: Stream, tx: Sender<(Stream, String)>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(err = %e, ?stream, "stopped reading output");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn killed_by_interrupt(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    const SIGINT: i32 = 2;
    status.signal() == Some(SIGINT)
}

#[cfg(windows)]
fn killed_by_interrupt(status: &ExitStatus) -> bool {
    const STATUS_CONTROL_C_EXIT: u32 = 0xC000_013A;
    status.code() == Some(STATUS_CONTROL_C_EXIT as i32)
}

#[cfg(not(any(unix, windows)))]
fn killed_by_interrupt(_status: &ExitStatus) -> bool {
    false
}
