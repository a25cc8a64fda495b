//! Console output with TTY detection.
//!
//! In a terminal, streamed command output drives a spinner that shows the
//! latest line. Otherwise every line is echoed to stderr so CI logs keep the
//! whole build output.

use std::cell::RefCell;
use std::io::{self, IsTerminal};
use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use wheelwright::prompt::Prompter;
use wheelwright_process::{LineObserver, Stream};

/// Detects whether stderr is connected to a TTY.
pub fn is_tty() -> bool {
    io::stderr().is_terminal()
}

/// Shared handle on the (at most one) live spinner.
#[derive(Clone)]
pub struct Console {
    is_tty: bool,
    spinner: Rc<RefCell<Option<ProgressBar>>>,
}

impl Console {
    pub fn new() -> Self {
        Self::with_tty(is_tty())
    }

    fn with_tty(is_tty: bool) -> Self {
        Self {
            is_tty,
            spinner: Rc::new(RefCell::new(None)),
        }
    }

    fn show_line(&self, line: &str) {
        if !self.is_tty {
            eprintln!("    {line}");
            return;
        }
        let mut slot = self.spinner.borrow_mut();
        let pb = slot.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner} [{elapsed}] {wide_msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });
        pb.set_message(line.trim().to_string());
    }

    /// Drops the spinner so the next message or prompt starts on a clean line.
    pub fn clear(&self) {
        if let Some(pb) = self.spinner.borrow_mut().take() {
            pb.finish_and_clear();
        }
    }

    fn has_spinner(&self) -> bool {
        self.spinner.borrow().is_some()
    }
}

/// Streams child process output into the console.
pub struct CommandOutput(pub Console);

impl LineObserver for CommandOutput {
    fn on_line(&mut self, _stream: Stream, line: &str) {
        self.0.show_line(line);
    }
}

/// Clears the spinner before every question.
pub struct ConsolePrompter<P> {
    console: Console,
    inner: P,
}

impl<P: Prompter> ConsolePrompter<P> {
    pub fn new(console: Console, inner: P) -> Self {
        Self { console, inner }
    }
}

impl<P: Prompter> Prompter for ConsolePrompter<P> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        self.console.clear();
        self.inner.confirm(question)
    }

    fn choose(&mut self, question: &str, options: &[String]) -> Result<Option<usize>> {
        self.console.clear();
        self.inner.choose(question, options)
    }
}
