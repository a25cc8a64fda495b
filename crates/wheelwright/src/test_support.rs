//! Scripted collaborators shared by the unit tests.

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use wheelwright_process::{
    CommandResult, CommandRunner, Invocation, LineObserver, Outcome, OutputMode, Stream,
};

use crate::engine::Reporter;

/// Canned answer for a matched invocation.
#[derive(Debug, Clone)]
pub(crate) struct Response {
    pub(crate) outcome: Outcome,
    pub(crate) exit_code: Option<i32>,
    pub(crate) stdout: Vec<String>,
    pub(crate) stderr: Vec<String>,
    /// Files written when the response is served, simulating build output.
    pub(crate) creates: Vec<PathBuf>,
}

impl Response {
    pub(crate) fn ok<I, S>(stdout: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outcome: Outcome::Success,
            exit_code: Some(0),
            stdout: stdout.into_iter().map(Into::into).collect(),
            stderr: Vec::new(),
            creates: Vec::new(),
        }
    }

    pub(crate) fn fail(code: i32, stderr: &str) -> Self {
        Self {
            outcome: Outcome::Failed,
            exit_code: Some(code),
            stdout: Vec::new(),
            stderr: vec![stderr.to_string()],
            creates: Vec::new(),
        }
    }

    pub(crate) fn timed_out() -> Self {
        Self {
            outcome: Outcome::TimedOut,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            creates: Vec::new(),
        }
    }

    pub(crate) fn cancelled() -> Self {
        Self {
            outcome: Outcome::Cancelled,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            creates: Vec::new(),
        }
    }

    pub(crate) fn creating(mut self, path: impl Into<PathBuf>) -> Self {
        self.creates.push(path.into());
        self
    }
}

struct Rule {
    needle: String,
    response: Response,
    remaining: Option<usize>,
}

/// Runner that answers from a rule list instead of spawning processes.
///
/// A rule matches when its needle is a substring of `program arg1 arg2 ...`.
/// Rules are checked in insertion order; unmatched commands fail to spawn,
/// like a program missing from `PATH`.
#[derive(Default)]
pub(crate) struct FakeRunner {
    rules: RefCell<Vec<Rule>>,
    calls: RefCell<Vec<String>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(self, needle: &str, response: Response) -> Self {
        self.rules.borrow_mut().push(Rule {
            needle: needle.to_string(),
            response,
            remaining: None,
        });
        self
    }

    /// Like [`FakeRunner::on`], but the rule is used only once.
    pub(crate) fn once(self, needle: &str, response: Response) -> Self {
        self.rules.borrow_mut().push(Rule {
            needle: needle.to_string(),
            response,
            remaining: Some(1),
        });
        self
    }

    /// Every command line run so far, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub(crate) fn ran(&self, needle: &str) -> bool {
        self.calls.borrow().iter().any(|c| c.contains(needle))
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, invocation: &Invocation, observer: &mut dyn LineObserver) -> CommandResult {
        let line = std::iter::once(invocation.program.as_str())
            .chain(invocation.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.borrow_mut().push(line.clone());

        let response = {
            let mut rules = self.rules.borrow_mut();
            rules
                .iter_mut()
                .find(|r| r.remaining != Some(0) && line.contains(&r.needle))
                .map(|rule| {
                    if let Some(n) = rule.remaining.as_mut() {
                        *n -= 1;
                    }
                    rule.response.clone()
                })
        };

        let Some(response) = response else {
            return CommandResult {
                command: line,
                outcome: Outcome::SpawnFailed {
                    reason: "program not found".to_string(),
                },
                exit_code: None,
                stdout: Vec::new(),
                stderr: Vec::new(),
                duration_ms: 0,
            };
        };

        for path in &response.creates {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("create fake output dir");
            }
            fs::write(path, "fake artifact").expect("write fake artifact");
        }

        if invocation.mode == OutputMode::Streaming {
            for l in &response.stdout {
                observer.on_line(Stream::Stdout, l);
            }
            for l in &response.stderr {
                observer.on_line(Stream::Stderr, l);
            }
        }

        CommandResult {
            command: line,
            outcome: response.outcome,
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            duration_ms: 1,
        }
    }
}

#[derive(Default)]
pub(crate) struct CollectingReporter {
    pub infos: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.infos.push(msg.to_string());
    }

    fn warn(&mut self, msg: &str) {
        self.warns.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
}
