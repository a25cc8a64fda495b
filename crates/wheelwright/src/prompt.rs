//! Interactive questions, behind a trait so scripted answers can stand in
//! for a terminal.

use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, Stderr, StdinLock, Write};
use std::path::Path;

use anyhow::{Context, Result};
use wheelwright_process::CancelToken;

use crate::error::WheelwrightError;

pub trait Prompter {
    /// Yes/no question. Only `y` or `yes` (any case) counts as yes.
    fn confirm(&mut self, question: &str) -> Result<bool>;

    /// Numbered menu. Returns the zero-based index, or `None` when the answer
    /// is not one of the listed numbers.
    fn choose(&mut self, question: &str, options: &[String]) -> Result<Option<usize>>;
}

impl<P: Prompter + ?Sized> Prompter for &mut P {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        (**self).confirm(question)
    }

    fn choose(&mut self, question: &str, options: &[String]) -> Result<Option<usize>> {
        (**self).choose(question, options)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn parse_choice(answer: &str, len: usize) -> Option<usize> {
    match answer.trim().parse::<usize>() {
        Ok(n) if (1..=len).contains(&n) => Some(n - 1),
        _ => None,
    }
}

/// Reads answers line by line from `input` and writes questions to `output`.
/// End of input counts as an empty answer.
pub struct StdioPrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> StdioPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_answer(&mut self) -> Result<String> {
        let mut line = String::new();
        self.input
            .read_line(&mut line)
            .context("failed to read answer")?;
        Ok(line.trim().to_string())
    }
}

impl StdioPrompter<StdinLock<'static>, Stderr> {
    /// Questions on stderr, answers from stdin.
    pub fn terminal() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> Prompter for StdioPrompter<R, W> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        write!(self.output, "{question} [y/N] ")?;
        self.output.flush()?;
        Ok(is_yes(&self.read_answer()?))
    }

    fn choose(&mut self, question: &str, options: &[String]) -> Result<Option<usize>> {
        writeln!(self.output, "{question}")?;
        for (idx, option) in options.iter().enumerate() {
            writeln!(self.output, "  {}. {option}", idx + 1)?;
        }
        write!(self.output, "Enter choice (1-{}): ", options.len())?;
        self.output.flush()?;
        Ok(parse_choice(&self.read_answer()?, options.len()))
    }
}

/// Pre-recorded answers, consumed in order. Questions are recorded so tests
/// can check what was (and was not) asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }

    /// One answer per line; blank lines are empty answers.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read answers file {}", path.display()))?;
        Ok(Self::new(content.lines()))
    }

    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    fn next_answer(&mut self, question: &str) -> String {
        self.asked.push(question.to_string());
        self.answers.pop_front().unwrap_or_default()
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        Ok(is_yes(&self.next_answer(question)))
    }

    fn choose(&mut self, question: &str, options: &[String]) -> Result<Option<usize>> {
        Ok(parse_choice(&self.next_answer(question), options.len()))
    }
}

/// Answers every confirmation with yes; menus still go to the inner prompter.
pub struct AssumeYes<P> {
    inner: P,
}

impl<P: Prompter> AssumeYes<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Prompter> Prompter for AssumeYes<P> {
    fn confirm(&mut self, _question: &str) -> Result<bool> {
        Ok(true)
    }

    fn choose(&mut self, question: &str, options: &[String]) -> Result<Option<usize>> {
        self.inner.choose(question, options)
    }
}

/// Fails with [`WheelwrightError::UserCancelled`] once the token is tripped,
/// both before asking and after an answer arrives.
pub struct Interruptible<P> {
    inner: P,
    cancel: CancelToken,
}

impl<P: Prompter> Interruptible<P> {
    pub fn new(inner: P, cancel: CancelToken) -> Self {
        Self { inner, cancel }
    }

    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(WheelwrightError::UserCancelled.into());
        }
        Ok(())
    }
}

impl<P: Prompter> Prompter for Interruptible<P> {
    fn confirm(&mut self, question: &str) -> Result<bool> {
        self.check()?;
        let answer = self.inner.confirm(question)?;
        self.check()?;
        Ok(answer)
    }

    fn choose(&mut self, question: &str, options: &[String]) -> Result<Option<usize>> {
        self.check()?;
        let answer = self.inner.choose(question, options)?;
        self.check()?;
        Ok(answer)
    }
}
