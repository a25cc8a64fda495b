//! Ordered "first success wins" fallback.
//!
//! Interpreter probing and both build categories are the same shape: try a
//! fixed list of candidates in order, stop at the first one that works, and
//! remember why the others did not. A cancellation stops the walk at once.

use serde::{Deserialize, Serialize};

/// Anything with a human-readable name for reports.
pub trait Labeled {
    fn label(&self) -> &str;
}

impl Labeled for String {
    fn label(&self) -> &str {
        self
    }
}

impl Labeled for &str {
    fn label(&self) -> &str {
        self
    }
}

/// Result of trying a single candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<O> {
    Success(O),
    Failed(String),
    Cancelled,
}

/// Why a candidate was passed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub label: String,
    pub reason: String,
}

impl Failure {
    pub fn new(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeOutcome<O> {
    Selected {
        index: usize,
        label: String,
        value: O,
        failures: Vec<Failure>,
    },
    Exhausted {
        failures: Vec<Failure>,
    },
    Cancelled {
        label: String,
        failures: Vec<Failure>,
    },
}

impl<O> CascadeOutcome<O> {
    pub fn failures(&self) -> &[Failure] {
        match self {
            CascadeOutcome::Selected { failures, .. }
            | CascadeOutcome::Exhausted { failures }
            | CascadeOutcome::Cancelled { failures, .. } => failures,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CascadeOutcome::Cancelled { .. })
    }
}

/// Tries `candidates` in order. Candidates after the first success are never
/// attempted.
pub fn first_success<T, O, F>(candidates: &[T], mut attempt: F) -> CascadeOutcome<O>
where
    T: Labeled,
    F: FnMut(&T) -> Attempt<O>,
{
    let mut failures = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        let label = candidate.label().to_string();
        match attempt(candidate) {
            Attempt::Success(value) => {
                return CascadeOutcome::Selected {
                    index,
                    label,
                    value,
                    failures,
                };
            }
            Attempt::Failed(reason) => failures.push(Failure { label, reason }),
            Attempt::Cancelled => return CascadeOutcome::Cancelled { label, failures },
        }
    }
    CascadeOutcome::Exhausted { failures }
}
