//! # Wheelwright
//!
//! A resilient build and publish orchestrator for Python packages.
//!
//! Python packaging toolchains fail in many small ways: a placeholder
//! interpreter that answers `--version` but runs nothing, a build frontend
//! that hangs under isolation, a declared package name that no longer matches
//! the module directory. Wheelwright walks ordered fallback lists at every
//! step and stops before anything irreversible happens.
//!
//! ## Pipeline
//!
//! The core flow is **check → clean → probe → build → verify → (publish)**:
//!
//! 1. [`consistency::check`] compares the declared name in `pyproject.toml`
//!    with the module directories and entry point, offering a rename.
//! 2. [`clean::clean`] removes stale build output.
//! 3. [`probe::locate_interpreter`] picks the first working interpreter and
//!    [`probe::ensure_tool_available`] installs missing build tools.
//! 4. [`build::build`] runs a fallback cascade per artifact category, each
//!    candidate bounded by a timeout.
//! 5. [`verify::verify`] counts artifacts and runs the integrity checker.
//! 6. [`publish::Publisher`] drives the confirmation-gated upload flow.
//!
//! [`engine`] wires the stages together and writes a receipt of every run.
//!
//! ## Example
//!
//! ```ignore
//! use wheelwright::{config::{CliOverrides, WheelwrightConfig}, engine, types::Project};
//!
//! let project = Project::open(".")?;
//! let config = WheelwrightConfig::load_from_project(project.root())?.unwrap_or_default();
//! let opts = config.build_runtime_options(CliOverrides::default());
//! let mut session = engine::Session { /* runner, prompter, reporter, observer */ };
//! let report = engine::run_build(&mut session)?;
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Project, interpreter, artifact and strategy types
//! - [`config`] - `.wheelwright.toml` loading and CLI merging
//! - [`cascade`] - Ordered first-success fallback
//! - [`engine`] - Stage orchestration and the [`engine::Reporter`] seam
//! - [`receipt`] - Atomic receipt persistence

pub mod build;

/// Ordered fallback: run candidates until one succeeds.
pub mod cascade;

pub mod clean;

/// Configuration file (`.wheelwright.toml`) loading and merging.
pub mod config;

/// Declared package name versus module layout.
pub mod consistency;

pub mod engine;

pub mod error;

/// Interpreter discovery and build tool availability.
pub mod probe;

pub mod prompt;

/// Confirmation-gated upload state machine.
pub mod publish;

/// Run receipts under the state directory.
pub mod receipt;

/// Domain types: project, interpreter, artifacts, strategies, options.
pub mod types;

pub mod verify;

pub use error::WheelwrightError;

#[cfg(test)]
mod test_support;
