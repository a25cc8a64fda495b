//! Interactive upload flow.
//!
//! The flow is an explicit state machine:
//!
//! ```text
//! ChoicePending -> TestUpload ----------------------------> Done
//!              \             \-(both)-> ConfirmProduction -> ProdUpload -> Done
//!               \-> ConfirmProduction -> ProdUpload -----------------------> Done
//!                \-> Done (exit / invalid choice)
//! ```
//!
//! Every production upload goes through `ConfirmProduction`, whose question
//! states that the action cannot be undone. Anything but an explicit yes
//! aborts that branch.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use wheelwright_process::{CommandRunner, LineObserver};

use crate::engine::Reporter;
use crate::error::WheelwrightError;
use crate::prompt::Prompter;
use crate::types::{ArtifactSet, Interpreter, PublishTarget, RuntimeOptions};

/// A single upload destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registry {
    Test,
    Production,
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registry::Test => write!(f, "test registry"),
            Registry::Production => write!(f, "production registry"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The user picked "exit" from the menu
    UserExit,
    /// Menu answer was not one of the listed numbers
    InvalidChoice,
    /// The production confirmation was not answered with yes
    ProductionDeclined,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::UserExit => write!(f, "exited without publishing"),
            AbortReason::InvalidChoice => write!(f, "invalid menu choice"),
            AbortReason::ProductionDeclined => write!(f, "production upload not confirmed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published {
        targets: Vec<Registry>,
    },
    Aborted {
        reason: AbortReason,
        /// Uploads completed before the abort (a test upload in "both")
        published: Vec<Registry>,
    },
    Failed {
        target: Registry,
        repository: String,
        exit_code: Option<i32>,
        detail: String,
    },
    Cancelled,
}

impl PublishOutcome {
    /// Converts the outcome into the error the top level reports. An explicit
    /// menu exit is not an error.
    pub fn into_result(self) -> Result<PublishOutcome, WheelwrightError> {
        match self {
            PublishOutcome::Aborted { reason, .. } if reason != AbortReason::UserExit => {
                Err(WheelwrightError::Aborted(reason.to_string()))
            }
            PublishOutcome::Failed {
                repository, detail, ..
            } => Err(WheelwrightError::UploadFailed { repository, detail }),
            PublishOutcome::Cancelled => Err(WheelwrightError::UserCancelled),
            other => Ok(other),
        }
    }
}

enum State {
    ChoicePending,
    TestUpload { then_production: bool },
    ConfirmProduction { published: Vec<Registry> },
    ProdUpload { published: Vec<Registry> },
    Done(PublishOutcome),
}

/// Collaborators of a publish run.
pub struct Publisher<'a> {
    pub runner: &'a dyn CommandRunner,
    pub python: &'a Interpreter,
    pub artifacts: &'a ArtifactSet,
    pub opts: &'a RuntimeOptions,
    pub prompter: &'a mut dyn Prompter,
    pub reporter: &'a mut dyn Reporter,
    pub observer: &'a mut dyn LineObserver,
}

pub(crate) fn menu_options(opts: &RuntimeOptions) -> Vec<String> {
    vec![
        format!("Upload to test registry ({})", opts.test_repository),
        format!("Upload to production registry ({})", opts.production_repository),
        "Upload to both (test first, then production)".to_string(),
        "Exit without publishing".to_string(),
    ]
}

impl Publisher<'_> {
    /// Drives the flow to completion. `preselected` skips the menu; the
    /// production confirmation is still asked.
    #[instrument(skip_all, fields(preselected = ?preselected))]
    pub fn run(&mut self, preselected: Option<PublishTarget>) -> Result<PublishOutcome, WheelwrightError> {
        let mut state = match preselected {
            None => State::ChoicePending,
            Some(target) => Self::state_for(target),
        };

        loop {
            state = match state {
                State::ChoicePending => self.choose()?,
                State::TestUpload { then_production } => {
                    match self.upload(Registry::Test) {
                        Ok(()) if then_production => State::ConfirmProduction {
                            published: vec![Registry::Test],
                        },
                        Ok(()) => State::Done(PublishOutcome::Published {
                            targets: vec![Registry::Test],
                        }),
                        Err(outcome) => State::Done(outcome),
                    }
                }
                State::ConfirmProduction { published } => {
                    let question = if published.is_empty() {
                        format!(
                            "Upload to the production registry '{}'? This cannot be undone.",
                            self.opts.production_repository
                        )
                    } else {
                        format!(
                            "Test upload succeeded. Upload to the production registry '{}' now? This cannot be undone.",
                            self.opts.production_repository
                        )
                    };
                    if self.prompter.confirm(&question)? {
                        State::ProdUpload { published }
                    } else {
                        self.reporter.warn("production upload not confirmed");
                        State::Done(PublishOutcome::Aborted {
                            reason: AbortReason::ProductionDeclined,
                            published,
                        })
                    }
                }
                State::ProdUpload { mut published } => match self.upload(Registry::Production) {
                    Ok(()) => {
                        published.push(Registry::Production);
                        State::Done(PublishOutcome::Published { targets: published })
                    }
                    Err(outcome) => State::Done(outcome),
                },
                State::Done(outcome) => {
                    debug!(?outcome, "publish finished");
                    return Ok(outcome);
                }
            };
        }
    }

    fn state_for(target: PublishTarget) -> State {
        match target {
            PublishTarget::Test => State::TestUpload {
                then_production: false,
            },
            PublishTarget::Production => State::ConfirmProduction {
                published: Vec::new(),
            },
            PublishTarget::Both => State::TestUpload {
                then_production: true,
            },
        }
    }

    fn choose(&mut self) -> Result<State, WheelwrightError> {
        let picked = self
            .prompter
            .choose("Select publish target:", &menu_options(self.opts))?;
        Ok(match picked {
            Some(0) => Self::state_for(PublishTarget::Test),
            Some(1) => Self::state_for(PublishTarget::Production),
            Some(2) => Self::state_for(PublishTarget::Both),
            Some(_) => State::Done(PublishOutcome::Aborted {
                reason: AbortReason::UserExit,
                published: Vec::new(),
            }),
            None => {
                self.reporter.error("invalid choice");
                State::Done(PublishOutcome::Aborted {
                    reason: AbortReason::InvalidChoice,
                    published: Vec::new(),
                })
            }
        })
    }

    /// Runs `twine upload`. On failure the returned outcome is terminal.
    fn upload(&mut self, target: Registry) -> Result<(), PublishOutcome> {
        let repository = match target {
            Registry::Test => &self.opts.test_repository,
            Registry::Production => &self.opts.production_repository,
        };
        self.reporter
            .info(&format!("uploading to {target} ({repository})..."));

        let invocation = self
            .python
            .invocation()
            .args(["-m", "twine", "upload", "--repository", repository.as_str()])
            .args(self.artifacts.all().map(|p| p.display().to_string()))
            .timeout(self.opts.upload_timeout)
            .streaming();
        let result = self.runner.run(&invocation, &mut *self.observer);

        if result.is_cancelled() {
            return Err(PublishOutcome::Cancelled);
        }
        if !result.is_success() {
            let detail = result.failure_summary(self.opts.output_lines);
            self.reporter
                .error(&format!("upload to {target} failed: {detail}"));
            return Err(PublishOutcome::Failed {
                target,
                repository: repository.clone(),
                exit_code: result.exit_code,
                detail,
            });
        }
        self.reporter.info(&format!("uploaded to {target}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CliOverrides, WheelwrightConfig};
    use crate::prompt::{AssumeYes, ScriptedPrompter};
    use crate::test_support::{CollectingReporter, FakeRunner, Response};
    use std::path::PathBuf;
    use wheelwright_process::NullObserver;

    const TEST_UPLOAD: &str = "twine upload --repository testpypi";
    const PROD_UPLOAD: &str = "twine upload --repository pypi";

    struct Fixture {
        python: Interpreter,
        artifacts: ArtifactSet,
        opts: RuntimeOptions,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                python: Interpreter {
                    command: "python3".to_string(),
                    version: None,
                    version_text: String::new(),
                    usable: true,
                },
                artifacts: ArtifactSet {
                    output_dir: PathBuf::from("/p/dist"),
                    binary: vec![PathBuf::from("/p/dist/demo-1.0-py3-none-any.whl")],
                    source: vec![PathBuf::from("/p/dist/demo-1.0.tar.gz")],
                },
                opts: WheelwrightConfig::default().build_runtime_options(CliOverrides::default()),
            }
        }

        fn run(
            &self,
            runner: &FakeRunner,
            prompter: &mut dyn Prompter,
            preselected: Option<PublishTarget>,
        ) -> PublishOutcome {
            let mut reporter = CollectingReporter::default();
            let mut observer = NullObserver;
            Publisher {
                runner,
                python: &self.python,
                artifacts: &self.artifacts,
                opts: &self.opts,
                prompter,
                reporter: &mut reporter,
                observer: &mut observer,
            }
            .run(preselected)
            .expect("publish")
        }
    }

    fn uploads_ok() -> FakeRunner {
        FakeRunner::new()
            .on(TEST_UPLOAD, Response::ok(["View at: https://test.pypi.org/project/demo/1.0/"]))
            .on(PROD_UPLOAD, Response::ok(["View at: https://pypi.org/project/demo/1.0/"]))
    }

    #[test]
    fn test_only_upload_never_asks_for_confirmation() {
        let fx = Fixture::new();
        let runner = uploads_ok();
        let mut prompter = ScriptedPrompter::new(["1"]);
        let outcome = fx.run(&runner, &mut prompter, None);
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                targets: vec![Registry::Test]
            }
        );
        assert_eq!(prompter.asked().len(), 1);
        assert_eq!(
            runner.calls(),
            vec![
                "python3 -m twine upload --repository testpypi /p/dist/demo-1.0-py3-none-any.whl /p/dist/demo-1.0.tar.gz"
            ]
        );
    }

    #[test]
    fn production_requires_explicit_yes() {
        let fx = Fixture::new();
        for answer in ["", "n", "no", "maybe"] {
            let runner = uploads_ok();
            let mut prompter = ScriptedPrompter::new(["2", answer]);
            let outcome = fx.run(&runner, &mut prompter, None);
            assert_eq!(
                outcome,
                PublishOutcome::Aborted {
                    reason: AbortReason::ProductionDeclined,
                    published: vec![]
                },
                "answer {answer:?}"
            );
            assert!(runner.calls().is_empty());
            assert!(prompter.asked()[1].contains("cannot be undone"));
        }
    }

    #[test]
    fn production_upload_after_yes() {
        let fx = Fixture::new();
        let runner = uploads_ok();
        let mut prompter = ScriptedPrompter::new(["2", "YES"]);
        let outcome = fx.run(&runner, &mut prompter, None);
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                targets: vec![Registry::Production]
            }
        );
        assert!(runner.ran(PROD_UPLOAD));
        assert!(!runner.ran(TEST_UPLOAD));
    }

    #[test]
    fn both_uploads_test_first_then_asks() {
        let fx = Fixture::new();
        let runner = uploads_ok();
        let mut prompter = ScriptedPrompter::new(["3", "y"]);
        let outcome = fx.run(&runner, &mut prompter, None);
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                targets: vec![Registry::Test, Registry::Production]
            }
        );
        let calls = runner.calls();
        assert!(calls[0].contains(TEST_UPLOAD));
        assert!(calls[1].contains(PROD_UPLOAD));
        assert!(prompter.asked()[1].starts_with("Test upload succeeded"));
    }

    #[test]
    fn both_with_failed_test_upload_never_asks_about_production() {
        let fx = Fixture::new();
        let runner = FakeRunner::new()
            .on(TEST_UPLOAD, Response::fail(1, "HTTPError: 403 Forbidden"))
            .on(PROD_UPLOAD, Response::ok(Vec::<String>::new()));
        let mut prompter = ScriptedPrompter::new(["3", "y"]);
        let outcome = fx.run(&runner, &mut prompter, None);

        match &outcome {
            PublishOutcome::Failed {
                target,
                exit_code,
                detail,
                ..
            } => {
                assert_eq!(*target, Registry::Test);
                assert_eq!(*exit_code, Some(1));
                assert!(detail.contains("403 Forbidden"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(prompter.asked(), &["Select publish target:"]);
        assert!(!runner.ran(PROD_UPLOAD));
        assert!(matches!(
            outcome.into_result(),
            Err(WheelwrightError::UploadFailed { .. })
        ));
    }

    #[test]
    fn both_declined_after_test_keeps_test_upload() {
        let fx = Fixture::new();
        let runner = uploads_ok();
        let mut prompter = ScriptedPrompter::new(["3", "n"]);
        let outcome = fx.run(&runner, &mut prompter, None);
        assert_eq!(
            outcome,
            PublishOutcome::Aborted {
                reason: AbortReason::ProductionDeclined,
                published: vec![Registry::Test]
            }
        );
    }

    #[test]
    fn exit_and_invalid_choice() {
        let fx = Fixture::new();
        let runner = uploads_ok();

        let outcome = fx.run(&runner, &mut ScriptedPrompter::new(["4"]), None);
        assert!(matches!(
            outcome,
            PublishOutcome::Aborted {
                reason: AbortReason::UserExit,
                ..
            }
        ));
        assert!(outcome.into_result().is_ok());

        // No re-prompt: a single bad answer ends the flow.
        let mut prompter = ScriptedPrompter::new(["9", "1"]);
        let outcome = fx.run(&runner, &mut prompter, None);
        assert!(matches!(
            outcome,
            PublishOutcome::Aborted {
                reason: AbortReason::InvalidChoice,
                ..
            }
        ));
        assert_eq!(prompter.asked().len(), 1);
        assert!(matches!(outcome.into_result(), Err(WheelwrightError::Aborted(_))));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn preselected_target_skips_menu_but_not_confirmation() {
        let fx = Fixture::new();
        let runner = uploads_ok();
        let mut prompter = ScriptedPrompter::new(Vec::<String>::new());
        let outcome = fx.run(&runner, &mut prompter, Some(PublishTarget::Production));
        assert!(matches!(
            outcome,
            PublishOutcome::Aborted {
                reason: AbortReason::ProductionDeclined,
                ..
            }
        ));
        assert_eq!(prompter.asked().len(), 1);

        let mut yes = AssumeYes::new(ScriptedPrompter::default());
        let outcome = fx.run(&runner, &mut yes, Some(PublishTarget::Both));
        assert_eq!(
            outcome,
            PublishOutcome::Published {
                targets: vec![Registry::Test, Registry::Production]
            }
        );
    }

    #[test]
    fn cancelled_upload_is_cancelled_outcome() {
        let fx = Fixture::new();
        let runner = FakeRunner::new().on(TEST_UPLOAD, Response::cancelled());
        let outcome = fx.run(&runner, &mut ScriptedPrompter::new(["3", "y"]), None);
        assert_eq!(outcome, PublishOutcome::Cancelled);
        assert!(matches!(
            outcome.into_result(),
            Err(WheelwrightError::UserCancelled)
        ));
    }
}
