//! vbot - visual regression testing with scripted browser playbooks.
//!
//! This crate provides:
//! - JSON playbooks of scenarios and actions, validated before anything runs
//! - A browser session abstraction with a Chrome DevTools backend and an in-process mock
//! - Screenshot baselines per scenario, compared pixel by pixel on later runs
//! - Animation-aware waits so captures are taken on a settled page
//! - A scenario runner that reports progress as typed events
//!
//! # Example
//!
//! ```rust,no_run
//! use vbot::browser::chrome::ChromeLauncher;
//! use vbot::{LogReporter, ParseOptions, RunOptions, ScenarioRunner};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let playbook = vbot::playbook::from_file("todo.json", &ParseOptions::default())?;
//! let options = RunOptions::new().imgdir("./shots");
//! let mut runner = ScenarioRunner::new(ChromeLauncher::new(), options);
//! let report = runner.run(&playbook, &mut LogReporter::new()).await?;
//! assert!(report.passed());
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod capture;
pub mod compare;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod layout;
pub mod playbook;
pub mod runner;
pub mod sync;

pub use browser::{BrowserLauncher, BrowserSession, LaunchOptions, Viewport};
pub use capture::{CapturePipeline, ScreenshotFiles, ScreenshotOutcome, ScreenshotResult};
pub use compare::{Analysis, compare, compare_files};
pub use error::{ActionError, BrowserError, CaptureError, CompareError, PlaybookError, RunError};
pub use events::{EventSink, LogReporter, RunEvent};
pub use executor::{ActionFailure, ActionLog, AssertionResult, FailureSummary};
pub use playbook::{Action, ActionKind, ParseOptions, Playbook, Scenario};
pub use runner::{RunOptions, RunReport, ScenarioReport, ScenarioRunner};
