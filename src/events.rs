//! Run lifecycle events and their consumers.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::capture::{ScreenshotFiles, ScreenshotOutcome};
use crate::compare::Analysis;
use crate::executor::{ActionFailure, ActionLog};

/// Everything observable about a run, in emission order
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RunEvent {
    #[serde(rename_all = "camelCase")]
    ScenarioStart { scenario: String, url: String },

    #[serde(rename_all = "camelCase")]
    ScenarioEnd {
        scenario: String,
        success: bool,
        duration_ms: u64,
    },

    ActionExecuted { scenario: String, log: ActionLog },

    ActionFailed {
        scenario: String,
        failure: ActionFailure,
    },

    /// A comparison found differing pixels
    ScreenshotDiff {
        scenario: String,
        index: usize,
        files: ScreenshotFiles,
        analysis: Analysis,
    },

    Console {
        scenario: String,
        level: String,
        text: String,
    },

    NetworkError {
        scenario: String,
        url: String,
        method: String,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    RunEnd { duration_ms: u64, passed: bool },
}

/// Consumer of run events
pub trait EventSink: Send {
    fn emit(&mut self, event: RunEvent);
}

impl EventSink for Vec<RunEvent> {
    fn emit(&mut self, event: RunEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<RunEvent> {
    fn emit(&mut self, event: RunEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.send(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: RunEvent) {
        (**self).emit(event);
    }
}

/// Human-readable progress through `tracing`
#[derive(Debug, Default)]
pub struct LogReporter;

impl LogReporter {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogReporter {
    fn emit(&mut self, event: RunEvent) {
        match &event {
            RunEvent::ScenarioStart { scenario, url } => {
                info!("> started scenario {scenario} ({url})");
            }
            RunEvent::ScenarioEnd {
                scenario,
                success,
                duration_ms,
            } => {
                let status = if *success { "passed" } else { "failed" };
                info!("> scenario {scenario} {status} in {}s", secs(*duration_ms));
            }
            RunEvent::ActionExecuted { log, .. } => {
                info!(
                    ">> #{} executed type:{} selector:{}",
                    log.index + 1,
                    log.action.type_name(),
                    log.action.selector.as_deref().unwrap_or("-")
                );
                info!(">>> duration:{}s", secs(log.duration_ms));
                if let Some(assertion) = &log.assertion {
                    info!(">>>> assertInnerText matched: {:?}", assertion.node_text);
                }
                match &log.screenshot {
                    Some(ScreenshotOutcome::Failed { err }) => {
                        info!(">>>> screenshot");
                        error!("{err}");
                    }
                    Some(ScreenshotOutcome::Captured(result)) => {
                        info!(">>>> screenshot");
                        match &result.analysis {
                            Some(analysis) if analysis.mis_match_percentage > 0.0 => {
                                warn!(
                                    ">>>> misMatchPercentage: {}%, isSameDimensions: {}, acceptable: {}",
                                    analysis.mis_match_percentage * 100.0,
                                    analysis.is_same_dimensions,
                                    analysis.pass_threshold
                                );
                                if let Some(diff) = &result.files.diff {
                                    warn!(">>>> diff: {}", diff.display());
                                }
                            }
                            Some(_) => info!(">>>> 100% matched"),
                            None => info!(">>>> new baseline: {}", result.files.base.display()),
                        }
                    }
                    None => {}
                }
            }
            RunEvent::ActionFailed { failure, .. } => {
                let details = serde_json::json!({
                    "index": failure.index,
                    "action": &failure.action,
                });
                let pretty = serde_json::to_string_pretty(&details).unwrap_or_default();
                error!("{}\n{}", failure.error, pretty);
            }
            RunEvent::ScreenshotDiff { .. } => {}
            RunEvent::Console { level, text, .. } => {
                info!(">>>> console.{level}: {text}");
            }
            RunEvent::NetworkError {
                url, method, error, ..
            } => {
                warn!(">>>> network error: {method} {url}: {error}");
            }
            RunEvent::RunEnd { duration_ms, .. } => {
                info!("> DONE. duration: {}s", secs(*duration_ms));
            }
        }
    }
}

fn secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}
