//! Runs one scenario's actions against an open browser session.
//!
//! Each action goes through the same steps: settle animations, apply
//! `delay`, reload if asked, wait for the selector, perform the effect,
//! then capture and compare when the action is marked for a screenshot.
//! The first failing action ends the scenario; screenshot problems never do.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::browser::{
    BoxModel, BrowserSession, KeyEvent, MouseEvent, MouseEventKind, PageScript,
};
use crate::capture::{CapturePipeline, ScreenshotOutcome};
use crate::config::{
    ELEMENT_POLL_INTERVAL, MOVE_PHASE_PAUSE, RELOAD_SETTLE, TEXT_POLL_INTERVAL, TYPING_PAUSE,
};
use crate::error::{ActionError, BrowserError};
use crate::events::{EventSink, RunEvent};
use crate::layout::ScenarioFolder;
use crate::playbook::{Action, ActionKind, Pattern, Point};
use crate::sync::{EventPump, PollError, Probe, poll_until};

/// Outcome of a successful assertInnerText
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub node_text: String,
    /// Part of `node_text` the pattern matched
    pub matched: String,
}

/// Record of one executed action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLog {
    pub index: usize,
    pub action: Action,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion: Option<AssertionResult>,
}

/// The action that ended a scenario, with its error
#[derive(Debug, Serialize)]
pub struct ActionFailure {
    pub index: usize,
    pub action: Action,
    pub error: ActionError,
}

/// Why a scenario stopped early, detached from the error value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    /// `None` when the scenario failed before its first action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub kind: String,
    pub message: String,
}

impl FailureSummary {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            index: None,
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&ActionFailure> for FailureSummary {
    fn from(failure: &ActionFailure) -> Self {
        Self {
            index: Some(failure.index),
            kind: failure.error.kind().to_string(),
            message: failure.error.to_string(),
        }
    }
}

/// Logs of the completed actions and, if the scenario stopped early, why
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Execution {
    pub actions: Vec<ActionLog>,
    pub failure: Option<FailureSummary>,
}

impl Execution {
    pub fn failed(failure: FailureSummary) -> Self {
        Self {
            actions: Vec::new(),
            failure: Some(failure),
        }
    }

    pub fn into_result(self) -> Result<Vec<ActionLog>, FailureSummary> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.actions),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub wait_animation: bool,
    pub animation_timeout: Duration,
    pub pipeline: CapturePipeline,
}

/// Borrowed state for executing one scenario
pub struct ActionExecutor<'a> {
    pub scenario: &'a str,
    pub session: &'a mut dyn BrowserSession,
    pub pump: &'a mut EventPump,
    pub sink: &'a mut dyn EventSink,
    pub folder: &'a ScenarioFolder,
    pub settings: ExecutorSettings,
}

impl ActionExecutor<'_> {
    /// Execute `actions` in order and stop at the first failure.
    ///
    /// Emits `ActionExecuted` for every completed action and `ActionFailed`
    /// for the one that ended the scenario.
    pub async fn run(&mut self, actions: &[Action]) -> Execution {
        let mut logs = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            match self.execute(index, action).await {
                Ok(log) => {
                    self.emit_executed(&log);
                    logs.push(log);
                }
                Err(error) => {
                    let failure = ActionFailure {
                        index,
                        action: action.clone(),
                        error,
                    };
                    let summary = FailureSummary::from(&failure);
                    self.sink.emit(RunEvent::ActionFailed {
                        scenario: self.scenario.to_string(),
                        failure,
                    });
                    return Execution {
                        actions: logs,
                        failure: Some(summary),
                    };
                }
            }
        }
        Execution {
            actions: logs,
            failure: None,
        }
    }

    async fn execute(&mut self, index: usize, action: &Action) -> Result<ActionLog, ActionError> {
        let started = Instant::now();
        self.settle().await;

        if let Some(delay) = action.delay {
            sleep(delay).await;
        }

        if matches!(action.kind, ActionKind::Reload) {
            self.session.reload(true).await?;
            sleep(RELOAD_SETTLE).await;
        }

        let element = match &action.selector {
            Some(selector) => Some(self.wait_for_element(selector, action.wait_timeout).await?),
            None => None,
        };

        let mut assertion = None;
        match &action.kind {
            ActionKind::Click => {
                let (x, y) = require(element, action)?.center();
                self.mouse(MouseEventKind::Pressed, x, y).await?;
                self.mouse(MouseEventKind::Released, x, y).await?;
            }
            ActionKind::Typing { value, enter, tab } => {
                for c in value.chars() {
                    self.session.dispatch_key(KeyEvent::char(c)).await?;
                    sleep(TYPING_PAUSE).await;
                }
                if *enter {
                    self.press(KeyEvent::enter()).await?;
                }
                if *tab {
                    self.press(KeyEvent::tab()).await?;
                }
            }
            ActionKind::Scroll { delta, into_view } => {
                if *into_view {
                    let selector = require_selector(action)?;
                    self.session
                        .run_script(&PageScript::ScrollIntoView {
                            selector: selector.to_string(),
                        })
                        .await?;
                }
                if let Some([dx, dy]) = *delta {
                    self.session
                        .run_script(&PageScript::ScrollBy {
                            selector: action.selector.clone(),
                            dx,
                            dy,
                        })
                        .await?;
                }
            }
            ActionKind::Select { nth } => {
                let selector = require_selector(action)?;
                let selected = self
                    .session
                    .run_script(&PageScript::SelectOption {
                        selector: selector.to_string(),
                        nth: *nth,
                    })
                    .await?;
                if selected != Value::Bool(true) {
                    warn!(scenario = self.scenario, selector, nth, "option not found");
                }
            }
            ActionKind::Exist | ActionKind::Reload => {}
            ActionKind::AssertInnerText { pattern } => {
                let selector = require_selector(action)?;
                assertion = Some(
                    self.assert_inner_text(selector, pattern, action.wait_timeout)
                        .await?,
                );
            }
            ActionKind::Move { start, end } => {
                let center = require(element, action)?.center();
                self.move_to(center, *start).await?;
                sleep(MOVE_PHASE_PAUSE).await;
                self.move_to(center, *end).await?;
            }
            ActionKind::Unknown { original } => {
                debug!(scenario = self.scenario, kind = %original, "skipping unknown action");
            }
        }

        let screenshot = if action.screenshot {
            self.settle().await;
            if let Some(delay) = action.capture_delay {
                sleep(delay).await;
            }
            let result = self
                .settings
                .pipeline
                .capture(&mut *self.session, self.folder, action, index)
                .await;
            Some(ScreenshotOutcome::from(result))
        } else {
            None
        };

        Ok(ActionLog {
            index,
            action: action.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            screenshot,
            assertion,
        })
    }

    fn emit_executed(&mut self, log: &ActionLog) {
        self.sink.emit(RunEvent::ActionExecuted {
            scenario: self.scenario.to_string(),
            log: log.clone(),
        });
        let Some(ScreenshotOutcome::Captured(result)) = &log.screenshot else {
            return;
        };
        if let Some(analysis) = result.analysis.filter(|a| a.has_mismatch()) {
            self.sink.emit(RunEvent::ScreenshotDiff {
                scenario: self.scenario.to_string(),
                index: log.index,
                files: result.files.clone(),
                analysis,
            });
        }
    }

    async fn settle(&mut self) {
        if !self.settings.wait_animation {
            self.pump.drain(self.scenario, &mut *self.sink);
            return;
        }
        // a timeout is already logged and the window cleared
        let _ = self
            .pump
            .settle(self.scenario, &mut *self.sink, self.settings.animation_timeout)
            .await;
    }

    async fn wait_for_element(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<BoxModel, ActionError> {
        let mut probe = ElementProbe {
            session: &mut *self.session,
            selector,
        };
        poll_until(&mut probe, ELEMENT_POLL_INTERVAL, timeout)
            .await
            .map_err(|err| match err {
                PollError::Timeout { .. } => ActionError::ElementTimeout {
                    selector: selector.to_string(),
                    timeout,
                },
                PollError::Failed(err) => ActionError::Browser(err),
            })
    }

    async fn assert_inner_text(
        &mut self,
        selector: &str,
        pattern: &Pattern,
        timeout: Duration,
    ) -> Result<AssertionResult, ActionError> {
        let mut probe = TextProbe {
            session: &mut *self.session,
            selector,
            pattern,
            last_text: None,
        };
        match poll_until(&mut probe, TEXT_POLL_INTERVAL, timeout).await {
            Ok(result) => Ok(result),
            Err(PollError::Timeout { .. }) => Err(ActionError::AssertionTimeout {
                selector: selector.to_string(),
                pattern: pattern.as_str().to_string(),
                last_text: probe.last_text,
                timeout,
            }),
            Err(PollError::Failed(err)) => Err(ActionError::Browser(err)),
        }
    }

    async fn mouse(&mut self, kind: MouseEventKind, x: f64, y: f64) -> Result<(), BrowserError> {
        self.session.dispatch_mouse(MouseEvent::new(kind, x, y)).await
    }

    async fn move_to(&mut self, (cx, cy): (f64, f64), [dx, dy]: Point) -> Result<(), BrowserError> {
        self.mouse(MouseEventKind::Moved, cx + dx, cy + dy).await
    }

    async fn press(&mut self, keys: [KeyEvent; 3]) -> Result<(), BrowserError> {
        for key in keys {
            self.session.dispatch_key(key).await?;
        }
        Ok(())
    }
}

fn require_selector(action: &Action) -> Result<&str, ActionError> {
    action
        .selector
        .as_deref()
        .ok_or_else(|| ActionError::MissingSelector {
            kind: action.type_name().to_string(),
        })
}

fn require(element: Option<BoxModel>, action: &Action) -> Result<BoxModel, ActionError> {
    element.ok_or_else(|| ActionError::MissingSelector {
        kind: action.type_name().to_string(),
    })
}

/// Ready once the selector has a rendered box
struct ElementProbe<'a> {
    session: &'a mut dyn BrowserSession,
    selector: &'a str,
}

#[async_trait]
impl<'a> Probe for ElementProbe<'a> {
    type Output = BoxModel;
    type Error = BrowserError;

    async fn probe(&mut self) -> Result<Option<BoxModel>, BrowserError> {
        match self.session.element_geometry(self.selector).await {
            Ok(bbox) => Ok(Some(bbox)),
            Err(BrowserError::ElementNotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Ready once the element's innerText matches; remembers the last text seen
struct TextProbe<'a> {
    session: &'a mut dyn BrowserSession,
    selector: &'a str,
    pattern: &'a Pattern,
    last_text: Option<String>,
}

#[async_trait]
impl<'a> Probe for TextProbe<'a> {
    type Output = AssertionResult;
    type Error = BrowserError;

    async fn probe(&mut self) -> Result<Option<AssertionResult>, BrowserError> {
        let script = PageScript::InnerText {
            selector: self.selector.to_string(),
        };
        let text = match self.session.run_script(&script).await {
            Ok(Value::String(text)) => text,
            Ok(Value::Null) | Err(BrowserError::ElementNotFound(_)) => return Ok(None),
            Ok(other) => other.to_string(),
            Err(err) => return Err(err),
        };
        let matched = self.pattern.find(&text).map(str::to_string);
        let result = matched.map(|matched| AssertionResult {
            node_text: text.clone(),
            matched,
        });
        self.last_text = Some(text);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{
        Effect, MockElement, MockHandle, MockLauncher, MockPage, RecordedInput,
    };
    use crate::browser::{BrowserLauncher, KeyEventKind, LaunchOptions, Viewport};

    const URL: &str = "http://mock/exec";

    struct Fixture {
        session: Box<dyn BrowserSession>,
        handle: MockHandle,
        pump: EventPump,
        folder: ScenarioFolder,
        events: Vec<RunEvent>,
        _root: tempfile::TempDir,
    }

    impl Fixture {
        async fn new(page: MockPage) -> Self {
            let launcher = MockLauncher::new().with_page(URL, page);
            let handle = launcher.handle();
            let mut session = launcher
                .launch(&LaunchOptions::new(Viewport {
                    width: 160,
                    height: 120,
                }))
                .await
                .unwrap();
            let pump = EventPump::new(session.take_events());
            session.goto(URL).await.unwrap();
            let root = tempfile::tempdir().unwrap();
            let folder = ScenarioFolder::new(root.path(), "exec");
            Self {
                session,
                handle,
                pump,
                folder,
                events: Vec::new(),
                _root: root,
            }
        }

        async fn run(&mut self, actions: &[Action]) -> Result<Vec<ActionLog>, FailureSummary> {
            let mut executor = ActionExecutor {
                scenario: "exec",
                session: self.session.as_mut(),
                pump: &mut self.pump,
                sink: &mut self.events,
                folder: &self.folder,
                settings: ExecutorSettings {
                    wait_animation: true,
                    animation_timeout: Duration::from_secs(30),
                    pipeline: CapturePipeline::new(0.0),
                },
            };
            executor.run(actions).await.into_result()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_hits_box_center() {
        let page = MockPage::new("p").element(
            MockElement::new("#btn", 20, 10, 40, 20).on_click(Effect::set_text("#btn", "clicked")),
        );
        let mut fx = Fixture::new(page).await;
        let logs = fx
            .run(&[Action::new(ActionKind::Click).with_selector("#btn")])
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(fx.handle.page(0).unwrap().text("#btn").as_deref(), Some("clicked"));
        let inputs = fx.handle.inputs(0);
        assert!(inputs.contains(&RecordedInput::Mouse(MouseEvent::new(
            MouseEventKind::Pressed,
            40.0,
            20.0
        ))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_typing_with_enter() {
        let page = MockPage::new("p")
            .element(MockElement::new("#input", 0, 0, 100, 20))
            .element(MockElement::new("#out", 0, 40, 100, 20));
        let mut fx = Fixture::new(page).await;
        let actions = [
            Action::new(ActionKind::Click).with_selector("#input"),
            Action::new(ActionKind::Typing {
                value: "milk".to_string(),
                enter: true,
                tab: false,
            }),
        ];
        let start = Instant::now();
        fx.run(&actions).await.unwrap();
        assert!(start.elapsed() >= TYPING_PAUSE * 4);
        assert_eq!(fx.handle.page(0).unwrap().value("#input").as_deref(), Some("milk"));

        let keys: Vec<_> = fx
            .handle
            .inputs(0)
            .into_iter()
            .filter_map(|input| match input {
                RecordedInput::Key(key) => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(keys.len(), 4 + 3);
        assert_eq!(keys[4].kind, KeyEventKind::RawKeyDown);
        assert_eq!(keys[4].key_code, Some(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_element_times_out_within_bound() {
        let mut fx = Fixture::new(MockPage::new("empty")).await;
        let mut action = Action::new(ActionKind::Click).with_selector("#missing");
        action.wait_timeout = ms(2000);
        let start = Instant::now();
        let summary = fx.run(&[action]).await.unwrap_err();
        let elapsed = start.elapsed();
        assert!(elapsed >= ms(2000));
        assert!(elapsed <= ms(2000) + ELEMENT_POLL_INTERVAL);
        assert_eq!(summary.index, Some(0));
        assert_eq!(summary.kind, "timeout");
        assert!(summary.message.contains("#missing"));
        assert!(matches!(fx.events.last(), Some(RunEvent::ActionFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_late_element() {
        let page = MockPage::new("p")
            .element(MockElement::new("#late", 0, 0, 10, 10).appear_after(ms(300)));
        let mut fx = Fixture::new(page).await;
        let start = Instant::now();
        fx.run(&[Action::new(ActionKind::Exist).with_selector("#late")])
            .await
            .unwrap();
        assert!(start.elapsed() >= ms(300));
        assert!(start.elapsed() <= ms(300) + ELEMENT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_inner_text_matches_later_text() {
        let page = MockPage::new("p").element(
            MockElement::new("#status", 0, 0, 100, 20)
                .text("loading")
                .text_at(ms(150), "3 items left"),
        );
        let mut fx = Fixture::new(page).await;
        let action = Action::new(ActionKind::AssertInnerText {
            pattern: Pattern::new(r"\d+ items").unwrap(),
        })
        .with_selector("#status");
        let logs = fx.run(&[action]).await.unwrap();
        assert_eq!(
            logs[0].assertion,
            Some(AssertionResult {
                node_text: "3 items left".to_string(),
                matched: "3 items".to_string(),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_inner_text_timeout_keeps_last_text() {
        let page = MockPage::new("p")
            .element(MockElement::new("#status", 0, 0, 100, 20).text("loading"));
        let mut fx = Fixture::new(page).await;
        let mut action = Action::new(ActionKind::AssertInnerText {
            pattern: Pattern::new("^done$").unwrap(),
        })
        .with_selector("#status");
        action.wait_timeout = ms(500);
        let summary = fx.run(&[action]).await.unwrap_err();
        assert_eq!(summary.kind, "assertion");
        assert!(summary.message.contains("loading"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_remaining_actions() {
        let page = MockPage::new("p").element(MockElement::new("#a", 0, 0, 10, 10));
        let mut fx = Fixture::new(page).await;
        let mut missing = Action::new(ActionKind::Exist).with_selector("#nope");
        missing.wait_timeout = ms(50);
        let actions = [
            Action::new(ActionKind::Exist).with_selector("#a"),
            missing,
            Action::new(ActionKind::Click).with_selector("#a"),
        ];
        fx.run(&actions).await.unwrap_err();
        let executed = fx
            .events
            .iter()
            .filter(|e| matches!(e, RunEvent::ActionExecuted { .. }))
            .count();
        assert_eq!(executed, 1);
        assert_eq!(fx.events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_animation_delays_next_action() {
        let page = MockPage::new("p").element(
            MockElement::new("#btn", 0, 0, 50, 20).on_click(Effect::Animate(ms(400))),
        );
        let mut fx = Fixture::new(page).await;
        let actions = [
            Action::new(ActionKind::Click).with_selector("#btn"),
            Action::new(ActionKind::Exist).with_selector("#btn"),
        ];
        let start = Instant::now();
        fx.run(&actions).await.unwrap();
        assert!(start.elapsed() >= ms(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_dispatches_two_phases() {
        let page = MockPage::new("p").element(MockElement::new("#area", 0, 0, 100, 100));
        let mut fx = Fixture::new(page).await;
        let action = Action::new(ActionKind::Move {
            start: [10.0, 0.0],
            end: [-20.0, 5.0],
        })
        .with_selector("#area");
        let start = Instant::now();
        fx.run(&[action]).await.unwrap();
        assert!(start.elapsed() >= MOVE_PHASE_PAUSE);
        let moves: Vec<_> = fx
            .handle
            .inputs(0)
            .into_iter()
            .filter_map(|input| match input {
                RecordedInput::Mouse(m) => Some((m.x, m.y)),
                _ => None,
            })
            .collect();
        assert_eq!(moves, vec![(60.0, 50.0), (30.0, 55.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_bypasses_cache() {
        let mut fx = Fixture::new(MockPage::new("p")).await;
        fx.run(&[Action::new(ActionKind::Reload)]).await.unwrap();
        assert!(fx
            .handle
            .inputs(0)
            .contains(&RecordedInput::Reload { ignore_cache: true }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_action_is_noop() {
        let mut fx = Fixture::new(MockPage::new("p")).await;
        let logs = fx
            .run(&[Action::new(ActionKind::Unknown {
                original: "hover".to_string(),
            })])
            .await
            .unwrap();
        assert_eq!(logs[0].action.type_name(), "hover");
    }
}
