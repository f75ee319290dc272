//! Scenario runner and run results.
//!
//! The runner opens one isolated browser session per scenario, hands the
//! session to an [`ActionExecutor`], and keeps finished sessions on an idle
//! list until [`ScenarioRunner::close_all`] tears them down together.

use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserLauncher, BrowserSession, LaunchOptions, Viewport};
use crate::capture::CapturePipeline;
use crate::config;
use crate::error::{CaptureError, RunError};
use crate::events::{EventSink, RunEvent};
use crate::executor::{ActionExecutor, ActionLog, Execution, ExecutorSettings, FailureSummary};
use crate::layout::ScenarioFolder;
use crate::playbook::{Playbook, Scenario};
use crate::sync::{ConsoleMessage, EventPump, NetworkFailure};

/// Settings for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub imgdir: PathBuf,
    /// Drop recorded baselines before each scenario
    pub rebase: bool,
    pub mismatch_threshold: f64,
    /// Open a visible browser window; screenshots are refused in this mode
    pub show_window: bool,
    pub wait_animation: bool,
    /// Only run scenarios whose name contains this substring
    pub include: Option<String>,
    /// Base URL overriding the playbook's `url` and `host`
    pub host: Option<String>,
    pub finish_snapshot: bool,
    pub animation_timeout: Duration,
    pub goto_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        let config = config::get();
        Self {
            imgdir: PathBuf::from(&config.run.imgdir),
            rebase: false,
            mismatch_threshold: config.run.mismatch_threshold,
            show_window: false,
            wait_animation: true,
            include: None,
            host: None,
            finish_snapshot: false,
            animation_timeout: config.timeouts.animation,
            goto_timeout: config.timeouts.goto,
            chrome_path: config.browser.chrome_path.as_ref().map(PathBuf::from),
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn imgdir(mut self, imgdir: impl Into<PathBuf>) -> Self {
        self.imgdir = imgdir.into();
        self
    }

    pub fn rebase(mut self, rebase: bool) -> Self {
        self.rebase = rebase;
        self
    }

    pub fn mismatch_threshold(mut self, threshold: f64) -> Self {
        self.mismatch_threshold = threshold;
        self
    }

    pub fn show_window(mut self, show: bool) -> Self {
        self.show_window = show;
        self
    }

    pub fn wait_animation(mut self, wait: bool) -> Self {
        self.wait_animation = wait;
        self
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include = Some(pattern.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn finish_snapshot(mut self, enabled: bool) -> Self {
        self.finish_snapshot = enabled;
        self
    }

    pub fn animation_timeout(mut self, timeout: Duration) -> Self {
        self.animation_timeout = timeout;
        self
    }

    pub fn goto_timeout(mut self, timeout: Duration) -> Self {
        self.goto_timeout = timeout;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    fn launch_options(&self, playbook: &Playbook) -> LaunchOptions {
        let mut launch = LaunchOptions::new(Viewport {
            width: playbook.view_width,
            height: playbook.view_height,
        });
        launch.headless = !self.show_window;
        launch.proxy = playbook.proxy.clone();
        launch.goto_timeout = self.goto_timeout;
        launch.chrome_path = self.chrome_path.clone();
        launch
    }

    fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            wait_animation: self.wait_animation,
            animation_timeout: self.animation_timeout,
            pipeline: CapturePipeline::new(self.mismatch_threshold),
        }
    }

    fn includes(&self, scenario: &Scenario) -> bool {
        self.include
            .as_deref()
            .is_none_or(|pattern| scenario.name.contains(pattern))
    }
}

/// Result of one scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub name: String,
    pub url: String,
    pub success: bool,
    pub duration_ms: u64,
    pub actions: Vec<ActionLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub console: Vec<ConsoleMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub network_errors: Vec<NetworkFailure>,
}

impl ScenarioReport {
    /// Comparisons whose mismatch exceeded the threshold
    pub fn rejected_screenshots(&self) -> usize {
        self.actions
            .iter()
            .filter_map(|log| log.screenshot.as_ref()?.analysis())
            .filter(|analysis| !analysis.pass_threshold)
            .count()
    }

    pub fn passed(&self) -> bool {
        self.success && self.rejected_screenshots() == 0
    }
}

/// Result of a whole run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub scenarios: Vec<ScenarioReport>,
    pub duration_ms: u64,
}

impl RunReport {
    /// Every scenario finished and every comparison was within the threshold
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(ScenarioReport::passed)
    }

    pub fn failed_scenarios(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.scenarios.iter().filter(|s| !s.passed())
    }
}

/// Drives every scenario of a playbook through a browser launcher
pub struct ScenarioRunner<L> {
    launcher: L,
    options: RunOptions,
    active: Option<Box<dyn BrowserSession>>,
    idle: Vec<Box<dyn BrowserSession>>,
}

impl<L: BrowserLauncher> ScenarioRunner<L> {
    pub fn new(launcher: L, options: RunOptions) -> Self {
        Self {
            launcher,
            options,
            active: None,
            idle: Vec::new(),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Sessions opened by this runner and not yet closed
    pub fn open_sessions(&self) -> usize {
        self.idle.len() + usize::from(self.active.is_some())
    }

    /// Run every included scenario in order, then close all sessions.
    ///
    /// Fails before any browser is launched when a scenario URL cannot be
    /// resolved. A failing scenario is reported and the run moves on.
    pub async fn run(
        &mut self,
        playbook: &Playbook,
        sink: &mut dyn EventSink,
    ) -> Result<RunReport, RunError> {
        let urls = playbook.resolve_urls(self.options.host.as_deref())?;
        let started = Instant::now();
        let mut reports = Vec::new();

        for (scenario, url) in playbook.scenarios.iter().zip(urls) {
            if !self.options.includes(scenario) {
                debug!(scenario = %scenario.name, "skipped by filter");
                continue;
            }
            let report = self.run_scenario(playbook, scenario, url, &mut *sink).await;
            reports.push(report);
        }

        self.close_all().await;
        let report = RunReport {
            scenarios: reports,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        sink.emit(RunEvent::RunEnd {
            duration_ms: report.duration_ms,
            passed: report.passed(),
        });
        Ok(report)
    }

    /// Like [`Self::run`], but stops early when `shutdown` completes.
    ///
    /// On shutdown every open session is closed and
    /// [`RunError::Interrupted`] is returned.
    pub async fn run_until<F>(
        &mut self,
        playbook: &Playbook,
        sink: &mut dyn EventSink,
        shutdown: F,
    ) -> Result<RunReport, RunError>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            result = self.run(playbook, &mut *sink) => result,
            _ = shutdown => Err(RunError::Interrupted),
        };
        if matches!(result, Err(RunError::Interrupted)) {
            warn!("run interrupted; closing browsers");
            self.close_all().await;
        }
        result
    }

    /// Close every session this runner still holds, concurrently
    pub async fn close_all(&mut self) {
        let mut sessions: Vec<_> = self.idle.drain(..).collect();
        sessions.extend(self.active.take());
        if sessions.is_empty() {
            return;
        }
        debug!(count = sessions.len(), "closing browser sessions");
        let results = join_all(sessions.iter_mut().map(|session| session.close())).await;
        for err in results.into_iter().filter_map(Result::err) {
            warn!(error = %err, "failed to close browser session");
        }
    }

    async fn run_scenario(
        &mut self,
        playbook: &Playbook,
        scenario: &Scenario,
        url: String,
        sink: &mut dyn EventSink,
    ) -> ScenarioReport {
        let started = Instant::now();
        sink.emit(RunEvent::ScenarioStart {
            scenario: scenario.name.clone(),
            url: url.clone(),
        });

        let folder = ScenarioFolder::new(&self.options.imgdir, &scenario.name);
        let mut pump = EventPump::default();
        let Execution { actions, failure } = self
            .drive(playbook, scenario, &url, &folder, &mut pump, &mut *sink)
            .await
            .unwrap_or_else(Execution::failed);

        if let Some(session) = self.active.as_mut() {
            if let Some(failure) = &failure {
                let name = match failure.index {
                    Some(index) => format!("{index}_failed"),
                    None => "failed".to_string(),
                };
                snapshot(session.as_mut(), &folder.fail_path(&name), &scenario.name).await;
            }
            if self.options.finish_snapshot {
                snapshot(session.as_mut(), &folder.finish_path("finish"), &scenario.name).await;
            }
        }
        pump.drain(&scenario.name, &mut *sink);
        self.idle.extend(self.active.take());

        // action failures were already reported through ActionFailed
        if let Some(failure) = failure.as_ref().filter(|f| f.index.is_none()) {
            error!(scenario = %scenario.name, "{}", failure.message);
        }
        let (console, network_errors) = pump.into_logs();
        let report = ScenarioReport {
            name: scenario.name.clone(),
            url,
            success: failure.is_none(),
            duration_ms: started.elapsed().as_millis() as u64,
            actions,
            failure,
            console,
            network_errors,
        };
        sink.emit(RunEvent::ScenarioEnd {
            scenario: report.name.clone(),
            success: report.success,
            duration_ms: report.duration_ms,
        });
        report
    }

    /// Launch, navigate, prepare the image folder and execute the actions
    async fn drive(
        &mut self,
        playbook: &Playbook,
        scenario: &Scenario,
        url: &str,
        folder: &ScenarioFolder,
        pump: &mut EventPump,
        sink: &mut dyn EventSink,
    ) -> Result<Execution, FailureSummary> {
        let launch = self.options.launch_options(playbook);
        let session = self
            .launcher
            .launch(&launch)
            .await
            .map_err(|err| FailureSummary::new("browser", err.to_string()))?;
        let session = self.active.insert(session);
        *pump = EventPump::new(session.take_events());

        info!(scenario = %scenario.name, url, "navigating");
        session
            .goto(url)
            .await
            .map_err(|err| FailureSummary::new("browser", err.to_string()))?;

        folder
            .prepare(self.options.rebase, url)
            .map_err(|err| FailureSummary::new("io", format!("{}: {err}", folder.dir.display())))?;

        let mut executor = ActionExecutor {
            scenario: &scenario.name,
            session: session.as_mut(),
            pump,
            sink,
            folder,
            settings: self.options.executor_settings(),
        };
        Ok(executor.run(&scenario.actions).await)
    }
}

async fn snapshot(session: &mut dyn BrowserSession, path: &std::path::Path, scenario: &str) {
    let pipeline = CapturePipeline::new(0.0);
    match pipeline.snapshot(session, path).await {
        Ok(()) => debug!(scenario, path = %path.display(), "snapshot written"),
        // nothing to capture with a visible window
        Err(CaptureError::VisibleWindow) => {}
        Err(err) => warn!(scenario, error = %err, "snapshot failed"),
    }
}
