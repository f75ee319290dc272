//! Screenshot capture points.
//!
//! A capture either records a new baseline or, when one already exists for
//! the same file name, captures into `test/` and compares against it.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::browser::BrowserSession;
use crate::compare::{Analysis, compare_files};
use crate::error::CaptureError;
use crate::layout::{ScenarioFolder, sanitize_name};
use crate::playbook::Action;

/// Files written for one capture point
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenshotFiles {
    pub base: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenshotResult {
    pub files: ScreenshotFiles,
    /// `None` when this capture recorded a new baseline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

impl ScreenshotResult {
    pub fn is_baseline(&self) -> bool {
        self.analysis.is_none()
    }
}

/// What an action log records about its screenshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScreenshotOutcome {
    Captured(ScreenshotResult),
    Failed { err: String },
}

impl ScreenshotOutcome {
    pub fn result(&self) -> Option<&ScreenshotResult> {
        match self {
            ScreenshotOutcome::Captured(result) => Some(result),
            ScreenshotOutcome::Failed { .. } => None,
        }
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.result().and_then(|r| r.analysis.as_ref())
    }
}

impl From<Result<ScreenshotResult, CaptureError>> for ScreenshotOutcome {
    fn from(result: Result<ScreenshotResult, CaptureError>) -> Self {
        match result {
            Ok(result) => ScreenshotOutcome::Captured(result),
            Err(err) => ScreenshotOutcome::Failed {
                err: err.to_string(),
            },
        }
    }
}

/// File name (without extension) for the capture of action `index`.
///
/// `{index}_{comment}` when the action has a comment, else
/// `{index}_{type}-{selector}`, else `{index}_{type}`.
pub fn screenshot_file_name(action: &Action, index: usize) -> String {
    let label = match (&action.comment, &action.selector) {
        (Some(comment), _) => comment.clone(),
        (None, Some(selector)) => format!("{}-{}", action.type_name(), selector),
        (None, None) => action.type_name().to_string(),
    };
    format!("{index}_{}", sanitize_name(&label))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapturePipeline {
    /// Largest mismatch fraction that still passes
    pub threshold: f64,
}

impl CapturePipeline {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub async fn capture(
        &self,
        session: &mut dyn BrowserSession,
        folder: &ScenarioFolder,
        action: &Action,
        index: usize,
    ) -> Result<ScreenshotResult, CaptureError> {
        let name = screenshot_file_name(action, index);
        let base = folder.base_path(&name);

        if !exists(&base).await? {
            self.snapshot(session, &base).await?;
            debug!(path = %base.display(), "recorded baseline");
            return Ok(ScreenshotResult {
                files: ScreenshotFiles {
                    base,
                    test: None,
                    diff: None,
                },
                analysis: None,
            });
        }

        let test = folder.test_path(&name);
        let diff = folder.diff_path(&name);
        self.snapshot(session, &test).await?;
        let analysis = compare_blocking(&base, &test, &diff, self.threshold).await?;
        debug!(
            path = %test.display(),
            mismatch = analysis.mis_match_percentage,
            "compared against baseline"
        );
        Ok(ScreenshotResult {
            files: ScreenshotFiles {
                base,
                test: Some(test),
                diff: analysis.has_mismatch().then_some(diff),
            },
            analysis: Some(analysis),
        })
    }

    /// Capture the viewport into `path`, scaled to the viewport width
    pub async fn snapshot(
        &self,
        session: &mut dyn BrowserSession,
        path: &Path,
    ) -> Result<(), CaptureError> {
        if !session.is_headless() {
            return Err(CaptureError::VisibleWindow);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CaptureError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let width = session.viewport().width;
        session.screenshot(Some(path), Some(width)).await?;
        Ok(())
    }
}

/// Decoding and diffing full-page PNGs is CPU bound; keep it off the runtime threads
async fn compare_blocking(
    base: &Path,
    test: &Path,
    diff: &Path,
    threshold: f64,
) -> Result<Analysis, CaptureError> {
    let (base, test_path, diff) = (base.to_path_buf(), test.to_path_buf(), diff.to_path_buf());
    let test = test_path.clone();
    let analysis = tokio::task::spawn_blocking(move || {
        compare_files(&base, &test, &diff, threshold)
    })
    .await
    .map_err(|err| CaptureError::Io {
        path: test_path,
        source: std::io::Error::other(err),
    })??;
    Ok(analysis)
}

async fn exists(path: &Path) -> Result<bool, CaptureError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|source| CaptureError::Io {
            path: path.to_path_buf(),
            source,
        })
}
