//! Error types for each layer of the runner.
//!
//! Structural problems ([`PlaybookError`]) are detected before any browser is
//! launched. Everything that can go wrong while a scenario is running is either
//! fatal to that scenario ([`ActionError`]) or recorded and skipped
//! ([`CaptureError`]).

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for browser adapter operations
pub type BrowserResult<T> = Result<T, BrowserError>;

/// Malformed or inconsistent playbook
#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("failed to read playbook {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed playbook JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("playbook defines no scenarios")]
    NoScenarios,

    #[error("invalid viewport {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },

    /// Two scenarios would share one image folder
    #[error("duplicate scenario name '{0}'")]
    DuplicateScenario(String),

    #[error("scenario name '{0}' cannot be used as an image folder name")]
    ReservedScenarioName(String),

    #[error("scenario #{0} has an empty name")]
    EmptyScenarioName(usize),

    #[error("scenario '{scenario}' action #{index}: missing action type")]
    MissingType { scenario: String, index: usize },

    #[error("scenario '{scenario}' action #{index}: unknown action type '{kind}'")]
    UnknownAction {
        scenario: String,
        index: usize,
        kind: String,
    },

    #[error("scenario '{scenario}' action #{index} ({kind}): missing required attribute '{attribute}'")]
    MissingAttribute {
        scenario: String,
        index: usize,
        kind: &'static str,
        attribute: &'static str,
    },

    #[error("scenario '{scenario}' action #{index}: invalid match pattern '{pattern}': {source}")]
    InvalidPattern {
        scenario: String,
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("scenario '{scenario}' inherits from unknown scenario '{parent}'")]
    UnknownParent { scenario: String, parent: String },

    #[error("scenario '{0}' has a circular inherit chain")]
    InheritCycle(String),

    #[error("no url specified for scenario '{0}'")]
    NoUrl(String),
}

/// Failure reported by a browser session
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("failed to navigate to {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("no element matches selector '{0}'")]
    ElementNotFound(String),

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("devtools protocol error: {0}")]
    Protocol(String),

    #[error("browser session is closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Fatal failure of a single action; stops the scenario it belongs to
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("timeout after {}ms waiting for element '{selector}' to appear", .timeout.as_millis())]
    ElementTimeout { selector: String, timeout: Duration },

    #[error(
        "timeout after {}ms: innerText of '{selector}' never matched /{pattern}/ (last seen: {last_text:?})",
        .timeout.as_millis()
    )]
    AssertionTimeout {
        selector: String,
        pattern: String,
        last_text: Option<String>,
        timeout: Duration,
    },

    #[error("{kind} action has no selector")]
    MissingSelector { kind: String },

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl ActionError {
    /// Short machine-readable category
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::ElementTimeout { .. } => "timeout",
            ActionError::AssertionTimeout { .. } => "assertion",
            ActionError::MissingSelector { .. } => "invalid",
            ActionError::Browser(_) => "browser",
        }
    }

    /// Whether the action ran out of time rather than hitting a hard error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ActionError::ElementTimeout { .. } | ActionError::AssertionTimeout { .. }
        )
    }
}

impl Serialize for ActionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("kind", self.kind())?;
        map.serialize_entry("message", &self.to_string())?;
        map.end()
    }
}

/// Image loading or encoding failure inside the comparator
#[derive(Debug, Error)]
pub enum CompareError {
    #[error("failed to load image {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write diff image {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot compare an empty image")]
    EmptyImage,
}

/// Non-fatal screenshot failure; recorded in the action log
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Screenshot is disabled when running with a visible browser window (show_window: true)")]
    VisibleWindow,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Compare(#[from] CompareError),
}

/// Run-level failure; scenario failures are reported, not returned
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Playbook(#[from] PlaybookError),

    #[error("run interrupted")]
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_serializes_kind_and_message() {
        let err = ActionError::ElementTimeout {
            selector: "#missing".to_string(),
            timeout: Duration::from_millis(2000),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "timeout");
        assert_eq!(
            value["message"],
            "timeout after 2000ms waiting for element '#missing' to appear"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn test_navigation_error_mentions_url() {
        let err = BrowserError::Navigation {
            url: "http://localhost:9/missing".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("http://localhost:9/missing"));
        let action_err: ActionError = err.into();
        assert_eq!(action_err.kind(), "browser");
        assert!(!action_err.is_timeout());
    }
}
