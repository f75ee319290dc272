//! Validated playbook model.
//!
//! Values of these types only come out of [`super::parse`], so every
//! invariant checked there (required selectors, compiled patterns, unique
//! scenario names) holds for the lifetime of the value.

use regex::Regex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::error::PlaybookError;

/// A parsed playbook: where to browse, at what size, and what to do there
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Playbook {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub view_width: u32,
    pub view_height: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    pub scenarios: Vec<Scenario>,
}

/// Named, ordered action list; the name keys the screenshot folder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scenario {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub actions: Vec<Action>,
}

impl Playbook {
    /// Resolve the URL a scenario navigates to.
    ///
    /// A scenario's own `url` wins. Otherwise the base is the `host_override`,
    /// then the playbook `url`, then the playbook `host`, with the scenario
    /// `path` appended.
    pub fn resolve_url(
        &self,
        scenario: &Scenario,
        host_override: Option<&str>,
    ) -> Result<String, PlaybookError> {
        if let Some(url) = scenario.url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }
        let base = host_override
            .or(self.url.as_deref())
            .or(self.host.as_deref())
            .filter(|b| !b.is_empty())
            .ok_or_else(|| PlaybookError::NoUrl(scenario.name.clone()))?;
        Ok(format!("{}{}", base, scenario.path.as_deref().unwrap_or("")))
    }

    /// Resolve every scenario URL up front, failing on the first that cannot resolve
    pub fn resolve_urls(&self, host_override: Option<&str>) -> Result<Vec<String>, PlaybookError> {
        self.scenarios
            .iter()
            .map(|s| self.resolve_url(s, host_override))
            .collect()
    }

    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }
}

/// One step of a scenario
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(flatten)]
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(serialize_with = "as_millis")]
    pub wait_timeout: Duration,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_as_millis")]
    pub delay: Option<Duration>,
    #[serde(rename = "shot", skip_serializing_if = "std::ops::Not::not")]
    pub screenshot: bool,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "opt_as_millis")]
    pub capture_delay: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Action {
    /// Action of the given kind with no common attributes set
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            selector: None,
            wait_timeout: crate::config::default_wait_timeout(),
            delay: None,
            screenshot: false,
            capture_delay: None,
            comment: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_screenshot(mut self) -> Self {
        self.screenshot = true;
        self
    }

    pub fn type_name(&self) -> &str {
        self.kind.name()
    }
}

/// X/Y pair, used for scroll deltas and move offsets
pub type Point = [f64; 2];

/// What an action does once its element is present
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionKind {
    Click,
    Typing {
        value: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        enter: bool,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        tab: bool,
    },
    Scroll {
        #[serde(rename = "position", skip_serializing_if = "Option::is_none")]
        delta: Option<Point>,
        #[serde(rename = "scrollTo", skip_serializing_if = "std::ops::Not::not")]
        into_view: bool,
    },
    Select {
        #[serde(rename = "selectIndex")]
        nth: u32,
    },
    Exist,
    AssertInnerText {
        #[serde(rename = "match")]
        pattern: Pattern,
    },
    Reload,
    Move {
        #[serde(rename = "startPosition")]
        start: Point,
        #[serde(rename = "endPosition")]
        end: Point,
    },
    /// Unrecognized type kept by lenient parsing; executes as a no-op
    Unknown { original: String },
}

impl ActionKind {
    pub fn name(&self) -> &str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Typing { .. } => "typing",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::Select { .. } => "select",
            ActionKind::Exist => "exist",
            ActionKind::AssertInnerText { .. } => "assertInnerText",
            ActionKind::Reload => "reload",
            ActionKind::Move { .. } => "move",
            ActionKind::Unknown { original } => original,
        }
    }
}

/// Compiled `match` expression of an assertInnerText action
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source).map(Pattern)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    /// Leftmost match in `text`
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.0.find(text).map(|m| m.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.0.as_str())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

pub(crate) fn as_millis<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}

pub(crate) fn opt_as_millis<S: Serializer>(
    d: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => as_millis(d, serializer),
        None => serializer.serialize_none(),
    }
}
