//! Playbook JSON parsing and validation.
//!
//! The JSON is first read into permissive `Raw*` mirrors, then validated into
//! the typed model. Every structural problem is reported here, before any
//! browser is launched.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use super::types::{Action, ActionKind, Pattern, Playbook, Point, Scenario};
use crate::config;
use crate::error::PlaybookError;
use crate::layout::sanitize_name;

/// Name given to the single scenario of a shorthand playbook without `scenario`
pub const DEFAULT_SCENARIO_NAME: &str = "default";

/// Knobs for playbook validation
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Keep unknown action types as logged no-ops instead of rejecting them
    pub lenient: bool,
    /// `waitTimeout` for actions that omit it
    pub default_wait_timeout: Duration,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            lenient: false,
            default_wait_timeout: config::default_wait_timeout(),
        }
    }
}

impl ParseOptions {
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlaybook {
    url: Option<String>,
    host: Option<String>,
    view_width: Option<u32>,
    view_height: Option<u32>,
    size: Option<RawSize>,
    proxy: Option<String>,
    scenarios: Option<Vec<RawScenario>>,
    // shorthand form
    scenario: Option<String>,
    actions: Option<Vec<RawAction>>,
}

#[derive(Debug, Deserialize)]
struct RawSize {
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct RawScenario {
    name: String,
    path: Option<String>,
    url: Option<String>,
    inherit: Option<String>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    #[serde(rename = "type")]
    kind: Option<String>,
    selector: Option<String>,
    wait_timeout: Option<u64>,
    delay: Option<u64>,
    shot: Option<bool>,
    screenshot: Option<bool>,
    capture_delay: Option<u64>,
    comment: Option<String>,
    value: Option<String>,
    enter: Option<bool>,
    tab: Option<bool>,
    position: Option<Point>,
    scroll_to: Option<bool>,
    select_index: Option<u32>,
    #[serde(rename = "match")]
    pattern: Option<String>,
    #[serde(alias = "start_position")]
    start_position: Option<Point>,
    #[serde(alias = "end_position")]
    end_position: Option<Point>,
}

/// Read and validate a playbook file
pub fn from_file(
    path: impl AsRef<Path>,
    options: &ParseOptions,
) -> Result<Playbook, PlaybookError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| PlaybookError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "parsing playbook");
    from_json(&json, options)
}

/// Validate a playbook held in a string
pub fn from_json(json: &str, options: &ParseOptions) -> Result<Playbook, PlaybookError> {
    let raw: RawPlaybook = serde_json::from_str(json)?;
    validate(raw, options)
}

/// Validate an already-decoded JSON value
pub fn from_value(
    value: serde_json::Value,
    options: &ParseOptions,
) -> Result<Playbook, PlaybookError> {
    let raw: RawPlaybook = serde_json::from_value(value)?;
    validate(raw, options)
}

fn validate(raw: RawPlaybook, options: &ParseOptions) -> Result<Playbook, PlaybookError> {
    let settings = &config::get().browser;
    let (view_width, view_height) = match raw.size {
        Some(size) => (size.width, size.height),
        None => (
            raw.view_width.unwrap_or(settings.view_width),
            raw.view_height.unwrap_or(settings.view_height),
        ),
    };
    if view_width == 0 || view_height == 0 {
        return Err(PlaybookError::InvalidViewport {
            width: view_width,
            height: view_height,
        });
    }

    let raw_scenarios = match (raw.scenarios, raw.actions) {
        (Some(scenarios), _) => scenarios,
        (None, Some(actions)) => vec![RawScenario {
            name: raw
                .scenario
                .unwrap_or_else(|| DEFAULT_SCENARIO_NAME.to_string()),
            path: None,
            url: None,
            inherit: None,
            actions,
        }],
        (None, None) => return Err(PlaybookError::NoScenarios),
    };

    // names are compared by the folder they map to
    let mut seen = HashSet::new();
    for (index, scenario) in raw_scenarios.iter().enumerate() {
        if scenario.name.trim().is_empty() {
            return Err(PlaybookError::EmptyScenarioName(index));
        }
        if matches!(scenario.name.as_str(), "." | "..") {
            return Err(PlaybookError::ReservedScenarioName(scenario.name.clone()));
        }
        if !seen.insert(sanitize_name(&scenario.name)) {
            return Err(PlaybookError::DuplicateScenario(scenario.name.clone()));
        }
    }

    let flattened = flatten_inheritance(&raw_scenarios)?;
    let scenarios = raw_scenarios
        .iter()
        .zip(flattened)
        .map(|(scenario, actions)| {
            let actions = actions
                .iter()
                .enumerate()
                .map(|(index, action)| validate_action(&scenario.name, index, action, options))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Scenario {
                name: scenario.name.clone(),
                path: scenario.path.clone(),
                url: scenario.url.clone(),
                actions,
            })
        })
        .collect::<Result<Vec<_>, PlaybookError>>()?;

    Ok(Playbook {
        url: raw.url,
        host: raw.host,
        view_width,
        view_height,
        proxy: raw.proxy.filter(|p| !p.is_empty()),
        scenarios,
    })
}

/// Expand `inherit` chains: each scenario's actions are preceded by its parent's
fn flatten_inheritance(scenarios: &[RawScenario]) -> Result<Vec<Vec<RawAction>>, PlaybookError> {
    let by_name: HashMap<&str, &RawScenario> =
        scenarios.iter().map(|s| (s.name.as_str(), s)).collect();
    let mut resolved: HashMap<&str, Vec<RawAction>> = HashMap::new();

    for scenario in scenarios {
        let mut chain = vec![scenario];
        let mut visiting = HashSet::from([scenario.name.as_str()]);
        let mut current = scenario;
        while let Some(parent) = current.inherit.as_deref() {
            if resolved.contains_key(parent) {
                break;
            }
            let next = by_name
                .get(parent)
                .copied()
                .ok_or_else(|| PlaybookError::UnknownParent {
                    scenario: current.name.clone(),
                    parent: parent.to_string(),
                })?;
            if !visiting.insert(next.name.as_str()) {
                return Err(PlaybookError::InheritCycle(scenario.name.clone()));
            }
            chain.push(next);
            current = next;
        }

        // Walk back from the oldest ancestor, memoizing every link
        for link in chain.into_iter().rev() {
            if resolved.contains_key(link.name.as_str()) {
                continue;
            }
            let mut actions = match link.inherit.as_deref() {
                Some(parent) => resolved.get(parent).cloned().unwrap_or_default(),
                None => Vec::new(),
            };
            actions.extend(link.actions.iter().cloned());
            resolved.insert(link.name.as_str(), actions);
        }
    }

    Ok(scenarios
        .iter()
        .map(|s| resolved.remove(s.name.as_str()).unwrap_or_default())
        .collect())
}

fn validate_action(
    scenario: &str,
    index: usize,
    raw: &RawAction,
    options: &ParseOptions,
) -> Result<Action, PlaybookError> {
    let type_name = raw
        .kind
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| PlaybookError::MissingType {
            scenario: scenario.to_string(),
            index,
        })?;

    let missing = |kind: &'static str, attribute: &'static str| PlaybookError::MissingAttribute {
        scenario: scenario.to_string(),
        index,
        kind,
        attribute,
    };
    let selector = raw.selector.clone().filter(|s| !s.is_empty());
    let require_selector = |kind: &'static str| {
        if selector.is_none() {
            Err(missing(kind, "selector"))
        } else {
            Ok(())
        }
    };

    let kind = match type_name {
        "click" => {
            require_selector("click")?;
            ActionKind::Click
        }
        "typing" | "enter" => {
            let enter = raw.enter.unwrap_or(false);
            let tab = raw.tab.unwrap_or(false);
            let value = match raw.value.clone() {
                Some(value) => value,
                None if enter || tab => String::new(),
                None => return Err(missing("typing", "value")),
            };
            ActionKind::Typing { value, enter, tab }
        }
        "scroll" | "scrollTo" => {
            let into_view = raw.scroll_to.unwrap_or(false)
                || (type_name == "scrollTo" && raw.position.is_none());
            if into_view {
                require_selector("scroll")?;
            } else if raw.position.is_none() {
                return Err(missing("scroll", "position"));
            }
            ActionKind::Scroll {
                delta: raw.position,
                into_view,
            }
        }
        "select" => {
            require_selector("select")?;
            let nth = raw.select_index.ok_or_else(|| missing("select", "selectIndex"))?;
            ActionKind::Select { nth }
        }
        "exist" | "wait" => {
            require_selector("exist")?;
            ActionKind::Exist
        }
        "assertInnerText" => {
            require_selector("assertInnerText")?;
            let source = raw
                .pattern
                .as_deref()
                .ok_or_else(|| missing("assertInnerText", "match"))?;
            let pattern = Pattern::new(source).map_err(|source_err| PlaybookError::InvalidPattern {
                scenario: scenario.to_string(),
                index,
                pattern: source.to_string(),
                source: source_err,
            })?;
            ActionKind::AssertInnerText { pattern }
        }
        "reload" => ActionKind::Reload,
        "move" => {
            require_selector("move")?;
            ActionKind::Move {
                start: raw.start_position.ok_or_else(|| missing("move", "startPosition"))?,
                end: raw.end_position.ok_or_else(|| missing("move", "endPosition"))?,
            }
        }
        other if options.lenient => {
            warn!(scenario, index, kind = other, "unknown action type, treating as no-op");
            ActionKind::Unknown {
                original: other.to_string(),
            }
        }
        other => {
            return Err(PlaybookError::UnknownAction {
                scenario: scenario.to_string(),
                index,
                kind: other.to_string(),
            });
        }
    };

    Ok(Action {
        kind,
        selector,
        wait_timeout: raw
            .wait_timeout
            .map(Duration::from_millis)
            .unwrap_or(options.default_wait_timeout),
        delay: raw.delay.filter(|d| *d > 0).map(Duration::from_millis),
        screenshot: raw.shot.unwrap_or(false) || raw.screenshot.unwrap_or(false),
        capture_delay: raw.capture_delay.filter(|d| *d > 0).map(Duration::from_millis),
        comment: raw.comment.clone().filter(|c| !c.is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Playbook, PlaybookError> {
        from_value(value, &ParseOptions::default())
    }

    #[test]
    fn test_parse_full_form() {
        let pb = parse(json!({
            "host": "http://localhost:3000",
            "viewWidth": 800,
            "viewHeight": 600,
            "scenarios": [{
                "name": "todo",
                "path": "/todo.html",
                "actions": [
                    {"type": "typing", "selector": "#new", "value": "buy milk", "enter": true},
                    {"type": "wait", "selector": ".item", "waitTimeout": 2000, "shot": true},
                    {"type": "assertInnerText", "selector": "#count", "match": "1 item"}
                ]
            }]
        }))
        .unwrap();
        assert_eq!((pb.view_width, pb.view_height), (800, 600));
        let actions = &pb.scenarios[0].actions;
        assert_eq!(actions.len(), 3);
        assert_eq!(
            actions[0].kind,
            ActionKind::Typing {
                value: "buy milk".to_string(),
                enter: true,
                tab: false
            }
        );
        assert_eq!(actions[1].kind, ActionKind::Exist);
        assert_eq!(actions[1].wait_timeout, Duration::from_millis(2000));
        assert!(actions[1].screenshot);
        assert_eq!(actions[2].wait_timeout, config::default_wait_timeout());
    }

    #[test]
    fn test_parse_shorthand_form() {
        let pb = parse(json!({
            "url": "file:///tmp/move.html",
            "scenario": "view2",
            "size": {"width": 800, "height": 800},
            "actions": [
                {"type": "move", "selector": "#box", "start_position": [80, 100], "endPosition": [200, 260]}
            ]
        }))
        .unwrap();
        assert_eq!(pb.scenarios.len(), 1);
        assert_eq!(pb.scenarios[0].name, "view2");
        assert_eq!(
            pb.scenarios[0].actions[0].kind,
            ActionKind::Move {
                start: [80.0, 100.0],
                end: [200.0, 260.0]
            }
        );
        assert_eq!(pb.resolve_urls(None).unwrap(), vec!["file:///tmp/move.html"]);
    }

    #[test]
    fn test_missing_selector_is_rejected() {
        let err = parse(json!({
            "host": "http://x",
            "scenarios": [{"name": "a", "actions": [{"type": "click"}]}]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            PlaybookError::MissingAttribute { index: 0, attribute: "selector", .. }
        ));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let err = parse(json!({
            "host": "http://x",
            "scenarios": [{"name": "a", "actions": [
                {"type": "assertInnerText", "selector": "#t", "match": "(unclosed"}
            ]}]
        }))
        .unwrap_err();
        assert!(matches!(err, PlaybookError::InvalidPattern { .. }));
    }

    #[test]
    fn test_unknown_type_strict_and_lenient() {
        let value = json!({
            "host": "http://x",
            "scenarios": [{"name": "a", "actions": [{"type": "hover", "selector": "#t"}]}]
        });
        let err = parse(value.clone()).unwrap_err();
        assert!(matches!(err, PlaybookError::UnknownAction { ref kind, .. } if kind == "hover"));

        let pb = from_value(value, &ParseOptions::default().lenient(true)).unwrap();
        assert_eq!(
            pb.scenarios[0].actions[0].kind,
            ActionKind::Unknown {
                original: "hover".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_scenario_is_rejected() {
        let err = parse(json!({
            "host": "http://x",
            "scenarios": [{"name": "a", "actions": []}, {"name": "a", "actions": []}]
        }))
        .unwrap_err();
        assert!(matches!(err, PlaybookError::DuplicateScenario(name) if name == "a"));
    }

    #[test]
    fn test_names_sharing_a_folder_are_rejected() {
        let err = parse(json!({
            "host": "http://x",
            "scenarios": [{"name": "a b", "actions": []}, {"name": "a_b", "actions": []}]
        }))
        .unwrap_err();
        assert!(matches!(err, PlaybookError::DuplicateScenario(name) if name == "a_b"));
    }

    #[test]
    fn test_dot_names_are_rejected() {
        for name in [".", ".."] {
            let err = parse(json!({
                "host": "http://x",
                "scenarios": [{"name": name, "actions": []}]
            }))
            .unwrap_err();
            assert!(matches!(err, PlaybookError::ReservedScenarioName(_)), "{name}: {err}");
        }
        let dots = parse(json!({
            "host": "http://x",
            "scenarios": [{"name": "...", "actions": []}]
        }));
        assert!(dots.is_ok());
    }

    #[test]
    fn test_inherit_prepends_parent_actions() {
        let pb = parse(json!({
            "host": "http://x",
            "scenarios": [
                {"name": "child", "inherit": "login", "actions": [{"type": "click", "selector": "#buy"}]},
                {"name": "login", "inherit": "open", "actions": [{"type": "click", "selector": "#login"}]},
                {"name": "open", "actions": [{"type": "reload"}]}
            ]
        }))
        .unwrap();
        let child: Vec<_> = pb
            .scenario("child")
            .unwrap()
            .actions
            .iter()
            .map(|a| a.selector.clone())
            .collect();
        assert_eq!(
            child,
            vec![None, Some("#login".to_string()), Some("#buy".to_string())]
        );
        assert_eq!(pb.scenario("login").unwrap().actions.len(), 2);
    }

    #[test]
    fn test_inherit_cycle_and_unknown_parent() {
        let err = parse(json!({
            "host": "http://x",
            "scenarios": [
                {"name": "a", "inherit": "b", "actions": []},
                {"name": "b", "inherit": "a", "actions": []}
            ]
        }))
        .unwrap_err();
        assert!(matches!(err, PlaybookError::InheritCycle(_)));

        let err = parse(json!({
            "host": "http://x",
            "scenarios": [{"name": "a", "inherit": "ghost", "actions": []}]
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            PlaybookError::UnknownParent { ref parent, .. } if parent == "ghost"
        ));
    }

    #[test]
    fn test_scroll_variants() {
        let pb = parse(json!({
            "host": "http://x",
            "scenarios": [{"name": "a", "actions": [
                {"type": "scroll", "position": [0, 120]},
                {"type": "scrollTo", "selector": "#footer"},
                {"type": "scroll", "selector": "#list", "scrollTo": true}
            ]}]
        }))
        .unwrap();
        let kinds: Vec<_> = pb.scenarios[0].actions.iter().map(|a| a.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Scroll { delta: Some([0.0, 120.0]), into_view: false },
                ActionKind::Scroll { delta: None, into_view: true },
                ActionKind::Scroll { delta: None, into_view: true },
            ]
        );

        let err = parse(json!({
            "host": "http://x",
            "scenarios": [{"name": "a", "actions": [{"type": "scrollTo"}]}]
        }))
        .unwrap_err();
        assert!(matches!(err, PlaybookError::MissingAttribute { attribute: "selector", .. }));
    }

    #[test]
    fn test_malformed_json_and_missing_scenarios() {
        assert!(matches!(
            from_json("{\"host\": ", &ParseOptions::default()),
            Err(PlaybookError::Json(_))
        ));
        assert!(matches!(
            parse(json!({"host": "http://x"})),
            Err(PlaybookError::NoScenarios)
        ));
        assert!(matches!(
            parse(json!({"host": "http://x", "viewWidth": 0, "scenarios": []})),
            Err(PlaybookError::InvalidViewport { .. })
        ));
    }

    #[test]
    fn test_empty_actions_are_legal() {
        let pb = parse(json!({"host": "http://x", "scenarios": [{"name": "blank"}]})).unwrap();
        assert!(pb.scenarios[0].actions.is_empty());
    }
}
