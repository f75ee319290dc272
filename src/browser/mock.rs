//! In-process mock browser.
//!
//! A page is a flat list of rectangular elements addressed by their exact
//! selector string. Elements can appear after a delay, change text at
//! scheduled times, and react to clicks, Enter and hover through [`Effect`]s.
//! Pages render into a [`PageCanvas`] so actions show up in screenshots.
//!
//! Time is measured with `tokio::time::Instant`, so tests running with a
//! paused clock see deterministic behaviour.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::debug;

use super::canvas::{Color, PageCanvas};
use super::{
    BoxModel, BrowserEvent, BrowserLauncher, BrowserSession, KeyEvent, KeyEventKind,
    LaunchOptions, MouseEvent, MouseEventKind, PageScript, Viewport,
};
use crate::error::{BrowserError, BrowserResult};

pub const DEFAULT_BACKGROUND: Color = [255, 255, 255];
pub const DEFAULT_ELEMENT_COLOR: Color = [230, 230, 230];

/// Reaction attached to an element or a page load
#[derive(Clone)]
pub enum Effect {
    SetText { selector: String, text: String },
    SetColor { selector: String, color: Color },
    /// Emit an animation-started event lasting `duration`
    Animate(Duration),
    Console { level: String, text: String },
    NetworkError {
        url: String,
        method: String,
        error: String,
    },
    Custom(Arc<dyn Fn(&mut MockPage) + Send + Sync>),
}

impl Effect {
    pub fn set_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Effect::SetText {
            selector: selector.into(),
            text: text.into(),
        }
    }

    pub fn custom(f: impl Fn(&mut MockPage) + Send + Sync + 'static) -> Self {
        Effect::Custom(Arc::new(f))
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::SetText { selector, text } => write!(f, "SetText({selector}, {text:?})"),
            Effect::SetColor { selector, color } => write!(f, "SetColor({selector}, {color:?})"),
            Effect::Animate(d) => write!(f, "Animate({d:?})"),
            Effect::Console { level, text } => write!(f, "Console({level}, {text:?})"),
            Effect::NetworkError { url, .. } => write!(f, "NetworkError({url})"),
            Effect::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One rectangle on the mock page; `rect` is in document coordinates
#[derive(Debug, Clone)]
pub struct MockElement {
    pub selector: String,
    pub rect: BoxModel,
    pub text: String,
    pub value: String,
    pub options: Vec<String>,
    pub selected: Option<usize>,
    pub scroll: (f64, f64),
    pub color: Color,
    pub appear_after: Duration,
    pub text_changes: Vec<(Duration, String)>,
    pub on_click: Vec<Effect>,
    pub on_enter: Vec<Effect>,
    pub on_hover: Vec<Effect>,
}

impl MockElement {
    pub fn new(selector: impl Into<String>, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            selector: selector.into(),
            rect: BoxModel {
                x: x as f64,
                y: y as f64,
                width: width as f64,
                height: height as f64,
            },
            text: String::new(),
            value: String::new(),
            options: Vec::new(),
            selected: None,
            scroll: (0.0, 0.0),
            color: DEFAULT_ELEMENT_COLOR,
            appear_after: Duration::ZERO,
            text_changes: Vec::new(),
            on_click: Vec::new(),
            on_enter: Vec::new(),
            on_hover: Vec::new(),
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// Element only exists once the page has been loaded for `delay`
    pub fn appear_after(mut self, delay: Duration) -> Self {
        self.appear_after = delay;
        self
    }

    /// Text switches to `text` once the page has been loaded for `at`
    pub fn text_at(mut self, at: Duration, text: impl Into<String>) -> Self {
        self.text_changes.push((at, text.into()));
        self.text_changes.sort_by_key(|(at, _)| *at);
        self
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }

    pub fn on_enter(mut self, effect: Effect) -> Self {
        self.on_enter.push(effect);
        self
    }

    pub fn on_hover(mut self, effect: Effect) -> Self {
        self.on_hover.push(effect);
        self
    }

    fn is_visible(&self, elapsed: Duration) -> bool {
        elapsed >= self.appear_after
    }

    /// `innerText` as of `elapsed` since load
    pub fn current_text(&self, elapsed: Duration) -> &str {
        self.text_changes
            .iter()
            .rev()
            .find(|(at, _)| *at <= elapsed)
            .map(|(_, text)| text.as_str())
            .unwrap_or(&self.text)
    }

    fn label(&self, elapsed: Duration) -> &str {
        if !self.value.is_empty() {
            return &self.value;
        }
        if let Some(option) = self.selected.and_then(|i| self.options.get(i)) {
            return option;
        }
        self.current_text(elapsed)
    }
}

/// Page model; cloned from the site template on every navigation
#[derive(Debug, Clone)]
pub struct MockPage {
    pub title: String,
    pub background: Color,
    pub elements: Vec<MockElement>,
    pub scroll: (f64, f64),
    pub on_load: Vec<Effect>,
    /// Canned answers for [`BrowserSession::evaluate`]
    pub eval_results: HashMap<String, Value>,
    focused: Option<usize>,
    hovered: Option<usize>,
    pressed: Option<usize>,
    loaded_at: Instant,
}

impl Default for MockPage {
    fn default() -> Self {
        Self::new("")
    }
}

impl MockPage {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            background: DEFAULT_BACKGROUND,
            elements: Vec::new(),
            scroll: (0.0, 0.0),
            on_load: Vec::new(),
            eval_results: HashMap::new(),
            focused: None,
            hovered: None,
            pressed: None,
            loaded_at: Instant::now(),
        }
    }

    pub fn element(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    pub fn background(mut self, color: Color) -> Self {
        self.background = color;
        self
    }

    pub fn on_load(mut self, effect: Effect) -> Self {
        self.on_load.push(effect);
        self
    }

    pub fn eval_result(mut self, expression: impl Into<String>, value: Value) -> Self {
        self.eval_results.insert(expression.into(), value);
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    fn position(&self, selector: &str) -> Option<usize> {
        let elapsed = self.elapsed();
        self.elements
            .iter()
            .position(|e| e.selector == selector && e.is_visible(elapsed))
    }

    /// First currently visible element matching `selector`
    pub fn find(&self, selector: &str) -> Option<&MockElement> {
        self.position(selector).map(|i| &self.elements[i])
    }

    pub fn find_mut(&mut self, selector: &str) -> Option<&mut MockElement> {
        self.position(selector).map(move |i| &mut self.elements[i])
    }

    /// Visible elements matching `selector`
    pub fn count(&self, selector: &str) -> usize {
        let elapsed = self.elapsed();
        self.elements
            .iter()
            .filter(|e| e.selector == selector && e.is_visible(elapsed))
            .count()
    }

    pub fn text(&self, selector: &str) -> Option<String> {
        let elapsed = self.elapsed();
        self.find(selector).map(|e| e.current_text(elapsed).to_string())
    }

    pub fn value(&self, selector: &str) -> Option<String> {
        self.find(selector).map(|e| e.value.clone())
    }

    pub fn focused(&self) -> Option<&MockElement> {
        self.focused.and_then(|i| self.elements.get(i))
    }

    pub fn push(&mut self, element: MockElement) {
        self.elements.push(element);
    }

    /// Remove the first visible match; returns whether anything was removed
    pub fn remove(&mut self, selector: &str) -> bool {
        match self.position(selector) {
            Some(index) => {
                self.elements.remove(index);
                let shift = |slot: &mut Option<usize>| {
                    *slot = match *slot {
                        Some(i) if i == index => None,
                        Some(i) if i > index => Some(i - 1),
                        other => other,
                    }
                };
                shift(&mut self.focused);
                shift(&mut self.hovered);
                shift(&mut self.pressed);
                true
            }
            None => false,
        }
    }

    fn viewport_rect(&self, element: &MockElement) -> BoxModel {
        BoxModel {
            x: element.rect.x - self.scroll.0,
            y: element.rect.y - self.scroll.1,
            ..element.rect
        }
    }

    /// Topmost visible element under a viewport point
    fn hit(&self, x: f64, y: f64) -> Option<usize> {
        let elapsed = self.elapsed();
        self.elements
            .iter()
            .enumerate()
            .rev()
            .find(|(_, e)| e.is_visible(elapsed) && self.viewport_rect(e).contains(x, y))
            .map(|(i, _)| i)
    }

    fn apply(&mut self, effects: &[Effect], events: &UnboundedSender<BrowserEvent>) {
        for effect in effects {
            match effect {
                Effect::SetText { selector, text } => {
                    if let Some(el) = self.find_mut(selector) {
                        el.text = text.clone();
                        el.text_changes.clear();
                    }
                }
                Effect::SetColor { selector, color } => {
                    if let Some(el) = self.find_mut(selector) {
                        el.color = *color;
                    }
                }
                Effect::Animate(duration) => {
                    let _ = events.send(BrowserEvent::AnimationStarted {
                        at: Instant::now(),
                        duration: *duration,
                    });
                }
                Effect::Console { level, text } => {
                    let _ = events.send(BrowserEvent::Console {
                        level: level.clone(),
                        text: text.clone(),
                    });
                }
                Effect::NetworkError { url, method, error } => {
                    let _ = events.send(BrowserEvent::NetworkError {
                        url: url.clone(),
                        method: method.clone(),
                        error: error.clone(),
                    });
                }
                Effect::Custom(f) => f(self),
            }
        }
        let len = self.elements.len();
        for slot in [&mut self.focused, &mut self.hovered, &mut self.pressed] {
            if slot.is_some_and(|i| i >= len) {
                *slot = None;
            }
        }
    }

    fn element_effects(
        &self,
        index: Option<usize>,
        pick: impl Fn(&MockElement) -> &Vec<Effect>,
    ) -> Vec<Effect> {
        index
            .and_then(|i| self.elements.get(i))
            .map(|e| pick(e).clone())
            .unwrap_or_default()
    }

    fn render(&self, viewport: Viewport) -> PageCanvas {
        let mut canvas = PageCanvas::new(viewport.width, viewport.height, self.background);
        let elapsed = self.elapsed();
        for element in self.elements.iter().filter(|e| e.is_visible(elapsed)) {
            let rect = self.viewport_rect(element);
            let (x, y) = (rect.x.round() as i64, rect.y.round() as i64);
            let (w, h) = (rect.width.max(0.0) as u32, rect.height.max(0.0) as u32);
            canvas.fill_rect(x, y, w, h, element.color);
            canvas.stroke_rect(x, y, w, h, shade(element.color));
            canvas.draw_text(
                x + 4 - element.scroll.0.round() as i64,
                y + 4 - element.scroll.1.round() as i64,
                element.label(elapsed),
                ink(element.color),
                w.saturating_sub(8),
            );
        }
        canvas
    }
}

fn shade(color: Color) -> Color {
    color.map(|c| c / 2)
}

/// Black on light fills, white on dark ones
fn ink(color: Color) -> Color {
    let luma = 0.299 * color[0] as f64 + 0.587 * color[1] as f64 + 0.114 * color[2] as f64;
    if luma > 128.0 { [0, 0, 0] } else { [255, 255, 255] }
}

/// Everything a session sent to the page, in order
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedInput {
    Goto(String),
    Reload { ignore_cache: bool },
    Mouse(MouseEvent),
    Key(KeyEvent),
    Script(PageScript),
    Capture,
}

#[derive(Debug)]
struct SessionState {
    url: Option<String>,
    page: MockPage,
    inputs: Vec<RecordedInput>,
    headless: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct MockState {
    sites: HashMap<String, MockPage>,
    sessions: Vec<SessionState>,
}

type Shared = Arc<Mutex<MockState>>;

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Launches [`MockBrowser`] sessions over a shared set of pages
#[derive(Debug, Clone, Default)]
pub struct MockLauncher {
    state: Shared,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page served at `url`
    pub fn with_page(self, url: impl Into<String>, page: MockPage) -> Self {
        self.handle().add_page(url, page);
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, options: &LaunchOptions) -> BrowserResult<Box<dyn BrowserSession>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = lock(&self.state);
            state.sessions.push(SessionState {
                url: None,
                page: MockPage::new("about:blank"),
                inputs: Vec::new(),
                headless: options.headless,
                closed: false,
            });
            state.sessions.len() - 1
        };
        debug!(session = id, headless = options.headless, "mock browser launched");
        Ok(Box::new(MockBrowser {
            state: self.state.clone(),
            id,
            viewport: options.viewport,
            headless: options.headless,
            events_tx: tx,
            events_rx: Some(rx),
        }))
    }
}

/// Test-side view of every page and session the launcher has served
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Shared,
}

impl MockHandle {
    pub fn add_page(&self, url: impl Into<String>, page: MockPage) {
        lock(&self.state).sites.insert(url.into(), page);
    }

    /// Edit the page template served at `url`; affects later navigations only
    pub fn edit_page(&self, url: &str, f: impl FnOnce(&mut MockPage)) -> bool {
        match lock(&self.state).sites.get_mut(url) {
            Some(page) => {
                f(page);
                true
            }
            None => false,
        }
    }

    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    pub fn open_sessions(&self) -> usize {
        lock(&self.state).sessions.iter().filter(|s| !s.closed).count()
    }

    pub fn inputs(&self, session: usize) -> Vec<RecordedInput> {
        lock(&self.state)
            .sessions
            .get(session)
            .map(|s| s.inputs.clone())
            .unwrap_or_default()
    }

    /// Live page of a session as it is now
    pub fn page(&self, session: usize) -> Option<MockPage> {
        lock(&self.state).sessions.get(session).map(|s| s.page.clone())
    }

    pub fn url(&self, session: usize) -> Option<String> {
        lock(&self.state).sessions.get(session).and_then(|s| s.url.clone())
    }

    pub fn is_headless(&self, session: usize) -> Option<bool> {
        lock(&self.state).sessions.get(session).map(|s| s.headless)
    }
}

/// One mock page session
pub struct MockBrowser {
    state: Shared,
    id: usize,
    viewport: Viewport,
    headless: bool,
    events_tx: UnboundedSender<BrowserEvent>,
    events_rx: Option<UnboundedReceiver<BrowserEvent>>,
}

impl MockBrowser {
    fn with_session<T>(
        &self,
        input: Option<RecordedInput>,
        f: impl FnOnce(&mut SessionState, &UnboundedSender<BrowserEvent>) -> BrowserResult<T>,
    ) -> BrowserResult<T> {
        let mut state = lock(&self.state);
        let session = state.sessions.get_mut(self.id).ok_or(BrowserError::Closed)?;
        if session.closed {
            return Err(BrowserError::Closed);
        }
        if let Some(input) = input {
            session.inputs.push(input);
        }
        f(session, &self.events_tx)
    }

    fn load(&self, url: &str, input: RecordedInput) -> BrowserResult<()> {
        let template = lock(&self.state).sites.get(url).cloned();
        self.with_session(Some(input), |session, events| {
            let mut page = template.ok_or_else(|| BrowserError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            })?;
            page.loaded_at = Instant::now();
            let on_load = page.on_load.clone();
            page.apply(&on_load, events);
            session.url = Some(url.to_string());
            session.page = page;
            Ok(())
        })
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        debug!(session = self.id, url, "mock goto");
        self.load(url, RecordedInput::Goto(url.to_string()))
    }

    async fn reload(&mut self, ignore_cache: bool) -> BrowserResult<()> {
        let url = self
            .with_session(None, |session, _| Ok(session.url.clone()))?
            .unwrap_or_else(|| "about:blank".to_string());
        self.load(&url, RecordedInput::Reload { ignore_cache })
    }

    async fn evaluate(&mut self, expression: &str) -> BrowserResult<Value> {
        self.with_session(None, |session, _| {
            session
                .page
                .eval_results
                .get(expression)
                .cloned()
                .ok_or_else(|| {
                    BrowserError::Evaluation(format!("mock page cannot evaluate '{expression}'"))
                })
        })
    }

    async fn run_script(&mut self, script: &PageScript) -> BrowserResult<Value> {
        self.with_session(Some(RecordedInput::Script(script.clone())), |session, _| {
            let page = &mut session.page;
            let result = match script {
                PageScript::BoundingBox { selector } => match page.find(selector) {
                    Some(el) => {
                        let r = page.viewport_rect(el);
                        json!({"x": r.x, "y": r.y, "width": r.width, "height": r.height})
                    }
                    None => Value::Null,
                },
                PageScript::InnerText { selector } => {
                    page.text(selector).map(Value::String).unwrap_or(Value::Null)
                }
                PageScript::ScrollBy {
                    selector: None,
                    dx,
                    dy,
                } => {
                    page.scroll.0 = (page.scroll.0 + dx).max(0.0);
                    page.scroll.1 = (page.scroll.1 + dy).max(0.0);
                    Value::Bool(true)
                }
                PageScript::ScrollBy {
                    selector: Some(selector),
                    dx,
                    dy,
                } => match page.find_mut(selector) {
                    Some(el) => {
                        el.scroll.0 = (el.scroll.0 + dx).max(0.0);
                        el.scroll.1 = (el.scroll.1 + dy).max(0.0);
                        Value::Bool(true)
                    }
                    None => Value::Bool(false),
                },
                PageScript::ScrollIntoView { selector } => match page.find(selector) {
                    Some(el) => {
                        page.scroll.1 = el.rect.y;
                        Value::Bool(true)
                    }
                    None => Value::Bool(false),
                },
                PageScript::SelectOption { selector, nth } => match page.find_mut(selector) {
                    Some(el) if *nth >= 1 && (*nth as usize) <= el.options.len() => {
                        el.selected = Some(*nth as usize - 1);
                        Value::Bool(true)
                    }
                    _ => Value::Bool(false),
                },
            };
            Ok(result)
        })
    }

    async fn element_geometry(&mut self, selector: &str) -> BrowserResult<BoxModel> {
        self.with_session(None, |session, _| {
            let page = &session.page;
            page.find(selector)
                .map(|el| page.viewport_rect(el))
                .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))
        })
    }

    async fn dispatch_mouse(&mut self, event: MouseEvent) -> BrowserResult<()> {
        self.with_session(Some(RecordedInput::Mouse(event)), |session, events| {
            let page = &mut session.page;
            let target = page.hit(event.x, event.y);
            match event.kind {
                MouseEventKind::Pressed => {
                    page.pressed = target;
                    page.focused = target;
                }
                MouseEventKind::Released => {
                    let pressed = page.pressed.take();
                    if target.is_some() && target == pressed {
                        let effects = page.element_effects(target, |e| &e.on_click);
                        page.apply(&effects, events);
                    }
                }
                MouseEventKind::Moved => {
                    if target != page.hovered {
                        page.hovered = target;
                        let effects = page.element_effects(target, |e| &e.on_hover);
                        page.apply(&effects, events);
                    }
                }
            }
            Ok(())
        })
    }

    async fn dispatch_key(&mut self, event: KeyEvent) -> BrowserResult<()> {
        self.with_session(Some(RecordedInput::Key(event.clone())), |session, events| {
            let page = &mut session.page;
            match (event.kind, event.key_code) {
                (KeyEventKind::RawKeyDown, Some(13)) => {
                    let effects = page.element_effects(page.focused, |e| &e.on_enter);
                    page.apply(&effects, events);
                }
                (KeyEventKind::RawKeyDown, Some(9)) => {
                    let len = page.elements.len();
                    page.focused = match page.focused {
                        Some(i) if len > 0 => Some((i + 1) % len),
                        _ if len > 0 => Some(0),
                        _ => None,
                    };
                }
                (KeyEventKind::Char, _) => {
                    let text = event.text.as_deref().unwrap_or("");
                    if text != "\r" && text != "\t" {
                        if let Some(el) = page.focused.and_then(|i| page.elements.get_mut(i)) {
                            el.value.push_str(text);
                        }
                    }
                }
                _ => {}
            }
            Ok(())
        })
    }

    async fn capture_png(&mut self) -> BrowserResult<Vec<u8>> {
        let viewport = self.viewport;
        let canvas = self.with_session(Some(RecordedInput::Capture), |session, _| {
            Ok(session.page.render(viewport))
        })?;
        canvas.to_png()
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<BrowserEvent>> {
        self.events_rx.take()
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn is_headless(&self) -> bool {
        self.headless
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if let Some(session) = lock(&self.state).sessions.get_mut(self.id) {
            session.closed = true;
        }
        debug!(session = self.id, "mock browser closed");
        Ok(())
    }
}
