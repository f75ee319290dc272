//! Browser session abstraction.
//!
//! The runner only talks to a browser through [`BrowserSession`]. Two
//! implementations ship with the crate:
//! - [`chrome::ChromeLauncher`] drives Chrome/Chromium over the DevTools protocol
//! - [`mock::MockLauncher`] is an in-process page model for tests and demos

pub mod canvas;
pub mod chrome;
pub mod mock;
pub mod script;

use async_trait::async_trait;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::error::BrowserResult;
pub use script::PageScript;

/// Browser window size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Options for starting one isolated browser session
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub viewport: Viewport,
    /// `false` opens a visible window; screenshots are refused in that mode
    pub headless: bool,
    pub proxy: Option<String>,
    /// Bound for page loads
    pub goto_timeout: Duration,
    pub chrome_path: Option<PathBuf>,
}

impl LaunchOptions {
    pub fn new(viewport: Viewport) -> Self {
        let config = crate::config::get();
        Self {
            viewport,
            headless: true,
            proxy: None,
            goto_timeout: config.timeouts.goto,
            chrome_path: config.browser.chrome_path.as_ref().map(PathBuf::from),
        }
    }
}

/// Element bounding box relative to the viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxModel {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoxModel {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Pressed,
    Released,
    Moved,
}

/// Synthetic mouse input at viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseEvent {
    pub kind: MouseEventKind,
    pub x: f64,
    pub y: f64,
}

impl MouseEvent {
    pub fn new(kind: MouseEventKind, x: f64, y: f64) -> Self {
        Self { kind, x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    RawKeyDown,
    Char,
    KeyUp,
}

/// Synthetic keyboard input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub text: Option<String>,
    /// Windows virtual key code
    pub key_code: Option<i64>,
}

impl KeyEvent {
    /// A single typed character
    pub fn char(c: char) -> Self {
        Self {
            kind: KeyEventKind::Char,
            text: Some(c.to_string()),
            key_code: None,
        }
    }

    /// Full press of a key that produces `text`: rawKeyDown, char, keyUp
    pub fn press(key_code: i64, text: &str) -> [KeyEvent; 3] {
        [KeyEventKind::RawKeyDown, KeyEventKind::Char, KeyEventKind::KeyUp].map(|kind| KeyEvent {
            kind,
            text: Some(text.to_string()),
            key_code: Some(key_code),
        })
    }

    pub fn enter() -> [KeyEvent; 3] {
        Self::press(13, "\r")
    }

    pub fn tab() -> [KeyEvent; 3] {
        Self::press(9, "\t")
    }
}

/// Asynchronous notification from the page
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
    /// A CSS/JS animation started; `duration` includes its delay
    AnimationStarted { at: Instant, duration: Duration },
    Console { level: String, text: String },
    NetworkError {
        url: String,
        method: String,
        error: String,
    },
}

/// One open browser page
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and wait for the load; the error carries the URL
    async fn goto(&mut self, url: &str) -> BrowserResult<()>;

    async fn reload(&mut self, ignore_cache: bool) -> BrowserResult<()>;

    /// Evaluate a JavaScript expression and return its JSON value
    async fn evaluate(&mut self, expression: &str) -> BrowserResult<serde_json::Value>;

    /// Run one of the page helpers the executor needs
    async fn run_script(&mut self, script: &PageScript) -> BrowserResult<serde_json::Value> {
        self.evaluate(&script.to_js()).await
    }

    /// Bounding box of the first element matching `selector`.
    ///
    /// Returns [`crate::error::BrowserError::ElementNotFound`] while no
    /// rendered element matches.
    async fn element_geometry(&mut self, selector: &str) -> BrowserResult<BoxModel>;

    async fn dispatch_mouse(&mut self, event: MouseEvent) -> BrowserResult<()>;

    async fn dispatch_key(&mut self, event: KeyEvent) -> BrowserResult<()>;

    /// Raw PNG of the current viewport
    async fn capture_png(&mut self) -> BrowserResult<Vec<u8>>;

    /// Capture the viewport, rescale to `width` if given, and optionally write it to `path`
    async fn screenshot(
        &mut self,
        path: Option<&Path>,
        width: Option<u32>,
    ) -> BrowserResult<Vec<u8>> {
        let raw = self.capture_png().await?;
        let png = fit_width(raw, width)?;
        if let Some(path) = path {
            tokio::fs::write(path, &png).await?;
        }
        Ok(png)
    }

    /// Hand over the event stream; only the first call returns it
    fn take_events(&mut self) -> Option<UnboundedReceiver<BrowserEvent>>;

    fn viewport(&self) -> Viewport;

    fn is_headless(&self) -> bool;

    async fn close(&mut self) -> BrowserResult<()>;
}

/// Factory for isolated sessions, one per scenario
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> BrowserResult<Box<dyn BrowserSession>>;
}

/// Rescale a PNG to `width`, keeping the aspect ratio
pub fn fit_width(png: Vec<u8>, width: Option<u32>) -> BrowserResult<Vec<u8>> {
    let Some(width) = width.filter(|w| *w > 0) else {
        return Ok(png);
    };
    let img = image::load_from_memory(&png)?;
    if img.width() == width || img.width() == 0 {
        return Ok(png);
    }
    let height = ((img.height() as f64 * width as f64 / img.width() as f64).round() as u32).max(1);
    let resized = img.resize_exact(width, height, FilterType::Triangle);
    let mut bytes = Vec::new();
    resized.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(bytes)
}
