//! Chrome/Chromium sessions over the DevTools protocol.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::animation::{
    EnableParams as AnimationEnableParams, EventAnimationStarted,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent,
};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, ReloadParams};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::handler::viewport::Viewport as CdpViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    BoxModel, BrowserEvent, BrowserLauncher, BrowserSession, KeyEvent, KeyEventKind,
    LaunchOptions, MouseEvent, MouseEventKind, PageScript, Viewport,
};
use crate::error::{BrowserError, BrowserResult};

/// Starts one Chrome process per session, each with its own port and profile
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher;

impl ChromeLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, options: &LaunchOptions) -> BrowserResult<Box<dyn BrowserSession>> {
        let session = ChromeSession::launch(options).await?;
        Ok(Box::new(session))
    }
}

pub struct ChromeSession {
    browser: Browser,
    page: Page,
    viewport: Viewport,
    headless: bool,
    goto_timeout: Duration,
    events_rx: Option<UnboundedReceiver<BrowserEvent>>,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
    // Removed from disk when the session is dropped
    _profile: TempDir,
}

impl ChromeSession {
    pub async fn launch(options: &LaunchOptions) -> BrowserResult<Self> {
        let profile = tempfile::Builder::new().prefix("vbot-profile-").tempdir()?;
        let port = free_port()?;
        let Viewport { width, height } = options.viewport;

        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .viewport(CdpViewport {
                width,
                height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .port(port)
            .user_data_dir(profile.path())
            .request_timeout(options.goto_timeout);
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.chrome_path {
            builder = builder.chrome_executable(path);
        }
        if let Some(proxy) = &options.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let mut tasks = vec![tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "devtools handler error");
                }
            }
        })];

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tasks.extend(attach_listeners(&page, tx).await?);
        info!(port, headless = options.headless, "chrome launched");

        Ok(Self {
            browser,
            page,
            viewport: options.viewport,
            headless: options.headless,
            goto_timeout: options.goto_timeout,
            events_rx: Some(rx),
            tasks,
            closed: false,
            _profile: profile,
        })
    }

    fn ensure_open(&self) -> BrowserResult<()> {
        if self.closed {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }
}

fn protocol(err: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(err.to_string())
}

fn free_port() -> BrowserResult<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Forward animation, console and network events into one channel
async fn attach_listeners(
    page: &Page,
    tx: UnboundedSender<BrowserEvent>,
) -> BrowserResult<Vec<JoinHandle<()>>> {
    page.execute(AnimationEnableParams::default())
        .await
        .map_err(protocol)?;
    page.execute(NetworkEnableParams::default())
        .await
        .map_err(protocol)?;

    let mut animations = page
        .event_listener::<EventAnimationStarted>()
        .await
        .map_err(protocol)?;
    let mut console = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(protocol)?;
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(protocol)?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(protocol)?;
    let mut failures = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(protocol)?;

    let animation_tx = tx.clone();
    let animation_task = tokio::spawn(async move {
        while let Some(event) = animations.next().await {
            let ms = event
                .animation
                .source
                .as_ref()
                .map(|source| source.delay + source.duration)
                .unwrap_or(0.0);
            let duration = if ms.is_finite() && ms > 0.0 {
                Duration::from_secs_f64(ms / 1000.0)
            } else {
                Duration::ZERO
            };
            let started = BrowserEvent::AnimationStarted {
                at: Instant::now(),
                duration,
            };
            if animation_tx.send(started).is_err() {
                break;
            }
        }
    });

    let console_tx = tx.clone();
    let console_task = tokio::spawn(async move {
        while let Some(event) = console.next().await {
            let text = event
                .args
                .iter()
                .map(|arg| match &arg.value {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => arg.description.clone().unwrap_or_default(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            let level = format!("{:?}", event.r#type).to_lowercase();
            if console_tx.send(BrowserEvent::Console { level, text }).is_err() {
                break;
            }
        }
    });

    let network_task = tokio::spawn(async move {
        let mut pending: HashMap<String, (String, String)> = HashMap::new();
        loop {
            tokio::select! {
                Some(req) = requests.next() => {
                    pending.insert(
                        req.request_id.inner().clone(),
                        (req.request.url.clone(), req.request.method.clone()),
                    );
                }
                Some(done) = finished.next() => {
                    pending.remove(done.request_id.inner());
                }
                Some(failed) = failures.next() => {
                    let (url, method) = pending
                        .remove(failed.request_id.inner())
                        .unwrap_or_default();
                    let event = BrowserEvent::NetworkError {
                        url,
                        method,
                        error: failed.error_text.clone(),
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    Ok(vec![animation_task, console_task, network_task])
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn goto(&mut self, url: &str) -> BrowserResult<()> {
        self.ensure_open()?;
        debug!(url, "navigating");
        match tokio::time::timeout(self.goto_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(BrowserError::Navigation {
                url: url.to_string(),
                reason: format!("page load timed out after {}ms", self.goto_timeout.as_millis()),
            }),
        }
    }

    async fn reload(&mut self, ignore_cache: bool) -> BrowserResult<()> {
        self.ensure_open()?;
        let params = ReloadParams::builder().ignore_cache(ignore_cache).build();
        self.page.execute(params).await.map_err(protocol)?;
        self.page.wait_for_navigation().await.map_err(protocol)?;
        Ok(())
    }

    async fn evaluate(&mut self, expression: &str) -> BrowserResult<Value> {
        self.ensure_open()?;
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn element_geometry(&mut self, selector: &str) -> BrowserResult<BoxModel> {
        let script = PageScript::BoundingBox {
            selector: selector.to_string(),
        };
        match self.run_script(&script).await? {
            Value::Null => Err(BrowserError::ElementNotFound(selector.to_string())),
            value => {
                serde_json::from_value(value).map_err(|e| BrowserError::Evaluation(e.to_string()))
            }
        }
    }

    async fn dispatch_mouse(&mut self, event: MouseEvent) -> BrowserResult<()> {
        self.ensure_open()?;
        let kind = match event.kind {
            MouseEventKind::Pressed => DispatchMouseEventType::MousePressed,
            MouseEventKind::Released => DispatchMouseEventType::MouseReleased,
            MouseEventKind::Moved => DispatchMouseEventType::MouseMoved,
        };
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind)
            .x(event.x)
            .y(event.y);
        if event.kind != MouseEventKind::Moved {
            builder = builder.button(MouseButton::Left).click_count(1);
        }
        let params = builder.build().map_err(BrowserError::Protocol)?;
        self.page.execute(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn dispatch_key(&mut self, event: KeyEvent) -> BrowserResult<()> {
        self.ensure_open()?;
        let kind = match event.kind {
            KeyEventKind::RawKeyDown => DispatchKeyEventType::RawKeyDown,
            KeyEventKind::Char => DispatchKeyEventType::Char,
            KeyEventKind::KeyUp => DispatchKeyEventType::KeyUp,
        };
        let mut builder = DispatchKeyEventParams::builder().r#type(kind);
        if let Some(text) = &event.text {
            builder = builder.text(text.clone()).unmodified_text(text.clone());
        }
        if let Some(code) = event.key_code {
            builder = builder.windows_virtual_key_code(code);
        }
        let params = builder.build().map_err(BrowserError::Protocol)?;
        self.page.execute(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn capture_png(&mut self) -> BrowserResult<Vec<u8>> {
        self.ensure_open()?;
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page.screenshot(params).await.map_err(protocol)
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
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let closed = self.browser.close().await.map_err(protocol);
        if let Err(err) = self.browser.wait().await {
            warn!(error = %err, "chrome did not exit cleanly");
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        closed.map(|_| ())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
