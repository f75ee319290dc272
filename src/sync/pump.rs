//! Draining the browser event stream.
//!
//! The pump owns a session's event receiver. Animation notifications feed the
//! [`AnimationSynchronizer`]; console messages and network failures are kept
//! for the scenario report and forwarded to the event sink as they arrive.

use async_trait::async_trait;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::animation::{AnimationSynchronizer, AnimationTimeout};
use super::poll::{PollError, Probe, poll_until};
use crate::browser::BrowserEvent;
use crate::config::ANIMATION_POLL_INTERVAL;
use crate::events::{EventSink, RunEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkFailure {
    pub url: String,
    pub method: String,
    pub error: String,
}

/// Per-scenario event state, owned by the runner
#[derive(Debug, Default)]
pub struct EventPump {
    rx: Option<UnboundedReceiver<BrowserEvent>>,
    animations: AnimationSynchronizer,
    console: Vec<ConsoleMessage>,
    network_errors: Vec<NetworkFailure>,
}

impl EventPump {
    pub fn new(rx: Option<UnboundedReceiver<BrowserEvent>>) -> Self {
        Self {
            rx,
            ..Self::default()
        }
    }

    pub fn animations(&self) -> &AnimationSynchronizer {
        &self.animations
    }

    pub fn console(&self) -> &[ConsoleMessage] {
        &self.console
    }

    pub fn network_errors(&self) -> &[NetworkFailure] {
        &self.network_errors
    }

    /// Console messages and network failures collected so far
    pub fn into_logs(self) -> (Vec<ConsoleMessage>, Vec<NetworkFailure>) {
        (self.console, self.network_errors)
    }

    /// Handle every event already queued, without waiting
    pub fn drain(&mut self, scenario: &str, sink: &mut dyn EventSink) {
        let Some(rx) = self.rx.as_mut() else {
            return;
        };
        loop {
            let event = match rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.rx = None;
                    break;
                }
            };
            match event {
                BrowserEvent::AnimationStarted { at, duration } => {
                    debug!(
                        scenario,
                        duration_ms = duration.as_millis() as u64,
                        "animation started"
                    );
                    self.animations.observe(at, duration);
                }
                BrowserEvent::Console { level, text } => {
                    self.console.push(ConsoleMessage {
                        level: level.clone(),
                        text: text.clone(),
                    });
                    sink.emit(RunEvent::Console {
                        scenario: scenario.to_string(),
                        level,
                        text,
                    });
                }
                BrowserEvent::NetworkError { url, method, error } => {
                    self.network_errors.push(NetworkFailure {
                        url: url.clone(),
                        method: method.clone(),
                        error: error.clone(),
                    });
                    sink.emit(RunEvent::NetworkError {
                        scenario: scenario.to_string(),
                        url,
                        method,
                        error,
                    });
                }
            }
        }
    }

    /// Wait until every known animation window has elapsed.
    ///
    /// Returns at once when nothing is animating. New notifications that
    /// arrive while waiting extend the window. The window is cleared on
    /// return, including when `timeout` runs out.
    pub async fn settle(
        &mut self,
        scenario: &str,
        sink: &mut dyn EventSink,
        timeout: Duration,
    ) -> Result<(), AnimationTimeout> {
        self.drain(scenario, sink);
        if !self.animations.is_tracking() {
            return Ok(());
        }

        let mut probe = Settled {
            pump: self,
            scenario,
            sink,
        };
        let result = poll_until(&mut probe, ANIMATION_POLL_INTERVAL, timeout).await;
        self.animations.clear();

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Timeout { elapsed }) => {
                let err = AnimationTimeout { waited: elapsed };
                warn!(scenario, "{err}; continuing");
                Err(err)
            }
            Err(PollError::Failed(never)) => match never {},
        }
    }
}

struct Settled<'a> {
    pump: &'a mut EventPump,
    scenario: &'a str,
    sink: &'a mut dyn EventSink,
}

#[async_trait]
impl<'a> Probe for Settled<'a> {
    type Output = ();
    type Error = Infallible;

    async fn probe(&mut self) -> Result<Option<()>, Infallible> {
        self.pump.drain(self.scenario, self.sink);
        Ok(self.pump.animations.is_elapsed(Instant::now()).then_some(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_idle_returns_immediately() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut pump = EventPump::new(Some(rx));
        let mut sink: Vec<RunEvent> = Vec::new();
        let start = Instant::now();
        pump.settle("s", &mut sink, ms(1000)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_for_window() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pump = EventPump::new(Some(rx));
        let mut sink: Vec<RunEvent> = Vec::new();
        let start = Instant::now();
        tx.send(BrowserEvent::AnimationStarted {
            at: start,
            duration: ms(250),
        })
        .unwrap();

        pump.settle("s", &mut sink, ms(10_000)).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= ms(250));
        assert!(waited <= ms(250) + ANIMATION_POLL_INTERVAL);
        assert!(!pump.animations().is_tracking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_timeout_clears_window() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pump = EventPump::new(Some(rx));
        let mut sink: Vec<RunEvent> = Vec::new();
        tx.send(BrowserEvent::AnimationStarted {
            at: Instant::now(),
            duration: Duration::from_secs(3600),
        })
        .unwrap();

        let err = pump.settle("s", &mut sink, ms(500)).await.unwrap_err();
        assert!(err.waited >= ms(500));
        assert!(!pump.animations().is_tracking());
    }

    #[tokio::test]
    async fn test_drain_forwards_console_and_network() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pump = EventPump::new(Some(rx));
        let mut sink: Vec<RunEvent> = Vec::new();
        tx.send(BrowserEvent::Console {
            level: "error".to_string(),
            text: "boom".to_string(),
        })
        .unwrap();
        tx.send(BrowserEvent::NetworkError {
            url: "http://x/api".to_string(),
            method: "GET".to_string(),
            error: "net::ERR_FAILED".to_string(),
        })
        .unwrap();
        drop(tx);

        pump.drain("s", &mut sink);
        assert_eq!(sink.len(), 2);
        assert_eq!(pump.console().len(), 1);
        assert_eq!(pump.network_errors()[0].method, "GET");

        // disconnected channel is dropped quietly
        pump.drain("s", &mut sink);
        assert_eq!(sink.len(), 2);
    }
}
