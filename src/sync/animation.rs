//! Animation window tracking.
//!
//! The synchronizer merges overlapping animation-started notifications into
//! one window and answers whether that window has elapsed. It does no I/O;
//! [`super::pump::EventPump`] feeds it and performs the actual wait.

use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimationState {
    #[default]
    Idle,
    /// Animations started at `start` and are expected to run for `expected`
    Tracking { start: Instant, expected: Duration },
}

/// Animations were still running when the wait bound ran out
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("animations still running after {}ms", .waited.as_millis())]
pub struct AnimationTimeout {
    pub waited: Duration,
}

#[derive(Debug, Default)]
pub struct AnimationSynchronizer {
    state: AnimationState,
}

impl AnimationSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AnimationState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, AnimationState::Tracking { .. })
    }

    /// Record an animation that started at `at` and runs for `duration`.
    ///
    /// The first event opens the window. Later events only ever extend it.
    pub fn observe(&mut self, at: Instant, duration: Duration) {
        match self.state {
            AnimationState::Idle => {
                self.state = AnimationState::Tracking {
                    start: at,
                    expected: duration,
                };
            }
            AnimationState::Tracking { start, expected } => {
                let end = at.saturating_duration_since(start) + duration;
                if end > expected {
                    self.state = AnimationState::Tracking { start, expected: end };
                }
            }
        }
    }

    pub fn is_elapsed(&self, now: Instant) -> bool {
        match self.state {
            AnimationState::Idle => true,
            AnimationState::Tracking { start, expected } => {
                now.saturating_duration_since(start) >= expected
            }
        }
    }

    /// Time left until the current window ends
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.state {
            AnimationState::Idle => Duration::ZERO,
            AnimationState::Tracking { start, expected } => {
                expected.saturating_sub(now.saturating_duration_since(start))
            }
        }
    }

    pub fn clear(&mut self) {
        self.state = AnimationState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_idle_is_always_elapsed() {
        let sync = AnimationSynchronizer::new();
        assert!(sync.is_elapsed(Instant::now()));
        assert_eq!(sync.remaining(Instant::now()), Duration::ZERO);
        assert!(!sync.is_tracking());
    }

    #[test]
    fn test_first_event_opens_window() {
        let t0 = Instant::now();
        let mut sync = AnimationSynchronizer::new();
        sync.observe(t0, ms(300));
        assert_eq!(
            sync.state(),
            AnimationState::Tracking {
                start: t0,
                expected: ms(300)
            }
        );
        assert!(!sync.is_elapsed(t0 + ms(299)));
        assert!(sync.is_elapsed(t0 + ms(300)));
    }

    #[test]
    fn test_later_event_extends_window() {
        let t0 = Instant::now();
        let mut sync = AnimationSynchronizer::new();
        sync.observe(t0, ms(300));
        sync.observe(t0 + ms(200), ms(400));
        assert_eq!(sync.remaining(t0), ms(600));
        assert!(!sync.is_elapsed(t0 + ms(599)));
        assert!(sync.is_elapsed(t0 + ms(600)));
    }

    #[test]
    fn test_shorter_event_never_shrinks_window() {
        let t0 = Instant::now();
        let mut sync = AnimationSynchronizer::new();
        sync.observe(t0, ms(1000));
        sync.observe(t0 + ms(100), ms(50));
        assert_eq!(
            sync.state(),
            AnimationState::Tracking {
                start: t0,
                expected: ms(1000)
            }
        );
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let t0 = Instant::now();
        let mut sync = AnimationSynchronizer::new();
        sync.observe(t0, ms(1000));
        sync.clear();
        assert_eq!(sync.state(), AnimationState::Idle);
        assert!(sync.is_elapsed(t0));
    }
}
