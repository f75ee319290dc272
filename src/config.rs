//! Configuration management with environment variable support.
//!
//! Every tunable default of the runner lives here. Values are read from the
//! environment once and cached; library callers override them per run through
//! [`crate::runner::RunOptions`].
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `VBOT_IMGDIR` | Root directory for screenshot folders | `./vbot` |
//! | `VBOT_MISMATCH_THRESHOLD` | Highest mismatch fraction that still passes | `0` |
//! | `VBOT_WAIT_TIMEOUT` | Default `waitTimeout` of an action | `5000ms` |
//! | `VBOT_ANIMATION_TIMEOUT` | Upper bound for a single animation wait | `30s` |
//! | `VBOT_GOTO_TIMEOUT` | Page load timeout | `30s` |
//! | `VBOT_CHROME_PATH` | Chrome/Chromium executable | auto-detected |
//!
//! Durations accept a plain number of milliseconds, or a number suffixed with
//! `ms` or `s`.
//!
//! # Example
//!
//! ```bash
//! export VBOT_IMGDIR="/var/tmp/vbot"
//! export VBOT_MISMATCH_THRESHOLD=0.02
//! export VBOT_ANIMATION_TIMEOUT=10s
//! ```

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default screenshot root directory
pub const DEFAULT_IMGDIR: &str = "./vbot";

/// Default mismatch threshold (exact match required)
pub const DEFAULT_MISMATCH_THRESHOLD: f64 = 0.0;

/// Default per-action element wait (milliseconds)
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5000;

/// Default upper bound for one animation wait (milliseconds)
pub const DEFAULT_ANIMATION_TIMEOUT_MS: u64 = 30_000;

/// Default page load timeout (milliseconds)
pub const DEFAULT_GOTO_TIMEOUT_MS: u64 = 30_000;

/// Default viewport width (pixels)
pub const DEFAULT_VIEW_WIDTH: u32 = 375;

/// Default viewport height (pixels)
pub const DEFAULT_VIEW_HEIGHT: u32 = 677;

/// Poll interval while waiting for an element
pub const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll interval while waiting for innerText to match
pub const TEXT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll interval while waiting for animations to finish
pub const ANIMATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settle time after a forced reload
pub const RELOAD_SETTLE: Duration = Duration::from_millis(300);

/// Pause between typed characters
pub const TYPING_PAUSE: Duration = Duration::from_millis(20);

/// Pause between the two phases of a move action
pub const MOVE_PHASE_PAUSE: Duration = Duration::from_millis(1000);

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the screenshot root directory
pub const ENV_IMGDIR: &str = "VBOT_IMGDIR";

/// Environment variable for the mismatch threshold
pub const ENV_MISMATCH_THRESHOLD: &str = "VBOT_MISMATCH_THRESHOLD";

/// Environment variable for the default element wait
pub const ENV_WAIT_TIMEOUT: &str = "VBOT_WAIT_TIMEOUT";

/// Environment variable for the animation wait bound
pub const ENV_ANIMATION_TIMEOUT: &str = "VBOT_ANIMATION_TIMEOUT";

/// Environment variable for the page load timeout
pub const ENV_GOTO_TIMEOUT: &str = "VBOT_GOTO_TIMEOUT";

/// Environment variable for the browser executable
pub const ENV_CHROME_PATH: &str = "VBOT_CHROME_PATH";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Output and verdict settings
    pub run: RunSettings,
    /// Wait bounds
    pub timeouts: TimeoutSettings,
    /// Browser process settings
    pub browser: BrowserSettings,
}

/// Where screenshots go and how they are judged
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub imgdir: String,
    pub mismatch_threshold: f64,
}

/// Bounds for every suspension point of a run
#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    /// Default `waitTimeout` for actions that omit it
    pub wait: Duration,
    /// Upper bound for a single animation wait
    pub animation: Duration,
    /// Page load bound for `goto`
    pub goto: Duration,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub chrome_path: Option<String>,
    pub view_width: u32,
    pub view_height: u32,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            run: RunSettings::from_env(),
            timeouts: TimeoutSettings::from_env(),
            browser: BrowserSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            run: RunSettings::defaults(),
            timeouts: TimeoutSettings::defaults(),
            browser: BrowserSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            imgdir: env::var(ENV_IMGDIR).unwrap_or_else(|_| DEFAULT_IMGDIR.to_string()),
            mismatch_threshold: env::var(ENV_MISMATCH_THRESHOLD)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|t| (0.0..=1.0).contains(t))
                .unwrap_or(DEFAULT_MISMATCH_THRESHOLD),
        }
    }

    pub fn defaults() -> Self {
        Self {
            imgdir: DEFAULT_IMGDIR.to_string(),
            mismatch_threshold: DEFAULT_MISMATCH_THRESHOLD,
        }
    }
}

impl TimeoutSettings {
    pub fn from_env() -> Self {
        let read = |name: &str, default_ms: u64| {
            env::var(name)
                .ok()
                .and_then(|s| parse_duration(&s))
                .unwrap_or(Duration::from_millis(default_ms))
        };
        Self {
            wait: read(ENV_WAIT_TIMEOUT, DEFAULT_WAIT_TIMEOUT_MS),
            animation: read(ENV_ANIMATION_TIMEOUT, DEFAULT_ANIMATION_TIMEOUT_MS),
            goto: read(ENV_GOTO_TIMEOUT, DEFAULT_GOTO_TIMEOUT_MS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            wait: Duration::from_millis(DEFAULT_WAIT_TIMEOUT_MS),
            animation: Duration::from_millis(DEFAULT_ANIMATION_TIMEOUT_MS),
            goto: Duration::from_millis(DEFAULT_GOTO_TIMEOUT_MS),
        }
    }
}

impl BrowserSettings {
    pub fn from_env() -> Self {
        Self {
            chrome_path: env::var(ENV_CHROME_PATH).ok().filter(|p| !p.is_empty()),
            view_width: DEFAULT_VIEW_WIDTH,
            view_height: DEFAULT_VIEW_HEIGHT,
        }
    }

    pub fn defaults() -> Self {
        Self {
            chrome_path: None,
            view_width: DEFAULT_VIEW_WIDTH,
            view_height: DEFAULT_VIEW_HEIGHT,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a duration string: "250" and "250ms" are milliseconds, "30s" is seconds
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim().to_lowercase();
    if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse().ok().map(Duration::from_millis)
    } else if let Some(secs) = value.strip_suffix('s') {
        secs.trim()
            .parse::<f64>()
            .ok()
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
    } else {
        value.parse().ok().map(Duration::from_millis)
    }
}

/// Get the default screenshot root (convenience function)
pub fn imgdir() -> String {
    get().run.imgdir.clone()
}

/// Get the default per-action element wait (convenience function)
pub fn default_wait_timeout() -> Duration {
    get().timeouts.wait
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration(" 1.5s "), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("-3s"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.run.imgdir, DEFAULT_IMGDIR);
        assert_eq!(config.run.mismatch_threshold, 0.0);
        assert_eq!(config.timeouts.wait, Duration::from_millis(5000));
        assert_eq!(config.timeouts.animation, Duration::from_secs(30));
        assert_eq!(config.browser.chrome_path, None);
        assert_eq!((config.browser.view_width, config.browser.view_height), (375, 677));
    }
}
