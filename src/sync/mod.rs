//! Waiting on the page: bounded polling and animation settling.

pub mod animation;
pub mod poll;
pub mod pump;

pub use animation::{AnimationState, AnimationSynchronizer, AnimationTimeout};
pub use poll::{PollError, Probe, poll_until};
pub use pump::{ConsoleMessage, EventPump, NetworkFailure};
