//! Bounded polling.
//!
//! Every wait in the runner is a [`Probe`] driven by [`poll_until`]. The
//! timeout is measured from the start of the wait. The sleep before the last
//! probe is clipped to the time that remains, and one probe always follows
//! it, so a wait gives up no earlier than `timeout` and no later than
//! `timeout + interval`.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

/// One readiness check
#[async_trait]
pub trait Probe: Send {
    type Output: Send;
    type Error: Send;

    /// `Ok(Some(_))` when ready, `Ok(None)` to retry, `Err(_)` to give up
    async fn probe(&mut self) -> Result<Option<Self::Output>, Self::Error>;
}

#[derive(Debug, Error, PartialEq)]
pub enum PollError<E> {
    #[error("timed out after {}ms", .elapsed.as_millis())]
    Timeout { elapsed: Duration },

    #[error("{0}")]
    Failed(E),
}

pub async fn poll_until<P>(
    probe: &mut P,
    interval: Duration,
    timeout: Duration,
) -> Result<P::Output, PollError<P::Error>>
where
    P: Probe + ?Sized,
{
    let start = Instant::now();
    loop {
        if let Some(ready) = probe.probe().await.map_err(PollError::Failed)? {
            return Ok(ready);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(PollError::Timeout { elapsed });
        }
        sleep(interval.min(timeout - elapsed)).await;
    }
}
