//! Timer utilities: one-shot and repeating timers plus call-rate shaping.
//!
//! Every utility hands back a [`TimerHandle`] (or a struct embedding one).
//! Closing the handle is idempotent, and once a close has been observed no
//! new invocation of the wrapped function begins. Each utility runs a
//! worker task on the ambient runtime and talks to it over channels, so
//! none of the entry points block the caller.

mod debounce;
mod throttle;

pub use debounce::{debounce_leading, debounce_trailing, Debounce};
pub use throttle::{throttle_leading, throttle_trailing, Throttle};

use std::ops::ControlFlow;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Cancellation handle shared by every timer utility. Cloning yields
/// another handle to the same timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stop the timer. Idempotent; no new invocation of the wrapped
    /// function begins once the close is observed.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Invoke `f` once after `delay`, then auto-close the handle.
///
/// Closing the handle before the delay elapses cancels the invocation.
pub fn set_timeout<F>(f: F, delay: Duration) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let token = CancellationToken::new();
    let worker = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = worker.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                if !worker.is_cancelled() {
                    f();
                }
                worker.cancel();
            }
        }
    });
    TimerHandle::new(token)
}

/// Invoke `f` every `delay` until it returns [`ControlFlow::Break`] or the
/// handle is closed. Ticks are spaced from the end of the previous
/// invocation; a slow callback does not cause catch-up bursts.
pub fn set_interval<F>(mut f: F, delay: Duration) -> TimerHandle
where
    F: FnMut() -> ControlFlow<()> + Send + 'static,
{
    let token = CancellationToken::new();
    let worker = token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = worker.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if worker.is_cancelled() {
                return;
            }
            if f().is_break() {
                worker.cancel();
                return;
            }
        }
    });
    TimerHandle::new(token)
}
