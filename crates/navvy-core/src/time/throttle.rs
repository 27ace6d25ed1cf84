//! Throttle: cap how often a function fires regardless of call rate.
//!
//! ```text
//!   calls:     a b c       d
//!   leading:   X . .       X    (gate closes for the window after a fire)
//!   trailing:  X . .  X         (latest args fire at the window's end)
//! ```
//!
//! Unlike debounce, the timer here does not restart on every call: a
//! burst produces at most one leading and one trailing invocation per
//! window. Calls are forwarded to a worker task over an unbounded
//! channel, so [`Throttle::call`] never blocks.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::TimerHandle;

/// Handle to a throttled function. Cheap to clone; all clones feed the
/// same worker.
#[derive(Clone)]
pub struct Throttle<T> {
    tx: mpsc::UnboundedSender<T>,
    handle: TimerHandle,
}

impl<T: Send + 'static> Throttle<T> {
    /// Forward a call, subject to the throttle policy. Calls after
    /// [`close`](Throttle::close) are dropped silently.
    pub fn call(&self, args: T) {
        if self.handle.is_closed() {
            return;
        }
        let _ = self.tx.send(args);
    }

    /// Stop throttling. Idempotent; cancels a pending trailing
    /// invocation and drops all further calls.
    pub fn close(&self) {
        self.handle.close();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl<T> std::fmt::Debug for Throttle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

/// Leading-edge throttle: a call while the gate is open invokes `f`
/// immediately and closes the gate for `window`; calls while the gate is
/// closed are dropped.
pub fn throttle_leading<T, F>(window: Duration, f: F) -> Throttle<T>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    tokio::spawn(run_leading(rx, token.clone(), window, f));
    Throttle {
        tx,
        handle: TimerHandle::new(token),
    }
}

/// Trailing-edge throttle: calls while the gate is closed buffer the
/// latest arguments, and one invocation fires `window` after the first
/// buffered call. With `rush_first`, a call while the gate is open also
/// fires immediately on the leading edge.
pub fn throttle_trailing<T, F>(window: Duration, rush_first: bool, f: F) -> Throttle<T>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    tokio::spawn(run_trailing(rx, token.clone(), window, rush_first, f));
    Throttle {
        tx,
        handle: TimerHandle::new(token),
    }
}

fn gate_open(gate_until: Option<Instant>, now: Instant) -> bool {
    gate_until.map_or(true, |g| now >= g)
}

async fn run_leading<T, F>(
    mut rx: mpsc::UnboundedReceiver<T>,
    token: CancellationToken,
    window: Duration,
    mut f: F,
) where
    F: FnMut(T),
{
    let mut gate_until: Option<Instant> = None;
    loop {
        let args = tokio::select! {
            _ = token.cancelled() => return,
            msg = rx.recv() => match msg {
                Some(args) => args,
                None => return,
            },
        };
        if token.is_cancelled() {
            return;
        }
        let now = Instant::now();
        if gate_open(gate_until, now) {
            f(args);
            gate_until = Some(now + window);
        }
    }
}

async fn run_trailing<T, F>(
    mut rx: mpsc::UnboundedReceiver<T>,
    token: CancellationToken,
    window: Duration,
    rush_first: bool,
    mut f: F,
) where
    F: FnMut(T),
{
    let mut pending: Option<T> = None;
    let mut deadline: Option<Instant> = None;
    let mut gate_until: Option<Instant> = None;
    let mut input_open = true;
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            msg = rx.recv(), if input_open => match msg {
                Some(args) => {
                    if token.is_cancelled() {
                        return;
                    }
                    let now = Instant::now();
                    if deadline.is_some() {
                        // Window already active: keep only the latest args.
                        pending = Some(args);
                    } else if rush_first && gate_open(gate_until, now) {
                        f(args);
                        gate_until = Some(now + window);
                    } else {
                        // First buffered call opens the active window.
                        pending = Some(args);
                        deadline = Some(now + window);
                    }
                }
                None => {
                    input_open = false;
                    if deadline.is_none() {
                        return;
                    }
                }
            },
            _ = wait_for(deadline), if deadline.is_some() => {
                if token.is_cancelled() {
                    return;
                }
                if let Some(args) = pending.take() {
                    let now = Instant::now();
                    f(args);
                    gate_until = Some(now + window);
                }
                deadline = None;
                if !input_open {
                    return;
                }
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(d) => sleep_until(d).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn recorder(start: Instant) -> (Arc<Mutex<Vec<(u64, u32)>>>, impl FnMut(u32) + Send + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let f = move |args: u32| {
            let at = start.elapsed().as_millis() as u64;
            sink.lock().unwrap().push((at, args));
        };
        (log, f)
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_drops_calls_until_gate_reopens() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let thr = throttle_leading(ms(50), f);

        thr.call(1); // fires, gate closes until t=50
        tokio::time::sleep(ms(10)).await;
        thr.call(2); // dropped
        tokio::time::sleep(ms(10)).await;
        thr.call(3); // dropped
        tokio::time::sleep(ms(40)).await;
        thr.call(4); // t=60, gate reopened
        tokio::time::sleep(ms(10)).await;

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (60, 4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_rush_reference_timeline() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let thr = throttle_trailing(ms(50), true, f);

        thr.call(1); // t=0: rush fire
        tokio::time::sleep(ms(10)).await;
        thr.call(2); // t=10: buffers, window ends at t=60
        tokio::time::sleep(ms(10)).await;
        thr.call(3); // t=20: replaces the buffered args
        tokio::time::sleep(ms(100)).await;

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (60, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_without_rush_fires_once_at_window_end() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let thr = throttle_trailing(ms(50), false, f);

        thr.call(1);
        tokio::time::sleep(ms(10)).await;
        thr.call(2);
        tokio::time::sleep(ms(10)).await;
        thr.call(3);
        tokio::time::sleep(ms(100)).await;

        // Window opened by the first call; later calls do not extend it.
        assert_eq!(*log.lock().unwrap(), vec![(50, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_fire_keeps_gate_closed_for_a_window() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let thr = throttle_trailing(ms(50), true, f);

        thr.call(1); // rush fire at t=0
        tokio::time::sleep(ms(10)).await;
        thr.call(2); // trailing fire at t=60
        tokio::time::sleep(ms(60)).await;
        thr.call(3); // t=70: gate closed until t=110, buffers
        tokio::time::sleep(ms(100)).await;

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (60, 2), (120, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rush_fires_again_once_idle() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let thr = throttle_trailing(ms(50), true, f);

        thr.call(1);
        tokio::time::sleep(ms(200)).await;
        thr.call(2); // long quiet spell, gate open again
        tokio::time::sleep(ms(10)).await;

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (200, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_trailing_fire() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let thr = throttle_trailing(ms(50), false, f);

        thr.call(1);
        tokio::time::sleep(ms(10)).await;
        thr.close();
        tokio::time::sleep(ms(100)).await;

        assert!(log.lock().unwrap().is_empty());
        assert!(thr.is_closed());
    }
}
