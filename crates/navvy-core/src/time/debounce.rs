//! Debounce: collapse a burst of calls into a single invocation.
//!
//! ```text
//!   leading:   X . . . . . . X        (fire the first of each burst)
//!   calls:     a b c   d e     f
//!   trailing:  . . . X . . X          (fire once the burst goes quiet)
//! ```
//!
//! Calls are forwarded to a worker task over an unbounded channel, so
//! [`Debounce::call`] never blocks the caller. The wrapped function runs
//! on the worker task.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::TimerHandle;

/// Handle to a debounced function. Cheap to clone; all clones feed the
/// same worker. Dropping every handle lets an already-armed trailing
/// invocation fire; [`close`](Debounce::close) cancels it.
#[derive(Clone)]
pub struct Debounce<T> {
    tx: mpsc::UnboundedSender<T>,
    handle: TimerHandle,
}

impl<T: Send + 'static> Debounce<T> {
    /// Forward a call, subject to the debounce policy. Calls after
    /// [`close`](Debounce::close) are dropped silently.
    pub fn call(&self, args: T) {
        if self.handle.is_closed() {
            return;
        }
        let _ = self.tx.send(args);
    }

    /// Stop debouncing. Idempotent; cancels a pending trailing
    /// invocation and drops all further calls.
    pub fn close(&self) {
        self.handle.close();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl<T> std::fmt::Debug for Debounce<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debounce")
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

/// Leading-edge debounce: the first call of a burst invokes `f`
/// immediately; calls within `window` of the previous call are
/// suppressed. The quiet window slides on every call, fired or not.
pub fn debounce_leading<T, F>(window: Duration, f: F) -> Debounce<T>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    tokio::spawn(run_leading(rx, token.clone(), window, f));
    Debounce {
        tx,
        handle: TimerHandle::new(token),
    }
}

/// Trailing-edge debounce: buffers the latest call's arguments and
/// invokes `f` with them after `window` of inactivity. With `rush_first`,
/// a call arriving while no burst is in progress also fires immediately
/// on the leading edge.
pub fn debounce_trailing<T, F>(window: Duration, rush_first: bool, f: F) -> Debounce<T>
where
    T: Send + 'static,
    F: FnMut(T) + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let token = CancellationToken::new();
    tokio::spawn(run_trailing(rx, token.clone(), window, rush_first, f));
    Debounce {
        tx,
        handle: TimerHandle::new(token),
    }
}

async fn run_leading<T, F>(
    mut rx: mpsc::UnboundedReceiver<T>,
    token: CancellationToken,
    window: Duration,
    mut f: F,
) where
    F: FnMut(T),
{
    let mut last_seen: Option<Instant> = None;
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
        let quiet = last_seen.map_or(true, |t| now.duration_since(t) >= window);
        last_seen = Some(now);
        if quiet {
            f(args);
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
                    if rush_first && pending.is_none() && deadline.is_none() {
                        f(args);
                    } else {
                        pending = Some(args);
                    }
                    // Quiet-window timer restarts on every call.
                    deadline = Some(now + window);
                }
                None => {
                    // All handles dropped. Let an armed trailing fire
                    // happen, then wind down.
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
                    f(args);
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

    /// Records `(elapsed_ms, args)` for every invocation.
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
    async fn test_leading_collapses_burst_to_first_call() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_leading(ms(50), f);

        for i in 0..5u32 {
            deb.call(i);
            tokio::time::sleep(ms(2)).await;
        }
        tokio::time::sleep(ms(100)).await;

        assert_eq!(*log.lock().unwrap(), vec![(0, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_fires_again_after_quiet_window() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_leading(ms(50), f);

        deb.call(1);
        tokio::time::sleep(ms(60)).await;
        deb.call(2);
        tokio::time::sleep(ms(10)).await;

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (60, 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_window_slides_on_suppressed_calls() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_leading(ms(50), f);

        deb.call(1); // fires
        tokio::time::sleep(ms(40)).await;
        deb.call(2); // suppressed, slides the window
        tokio::time::sleep(ms(40)).await;
        deb.call(3); // still within 50ms of the t=40 call
        tokio::time::sleep(ms(60)).await;
        deb.call(4); // quiet again
        tokio::time::sleep(ms(10)).await;

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (140, 4)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_fires_latest_args_after_quiet() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_trailing(ms(50), false, f);

        deb.call(1);
        tokio::time::sleep(ms(10)).await;
        deb.call(2);
        tokio::time::sleep(ms(10)).await;
        deb.call(3);
        tokio::time::sleep(ms(100)).await;

        // Quiet window ends 50ms after the last call.
        assert_eq!(*log.lock().unwrap(), vec![(70, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_rush_fires_leading_edge() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_trailing(ms(50), true, f);

        deb.call(7);
        tokio::time::sleep(ms(100)).await;

        // Lone call fires once, immediately, with no trailing echo.
        assert_eq!(*log.lock().unwrap(), vec![(0, 7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_rush_then_burst_fires_both_edges() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_trailing(ms(50), true, f);

        deb.call(1);
        tokio::time::sleep(ms(10)).await;
        deb.call(2);
        tokio::time::sleep(ms(10)).await;
        deb.call(3);
        tokio::time::sleep(ms(100)).await;

        assert_eq!(*log.lock().unwrap(), vec![(0, 1), (70, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_trailing_fire() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_trailing(ms(50), false, f);

        deb.call(1);
        tokio::time::sleep(ms(10)).await;
        deb.close();
        tokio::time::sleep(ms(100)).await;

        assert!(log.lock().unwrap().is_empty());
        assert!(deb.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_after_close_is_dropped() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_leading(ms(50), f);

        deb.close();
        deb.call(1);
        tokio::time::sleep(ms(100)).await;

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_lets_armed_fire_happen() {
        let start = Instant::now();
        let (log, f) = recorder(start);
        let deb = debounce_trailing(ms(50), false, f);

        deb.call(9);
        tokio::time::sleep(ms(1)).await;
        drop(deb);
        tokio::time::sleep(ms(100)).await;

        assert_eq!(*log.lock().unwrap(), vec![(50, 9)]);
    }
}
