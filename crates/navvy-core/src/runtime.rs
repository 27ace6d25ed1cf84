//! Task runtime bridge: spawning, joining, and callback adoption.
//!
//! Tasks are plain tokio tasks with a label for diagnostics. Joining a
//! [`TaskHandle`] captures the task's failure instead of propagating it;
//! a failure nobody joins is reported through `tracing` rather than lost.
//!
//! [`trigger`] and the [`wrap`]/[`wrap_deferred`] helpers adopt
//! callback-style APIs into async control flow: hand the [`Trigger`] to
//! the callback, await the [`Fired`] end. Firing consumes the trigger, so
//! a suspended caller resumes at most once by construction.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

pub use tokio::task::yield_now;
pub use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task panicked; `message` is the panic payload when textual.
    #[error("task '{label}' panicked: {message}")]
    Panicked { label: String, message: String },
    /// The task was aborted before completing.
    #[error("task '{label}' was cancelled")]
    Cancelled { label: String },
    /// The matching [`Trigger`] was dropped without firing.
    #[error("trigger dropped before firing")]
    TriggerDropped,
}

/// Handle to a spawned task. Dropping it detaches the task; a detached
/// failure is logged by the supervisor instead of disappearing.
pub struct TaskHandle<T> {
    label: String,
    rx: oneshot::Receiver<Result<T, TaskError>>,
    abort: AbortHandle,
}

impl<T> TaskHandle<T> {
    /// Wait for the task and capture its outcome. Failures come back as
    /// values; re-raise at the call site with `?` when propagation is
    /// wanted.
    pub async fn join(self) -> Result<T, TaskError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            // Supervisor gone, which only happens at runtime teardown.
            Err(_) => Err(TaskError::Cancelled { label: self.label }),
        }
    }

    /// Request cancellation. The joiner observes [`TaskError::Cancelled`].
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("label", &self.label)
            .finish()
    }
}

/// Spawn `future` as an independent labelled task.
///
/// The caller keeps going immediately. A supervisor forwards the outcome
/// to whoever joins the handle; if the handle was dropped and the task
/// failed, the failure is logged at error level instead.
pub fn spawn<T, F>(label: impl Into<String>, future: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let label = label.into();
    let inner = tokio::spawn(future);
    let abort = inner.abort_handle();

    let (tx, rx) = oneshot::channel();
    let task = label.clone();
    tokio::spawn(async move {
        let outcome = match inner.await {
            Ok(value) => Ok(value),
            Err(err) => Err(join_failure(&task, err)),
        };
        if let Err(Err(failure)) = tx.send(outcome) {
            tracing::error!(target: "navvy::runtime", %task, "unobserved task failure: {failure}");
        }
    });

    TaskHandle { label, rx, abort }
}

fn join_failure(label: &str, err: tokio::task::JoinError) -> TaskError {
    if err.is_panic() {
        let message = match err.try_into_panic() {
            Ok(payload) => panic_text(payload.as_ref()),
            Err(_) => "unknown panic".to_string(),
        };
        TaskError::Panicked {
            label: label.to_string(),
            message,
        }
    } else {
        TaskError::Cancelled {
            label: label.to_string(),
        }
    }
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Firing end of a [`trigger`] pair. Consumed by [`fire`](Trigger::fire),
/// so it can resume the awaiting side at most once.
pub struct Trigger<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Trigger<T> {
    /// Resume the awaiting [`Fired`] with `value`. A fire after the
    /// awaiting side gave up is dropped silently.
    pub fn fire(self, value: T) {
        let _ = self.tx.send(value);
    }
}

impl<T> std::fmt::Debug for Trigger<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Trigger")
    }
}

/// Awaitable end of a [`trigger`] pair.
pub struct Fired<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for Fired<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| TaskError::TriggerDropped))
    }
}

impl<T> std::fmt::Debug for Fired<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Fired")
    }
}

/// Create a single-shot resumption pair.
///
/// Hand the [`Trigger`] to any callback-style API and await the
/// [`Fired`]. A trigger dropped unfired resolves the awaitable to
/// [`TaskError::TriggerDropped`], so the awaiting task is never stranded.
pub fn trigger<T>() -> (Trigger<T>, Fired<T>) {
    let (tx, rx) = oneshot::channel();
    (Trigger { tx }, Fired { rx })
}

/// Adopt a callback: `register` receives the trigger, the caller awaits
/// the fired value.
pub async fn wrap<T, F>(register: F) -> Result<T, TaskError>
where
    F: FnOnce(Trigger<T>),
{
    let (trigger, fired) = trigger();
    register(trigger);
    fired.await
}

/// Like [`wrap`], but resumption is deferred to the next scheduling tick
/// even when the trigger fired before the await, so the continuation
/// never runs inline with the registering call.
pub async fn wrap_deferred<T, F>(register: F) -> Result<T, TaskError>
where
    F: FnOnce(Trigger<T>),
{
    let (trigger, fired) = trigger();
    register(trigger);
    let outcome = fired.await;
    yield_now().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_and_join_returns_value() {
        let handle = spawn("adder", async { 2 + 2 });
        assert_eq!(handle.label(), "adder");
        assert_eq!(handle.join().await, Ok(4));
    }

    #[tokio::test]
    async fn test_join_captures_panic() {
        let handle: TaskHandle<()> = spawn("exploder", async {
            panic!("boom");
        });
        let err = handle.join().await.unwrap_err();
        assert_eq!(
            err,
            TaskError::Panicked {
                label: "exploder".into(),
                message: "boom".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_abort_surfaces_as_cancelled() {
        let handle = spawn("sleeper", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            1
        });
        handle.abort();
        assert!(matches!(
            handle.join().await,
            Err(TaskError::Cancelled { .. })
        ));
    }

    #[tokio::test]
    async fn test_unjoined_panic_does_not_propagate() {
        let handle: TaskHandle<()> = spawn("background", async {
            panic!("nobody is watching");
        });
        drop(handle);
        // Give the supervisor a moment to observe and report.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_trigger_fire_resumes_with_value() {
        let (trigger, fired) = trigger::<u32>();
        let waiter = tokio::spawn(fired);
        trigger.fire(7);
        assert_eq!(waiter.await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn test_trigger_dropped_resolves_error() {
        let (trigger, fired) = trigger::<u32>();
        drop(trigger);
        assert_eq!(fired.await, Err(TaskError::TriggerDropped));
    }

    #[tokio::test]
    async fn test_wrap_adopts_callback() {
        let value = wrap(|trigger| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                trigger.fire("done");
            });
        })
        .await;
        assert_eq!(value, Ok("done"));
    }

    #[tokio::test]
    async fn test_wrap_resumes_inline_when_already_fired() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let other = {
            let log = log.clone();
            tokio::spawn(async move {
                log.lock().unwrap().push("other");
            })
        };

        wrap(|trigger| trigger.fire(())).await.unwrap();
        log.lock().unwrap().push("resumed");
        other.await.unwrap();

        // No suspension happened, so the continuation beat the spawned task.
        assert_eq!(*log.lock().unwrap(), vec!["resumed", "other"]);
    }

    #[tokio::test]
    async fn test_wrap_deferred_resumes_on_a_later_tick() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let other = {
            let log = log.clone();
            tokio::spawn(async move {
                log.lock().unwrap().push("other");
            })
        };

        wrap_deferred(|trigger| trigger.fire(())).await.unwrap();
        log.lock().unwrap().push("resumed");
        other.await.unwrap();

        // The deferral let the already-queued task run first.
        assert_eq!(*log.lock().unwrap(), vec!["other", "resumed"]);
    }
}
