//! navvy-core: cooperative task runtime and async coordination primitives.
//!
//! Provides:
//!
//! - **runtime**: Labelled task spawning with captured failures, plus
//!   trigger/wrap adapters for adopting callback-style APIs into async
//!   control flow
//! - **sync**: FIFO counting `Semaphore` with move-only permits
//! - **time**: Cancellable one-shot and repeating timers, debounce and
//!   throttle call-rate shaping
//! - **stream**: Single-pass pull streams over sync and async sources,
//!   and the push-based `ListStream` with an explicit
//!   open → closing → closed protocol
//!
//! Everything is built for a cooperative model: suspension happens only
//! at `.await`, a suspended task is resumed exactly once per suspension,
//! and cross-task hand-off goes through explicit channels and permits
//! rather than shared mutable state.

pub mod runtime;
pub mod stream;
pub mod sync;
pub mod time;

pub use runtime::{spawn, trigger, wrap, wrap_deferred, Fired, TaskError, TaskHandle, Trigger};
pub use stream::{AsyncSource, AsyncStream, Flow, ListStream, Step, Stream, StreamError};
pub use sync::{Permit, Semaphore, SemaphoreMisuse};
pub use time::{
    debounce_leading, debounce_trailing, set_interval, set_timeout, throttle_leading,
    throttle_trailing, Debounce, Throttle, TimerHandle,
};
