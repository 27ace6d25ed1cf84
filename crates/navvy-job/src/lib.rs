//! navvy-job: external process jobs and retryable batch orchestration.
//!
//! Provides:
//! - **config**: declarative [`JobConfig`] with stdin payloads and
//!   buffered/streamed output modes
//! - **job**: the [`Job`] handle with start/wait/sync/kill lifecycle,
//!   per-line and exit listeners, `join`/`chain` combinators, and output
//!   bridged into navvy-core's `ListStream`
//! - **multi**: [`MultiJob`] batches that re-run their failing subset until
//!   a [`FailCond`] passes or the retry budget is spent
//!
//! Jobs are cheap-clone handles over shared run state: start a process from
//! one task, stream its output from another, kill it from a third. Pipe I/O
//! failures are logged and non-fatal; only spawn failures, budget overruns
//! and interrupted waits surface as errors.

pub mod config;
pub mod job;
pub mod multi;

mod line;

pub use config::{JobConfig, OutputMode, StdinPayload, DEFAULT_SYNC_TIMEOUT};
pub use job::{Exit, Job, JobError};
pub use multi::{BatchError, BatchReport, FailCond, JobSnapshot, MultiJob, Verdict};
