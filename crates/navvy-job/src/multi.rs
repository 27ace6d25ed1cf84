//! Retryable batches of jobs.
//!
//! A [`MultiJob`] runs a fixed set of [`Job`]s as one unit: all jobs run
//! concurrently, a [`FailCond`] classifies the outcome, and failing jobs are
//! re-run (with a pause between attempts) until the batch passes or the
//! retry budget is spent. Jobs that never started because an earlier spawn
//! failure aborted the batch count as failing and are picked up by the next
//! attempt.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::job::{Exit, Job};

/// Pause between retry attempts when none is configured.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Classifies a batch after each attempt.
pub enum FailCond {
    /// Fail when any job is unfinished or exited non-zero.
    NonZero,
    /// Fail when any job is unfinished or produced no stdout.
    EmptyOutput,
    /// Caller-supplied classification over the whole batch.
    Custom(Box<dyn FnMut(&[Job]) -> Verdict + Send>),
}

/// Outcome of evaluating a [`FailCond`].
#[derive(Debug, Clone)]
pub struct Verdict {
    pub ok: bool,
    /// Indices of the jobs to retry. `None` on failure retries the whole
    /// batch.
    pub failed: Option<Vec<usize>>,
    pub message: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Verdict {
            ok: true,
            failed: None,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Verdict {
            ok: false,
            failed: None,
            message: Some(message.into()),
        }
    }

    pub fn fail_jobs(failed: Vec<usize>, message: impl Into<String>) -> Self {
        Verdict {
            ok: false,
            failed: Some(failed),
            message: Some(message.into()),
        }
    }
}

impl FailCond {
    fn evaluate(&mut self, jobs: &[Job]) -> Verdict {
        match self {
            FailCond::NonZero => {
                let failed = collect_failing(jobs, |job| {
                    job.exit().map_or(true, |exit| !exit.success())
                });
                if failed.is_empty() {
                    Verdict::pass()
                } else {
                    let message =
                        format!("{} of {} jobs exited non-zero", failed.len(), jobs.len());
                    Verdict::fail_jobs(failed, message)
                }
            }
            FailCond::EmptyOutput => {
                let failed = collect_failing(jobs, |job| !job.has_output());
                if failed.is_empty() {
                    Verdict::pass()
                } else {
                    let message =
                        format!("{} of {} jobs produced no output", failed.len(), jobs.len());
                    Verdict::fail_jobs(failed, message)
                }
            }
            FailCond::Custom(classify) => classify(jobs),
        }
    }
}

/// Unfinished jobs always count as failing.
fn collect_failing(jobs: &[Job], mut bad: impl FnMut(&Job) -> bool) -> Vec<usize> {
    jobs.iter()
        .enumerate()
        .filter(|(_, job)| !job.is_done() || bad(job))
        .map(|(index, _)| index)
        .collect()
}

impl fmt::Debug for FailCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailCond::NonZero => f.write_str("NonZero"),
            FailCond::EmptyOutput => f.write_str("EmptyOutput"),
            FailCond::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Batch failure after the retry budget is spent.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Total attempts made, initial run included.
        attempts: u32,
        message: String,
        /// Handles to the jobs still classified as failing.
        failed: Vec<Job>,
    },
}

type RetryHook = Box<dyn FnMut(u32, &[Job]) + Send>;

/// A fixed set of jobs run and retried as one unit.
pub struct MultiJob {
    jobs: Vec<Job>,
    cond: FailCond,
    retries: u32,
    retry_delay: Duration,
    on_retry: Vec<RetryHook>,
}

impl MultiJob {
    pub fn new(jobs: Vec<Job>, cond: FailCond) -> Self {
        Self {
            jobs,
            cond,
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            on_retry: Vec::new(),
        }
    }

    /// Additional attempts allowed after the initial run.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Register a hook fired before each retry with the attempt number
    /// (1-based) and the full job list.
    pub fn on_retry(mut self, hook: impl FnMut(u32, &[Job]) + Send + 'static) -> Self {
        self.on_retry.push(Box::new(hook));
        self
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Run the batch to a verdict.
    ///
    /// Each attempt runs the pending subset via [`Job::join`], then
    /// evaluates the fail condition over all jobs. On failure with budget
    /// remaining: fire the retry hooks, pause, and re-run only the failing
    /// subset. Exhausting the budget yields
    /// [`BatchError::RetriesExhausted`].
    pub async fn start(&mut self) -> Result<(), BatchError> {
        let mut pending: Vec<usize> = (0..self.jobs.len()).collect();
        let mut attempt: u32 = 0;
        loop {
            let batch: Vec<Job> = pending.iter().map(|&i| self.jobs[i].clone()).collect();
            // Jobs finished by a previous attempt must return to the
            // unstarted state or join would not relaunch them. Still-running
            // jobs refuse the reset and are simply awaited again.
            for job in &batch {
                let _ = job.reset();
            }
            if let Err(err) = Job::join(&batch).await {
                tracing::warn!(target: "navvy::multi", attempt, "batch start aborted: {err}");
            }

            let verdict = self.cond.evaluate(&self.jobs);
            if verdict.ok {
                tracing::debug!(target: "navvy::multi", attempt, "batch passed");
                return Ok(());
            }
            let failing = match verdict.failed {
                Some(indices) => indices,
                None => (0..self.jobs.len()).collect(),
            };
            if attempt >= self.retries {
                return Err(BatchError::RetriesExhausted {
                    attempts: attempt + 1,
                    message: verdict
                        .message
                        .unwrap_or_else(|| "fail condition not met".to_string()),
                    failed: failing.iter().map(|&i| self.jobs[i].clone()).collect(),
                });
            }
            attempt += 1;
            tracing::debug!(
                target: "navvy::multi",
                attempt,
                failing = failing.len(),
                "retrying failing subset"
            );
            for hook in self.on_retry.iter_mut() {
                hook(attempt, &self.jobs);
            }
            tokio::time::sleep(self.retry_delay).await;
            pending = failing;
        }
    }

    /// Re-evaluate the fail condition against current job state. Never
    /// caches: killing or re-running a job changes the answer.
    pub fn is_success(&mut self) -> bool {
        self.cond.evaluate(&self.jobs).ok
    }

    /// Snapshot of the batch for diagnostics.
    pub fn report(&mut self) -> BatchReport {
        BatchReport {
            ok: self.is_success(),
            jobs: self.jobs.iter().map(JobSnapshot::of).collect(),
        }
    }
}

impl fmt::Debug for MultiJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiJob")
            .field("jobs", &self.jobs.len())
            .field("cond", &self.cond)
            .field("retries", &self.retries)
            .finish()
    }
}

/// Serializable per-job state for [`BatchReport`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSnapshot {
    pub command: String,
    pub started: bool,
    pub done: bool,
    pub exit: Option<Exit>,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

impl JobSnapshot {
    fn of(job: &Job) -> Self {
        let config = job.config();
        let command = std::iter::once(config.command.as_str())
            .chain(config.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        JobSnapshot {
            command,
            started: job.is_started(),
            done: job.is_done(),
            exit: job.exit(),
            stdout_lines: job.stdout_lines().len(),
            stderr_lines: job.stderr_lines().len(),
        }
    }
}

/// Diagnostic snapshot of a whole batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchReport {
    pub ok: bool,
    pub jobs: Vec<JobSnapshot>,
}

impl BatchReport {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
