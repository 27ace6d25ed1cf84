//! Declarative configuration for an external process job.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Payload written to the child's stdin before the pipe is closed.
#[derive(Debug, Clone)]
pub enum StdinPayload {
    /// One block of text, newline-terminated.
    Text(String),
    /// Ordered lines, each newline-terminated.
    Lines(Vec<String>),
}

impl StdinPayload {
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        match self {
            StdinPayload::Text(text) => {
                let mut bytes = text.into_bytes();
                bytes.push(b'\n');
                bytes
            }
            StdinPayload::Lines(lines) => {
                let mut bytes = Vec::new();
                for line in lines {
                    bytes.extend_from_slice(line.as_bytes());
                    bytes.push(b'\n');
                }
                bytes
            }
        }
    }
}

/// How child output is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Accumulate raw bytes and split them into lines only at process exit.
    #[default]
    Buffered,
    /// Assemble lines as chunks arrive and fire per-line listeners
    /// incrementally, carrying partial lines across chunk boundaries.
    Streamed,
}

/// Everything needed to launch one external process.
///
/// Built with chained setters:
///
/// ```
/// use navvy_job::{JobConfig, OutputMode, StdinPayload};
///
/// let config = JobConfig::new("sort")
///     .arg("-u")
///     .stdin(StdinPayload::Lines(vec!["b".into(), "a".into(), "b".into()]))
///     .mode(OutputMode::Buffered);
/// # let _ = config;
/// ```
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Program to execute (resolved against `PATH` unless a path is given).
    pub command: String,
    /// Arguments, not shell-interpreted.
    pub args: Vec<String>,
    /// Working directory for the child; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Environment overrides merged onto the inherited environment.
    pub env: Vec<(String, String)>,
    /// Start from an empty environment instead of inheriting.
    pub clear_env: bool,
    /// Optional stdin payload; stdin is closed after writing it.
    /// `None` attaches the null device.
    pub stdin: Option<StdinPayload>,
    /// Output collection mode.
    pub mode: OutputMode,
    /// Token observed by [`crate::Job::sync`]; cancelling it interrupts the
    /// synchronous wait without touching the process.
    pub interrupt: Option<CancellationToken>,
    /// Display label; defaults to the command name.
    pub label: Option<String>,
}

impl JobConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            clear_env: false,
            stdin: None,
            mode: OutputMode::default(),
            interrupt: None,
            label: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }

    pub fn stdin(mut self, payload: StdinPayload) -> Self {
        self.stdin = Some(payload);
        self
    }

    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn interrupt(mut self, token: CancellationToken) -> Self {
        self.interrupt = Some(token);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Budget applied by [`crate::Job::sync`] when none is given.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = JobConfig::new("grep")
            .arg("-n")
            .args(["pattern", "file.txt"])
            .cwd("/tmp")
            .env("LC_ALL", "C")
            .label("search");
        assert_eq!(config.command, "grep");
        assert_eq!(config.args, vec!["-n", "pattern", "file.txt"]);
        assert_eq!(config.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(config.env, vec![("LC_ALL".to_string(), "C".to_string())]);
        assert_eq!(config.label.as_deref(), Some("search"));
        assert!(!config.clear_env);
    }

    #[test]
    fn test_stdin_payload_bytes() {
        assert_eq!(
            StdinPayload::Text("hello".into()).into_bytes(),
            b"hello\n".to_vec()
        );
        assert_eq!(
            StdinPayload::Lines(vec!["a".into(), "b".into()]).into_bytes(),
            b"a\nb\n".to_vec()
        );
        assert_eq!(StdinPayload::Lines(Vec::new()).into_bytes(), Vec::<u8>::new());
    }
}
