// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Command runners
//!
//! The scheduler hands each admitted stage to a [`CommandRunner`]. The
//! default [`ShellRunner`] spawns a child process; tests plug in their own
//! runner to record timing without touching the operating system.

mod secrets;
mod shell;

pub use secrets::{EnvSecretProvider, SecretLease, SecretProvider, StaticSecretProvider};
pub use shell::ShellRunner;

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::watch;

use crate::errors::PipeflowResult;
use crate::pipeline::CommandSpec;

/// Everything needed to run one stage's command
#[derive(Debug)]
pub struct CommandRequest {
    /// Stage name, for logs and errors
    pub stage: String,
    pub command: CommandSpec,
    /// Shell used for script commands
    pub shell: String,
    /// Pipeline, stage, and input variables
    pub env: BTreeMap<String, String>,
    /// Secrets exposed to this command only
    pub secrets: SecretLease,
    pub working_dir: PathBuf,
    /// Fired when the run is aborted
    pub cancel: CancelSignal,
    /// Time between the termination signal and a forced kill
    pub grace: Duration,
}

/// Result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Every `::set-output` marker found on stdout
    pub outputs: BTreeMap<String, String>,
    pub duration: Duration,
    /// The command was stopped because the run was cancelled
    pub cancelled: bool,
}

impl CommandOutput {
    /// Whether the command exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.cancelled
    }

    /// Successful output with the given stdout, markers parsed
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self {
            exit_code: Some(0),
            outputs: parse_output_markers(&stdout),
            stdout,
            ..Self::default()
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// Runs stage commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit is not an error here: it comes back as a
    /// [`CommandOutput`] and the scheduler decides what it means. Errors are
    /// reserved for commands that could not be started.
    async fn run(&self, request: CommandRequest) -> PipeflowResult<CommandOutput>;
}

/// Receiving side of a run's cancellation flag
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is cancelled
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender gone without cancelling: nothing will ever fire
            std::future::pending::<()>().await;
        }
    }
}

fn output_marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^::set-output name=([A-Za-z0-9_.-]+)::(.*)$")
            .expect("valid output marker regex")
    })
}

/// Extract `::set-output name=<key>::<value>` markers from command output.
/// A key printed twice keeps its last value.
pub fn parse_output_markers(stdout: &str) -> BTreeMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| {
            let caps = output_marker_pattern().captures(line.trim_end_matches('\r'))?;
            Some((caps[1].to_string(), caps[2].to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_markers() {
        let stdout =
            "building\n::set-output name=version::1.4.0\n::set-output name=sha::abc123\r\ndone";
        let outputs = parse_output_markers(stdout);

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["version"], "1.4.0");
        assert_eq!(outputs["sha"], "abc123");
    }

    #[test]
    fn test_last_marker_wins() {
        let outputs = parse_output_markers("::set-output name=v::1\n::set-output name=v::2");
        assert_eq!(outputs["v"], "2");
    }

    #[test]
    fn test_markers_must_start_the_line() {
        let outputs =
            parse_output_markers("echo ::set-output name=v::1\n::set-output name=bad key::x");
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_empty_value_is_kept() {
        let outputs = parse_output_markers("::set-output name=tag::");
        assert_eq!(outputs["tag"], "");
    }

    #[test]
    fn test_cancel_signal_fires() {
        let (tx, rx) = watch::channel(false);
        let mut signal = CancelSignal::new(rx);
        assert!(!signal.is_cancelled());

        {
            let mut waiting = tokio_test::task::spawn(signal.cancelled());
            tokio_test::assert_pending!(waiting.poll());

            tx.send_replace(true);
            assert!(waiting.is_woken());
            tokio_test::assert_ready!(waiting.poll());
        }
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_signal_stays_pending() {
        let mut signal = CancelSignal::never();
        let fired = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(fired.is_err());
    }
}
