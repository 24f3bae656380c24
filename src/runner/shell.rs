// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Shell runner
//!
//! Runs stage commands as child processes. Scripts go through the configured
//! shell with `-c`; argv commands are executed directly.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{parse_output_markers, CommandOutput, CommandRequest, CommandRunner};
use crate::errors::{PipeflowError, PipeflowResult};
use crate::pipeline::CommandSpec;

/// Runs commands with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    /// Create a new shell runner
    pub fn new() -> Self {
        Self
    }

    /// Find a program on PATH
    pub fn locate(program: &str) -> PipeflowResult<PathBuf> {
        which::which(program).map_err(|e| PipeflowError::SpawnFailed {
            stage: String::new(),
            error: format!("'{}' not found: {}", program, e),
            help: Some(format!(
                "Install '{}' or set 'settings.shell' to a shell that exists",
                program
            )),
        })
    }

    fn build_command(request: &CommandRequest) -> PipeflowResult<(String, Command)> {
        let (program, mut cmd) = match &request.command {
            CommandSpec::Script(script) => {
                let mut cmd = Command::new(&request.shell);
                cmd.arg("-c").arg(script);
                (request.shell.clone(), cmd)
            }
            CommandSpec::Argv(argv) => {
                let Some((program, args)) = argv.split_first() else {
                    return Err(PipeflowError::InvalidPipeline {
                        reason: format!("Stage '{}': command is empty", request.stage),
                        help: None,
                    });
                };
                let mut cmd = Command::new(program);
                cmd.args(args);
                (program.clone(), cmd)
            }
        };

        cmd.current_dir(&request.working_dir);
        cmd.envs(&request.env);
        cmd.envs(request.secrets.env_vars());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // Own group, so everything the script forks can be signalled at once
        #[cfg(unix)]
        cmd.process_group(0);

        Ok((program, cmd))
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, request: CommandRequest) -> PipeflowResult<CommandOutput> {
        let (program, mut cmd) = Self::build_command(&request)?;
        let start = Instant::now();

        let mut child = cmd
            .spawn()
            .map_err(|e| PipeflowError::spawn_failed(&request.stage, &program, e))?;
        debug!(stage = %request.stage, pid = ?child.id(), "command started");
        // Killed on drop, which covers a stage timeout dropping this future
        let mut group = ProcessGroup::of(&child, &request.stage);

        let stdout_handle = child.stdout.take().map(collect_lines);
        let stderr_handle = child.stderr.take().map(collect_lines);

        let mut cancel = request.cancel.clone();
        let (status, cancelled) = tokio::select! {
            status = child.wait() => (status, false),
            _ = cancel.cancelled() => {
                let status = terminate(&mut child, &group, request.grace).await;
                (status, true)
            }
        };
        group.disarm();

        let status = status.map_err(|e| PipeflowError::spawn_failed(&request.stage, &program, e))?;
        // Processes that left the group may still hold the pipes open
        let drain = cancelled.then_some(request.grace);
        let stdout = join_lines(stdout_handle, drain).await;
        let stderr = join_lines(stderr_handle, drain).await;

        let stdout = request.secrets.mask(&stdout);
        let stderr = request.secrets.mask(&stderr);

        Ok(CommandOutput {
            exit_code: status.code(),
            outputs: parse_output_markers(&stdout),
            stdout,
            stderr,
            duration: start.elapsed(),
            cancelled,
        })
    }
}

/// Ask the command's process group to stop, then kill it once the grace
/// period runs out
async fn terminate(
    child: &mut Child,
    group: &ProcessGroup,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    if !group.signal("TERM").await {
        let _ = child.start_kill();
    }

    let status = match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                stage = %group.stage,
                grace_secs = grace.as_secs(),
                "command ignored termination, killing"
            );
            group.signal("KILL").await;
            let _ = child.start_kill();
            child.wait().await
        }
    };

    // Forked children that ignored TERM would keep the output pipes open
    group.signal("KILL").await;
    status
}

/// Process group a command runs in. While armed, dropping it kills the
/// whole group.
struct ProcessGroup {
    pgid: Option<u32>,
    stage: String,
}

impl ProcessGroup {
    fn of(child: &Child, stage: &str) -> Self {
        Self {
            pgid: child.id(),
            stage: stage.to_string(),
        }
    }

    /// Keep the group alive when this is dropped
    fn disarm(&mut self) {
        self.pgid = None;
    }

    /// Send `signal` to every process in the group
    #[cfg(unix)]
    async fn signal(&self, signal: &str) -> bool {
        let Some(pgid) = self.pgid else {
            return false;
        };

        Command::new("kill")
            .arg(format!("-{}", signal))
            .arg("--")
            .arg(format!("-{}", pgid))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    async fn signal(&self, _signal: &str) -> bool {
        false
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        warn!(stage = %self.stage, pgid, "command abandoned, killing its process group");

        #[cfg(unix)]
        {
            let _ = std::process::Command::new("kill")
                .arg("-KILL")
                .arg("--")
                .arg(format!("-{}", pgid))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

fn collect_lines<R>(reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut output = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&line);
        }
        output
    })
}

async fn join_lines(handle: Option<JoinHandle<String>>, limit: Option<Duration>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };

    match limit {
        Some(limit) => {
            let abort = handle.abort_handle();
            match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined.unwrap_or_default(),
                Err(_) => {
                    abort.abort();
                    String::new()
                }
            }
        }
        None => handle.await.unwrap_or_default(),
    }
}
