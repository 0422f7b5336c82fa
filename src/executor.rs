//! Command execution
//!
//! Runs a command line as a child process, merges its stdout and stderr in
//! the order they arrive, and reports how it ended. Cancellation goes through
//! a [`CancellationToken`]: the child is killed and the execution is reported
//! as [`ExecutionOutcome::Cancelled`], never as a plain failure.

use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exit summary recorded for cancelled executions
pub const CANCELLED_EXIT_STATUS: &str = "cancelled";

/// Exit summary recorded when there is nothing to run
pub const NO_COMMAND_EXIT_STATUS: &str = "no command specified";

/// How an execution ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Process exited with status 0
    Success,
    /// Process exited non-zero, was killed by a signal, or never started
    Failed(String),
    /// Execution was cancelled through its token
    Cancelled,
}

impl ExecutionOutcome {
    /// Summary stored in `status.exitStatus`; empty on success
    pub fn exit_status(&self) -> String {
        match self {
            ExecutionOutcome::Success => String::new(),
            ExecutionOutcome::Failed(reason) => reason.clone(),
            ExecutionOutcome::Cancelled => CANCELLED_EXIT_STATUS.to_string(),
        }
    }

    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failed(_) => "failure",
            ExecutionOutcome::Cancelled => "cancelled",
        }
    }
}

/// Result of running one command line
#[derive(Clone, Debug)]
pub struct Execution {
    /// Combined stdout and stderr, lossily decoded as UTF-8
    pub output: String,
    pub outcome: ExecutionOutcome,
    pub duration: Duration,
}

/// Split a command line on whitespace into program and arguments
///
/// No quoting or shell interpretation is applied. Returns `None` for a blank
/// line.
pub fn split_command(line: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = line.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Runs command lines as child processes
#[derive(Clone, Debug, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `line` to completion or until `token` is cancelled
    pub async fn run(&self, line: &str, token: CancellationToken) -> Execution {
        let started = Instant::now();
        let finish = |output: Vec<u8>, outcome: ExecutionOutcome| Execution {
            output: String::from_utf8_lossy(&output).into_owned(),
            outcome,
            duration: started.elapsed(),
        };

        let Some((program, args)) = split_command(line) else {
            return finish(
                Vec::new(),
                ExecutionOutcome::Failed(NO_COMMAND_EXIT_STATUS.to_string()),
            );
        };

        if token.is_cancelled() {
            return finish(Vec::new(), ExecutionOutcome::Cancelled);
        }

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return finish(
                    Vec::new(),
                    ExecutionOutcome::Failed(format!("failed to start {}: {}", program, e)),
                );
            }
        };

        debug!(program, pid = child.id(), "Started command");

        let (output, status) = supervise(child, &token).await;
        let outcome = if token.is_cancelled() {
            ExecutionOutcome::Cancelled
        } else {
            match status {
                Ok(status) if status.success() => ExecutionOutcome::Success,
                Ok(status) => ExecutionOutcome::Failed(describe_exit(status)),
                Err(e) => ExecutionOutcome::Failed(format!("failed to wait for {}: {}", program, e)),
            }
        };

        finish(output, outcome)
    }
}

/// Drain both pipes into one buffer and reap the child, killing it on cancel
///
/// On the normal path output is read until both pipes close. Once the child
/// has been killed and reaped, draining stops even if a process it left
/// behind still holds a pipe open.
async fn supervise(
    mut child: Child,
    token: &CancellationToken,
) -> (Vec<u8>, std::io::Result<ExitStatus>) {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let mut output = Vec::new();
    let mut killed = false;
    let mut status = None;

    loop {
        let drained = stdout.is_none() && stderr.is_none();
        if killed || drained {
            if let Some(status) = status.take() {
                if !drained {
                    debug!("Child reaped after cancel, abandoning open pipes");
                }
                return (output, status);
            }
        }

        tokio::select! {
            _ = token.cancelled(), if !killed => {
                killed = true;
                let _ = child.start_kill();
            }
            exited = child.wait(), if status.is_none() => status = Some(exited),
            read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => match read {
                Ok(n) if n > 0 => output.extend_from_slice(&out_buf[..n]),
                _ => stdout = None,
            },
            read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => match read {
                Ok(n) if n > 0 => output.extend_from_slice(&err_buf[..n]),
                _ => stderr = None,
            },
        }
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit status {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal: {}", signal);
        }
    }

    status.to_string()
}
