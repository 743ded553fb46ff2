//! Command executor backed by `std::process::Command`.

use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use which::which;

use super::pipe::{StreamType, panic_message, stream_to_log};
use super::{CommandExecutor, CommandSpec, ExecutionResult};
use crate::error::HypervisorError;

/// Kills `child`, reaps it, and joins any reader threads already started.
fn abandon_child<I>(child: &mut Child, readers: I)
where
    I: IntoIterator<Item = JoinHandle<Option<String>>>,
{
    let pid = child.id();
    if let Err(e) = child.kill() {
        tracing::debug!(pid, "kill returned error (process may have already exited): {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid, "failed to wait for child process after kill: {}", e);
    }
    for reader in readers {
        if let Err(e) = reader.join() {
            tracing::warn!("reader thread panicked during cleanup: {}", panic_message(&*e));
        }
    }
}

fn spawn_reader<R>(
    pipe: Option<R>,
    stream: StreamType,
    label: String,
    capture: bool,
) -> std::io::Result<JoinHandle<Option<String>>>
where
    R: std::io::Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-{}", stream, label))
        .spawn(move || stream_to_log(pipe, stream, &label, capture))
}

/// Command executor that runs actual system commands.
///
/// With `dry_run` set, commands are logged but not executed and the result
/// carries no exit status.
#[derive(Debug, Default, Clone)]
pub struct RealCommandExecutor {
    pub dry_run: bool,
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let label = spec.label.clone().unwrap_or_else(|| spec.command.clone());
        if self.dry_run {
            tracing::info!(label = %label, "dry run: {}", spec.display());
            return Ok(ExecutionResult::skipped());
        }

        let program =
            which(&spec.command).with_context(|| format!("command not found: {}", spec.command))?;
        tracing::debug!(label = %label, "running: {}", spec.display());

        let mut command = Command::new(program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", spec.display()))?;

        let stdout = match spawn_reader(
            child.stdout.take(),
            StreamType::Stdout,
            label.clone(),
            spec.capture_stdout,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                abandon_child(&mut child, []);
                return Err(HypervisorError::Execution {
                    command: spec.display(),
                    status: format!("failed to spawn stdout reader thread: {}", e),
                }
                .into());
            }
        };
        let stderr = match spawn_reader(child.stderr.take(), StreamType::Stderr, label, false) {
            Ok(handle) => handle,
            Err(e) => {
                abandon_child(&mut child, [stdout]);
                return Err(HypervisorError::Execution {
                    command: spec.display(),
                    status: format!("failed to spawn stderr reader thread: {}", e),
                }
                .into());
            }
        };

        let status = match child.wait() {
            Ok(status) => status,
            Err(e) => {
                abandon_child(&mut child, [stdout, stderr]);
                return Err(HypervisorError::Execution {
                    command: spec.display(),
                    status: format!("failed to wait for command: {}", e),
                }
                .into());
            }
        };

        let mut captured = None;
        for (name, reader) in [("stdout", stdout), ("stderr", stderr)] {
            match reader.join() {
                Ok(output) => captured = captured.or(output),
                Err(e) => {
                    tracing::error!(stream = name, "reader thread panicked: {}", panic_message(&*e))
                }
            }
        }

        tracing::trace!("{} finished: success={}", spec.command, status.success());
        Ok(ExecutionResult {
            status: Some(status),
            stdout: captured,
        })
    }
}
