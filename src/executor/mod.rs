//! Local command execution.
//!
//! Backends drive virtualization CLIs (`vagrant`, `vmrun`, `govc`, `curl`) and
//! the SSH transport drives `ssh` through this abstraction:
//! - [`CommandSpec`]: what to run
//! - [`ExecutionResult`]: how it ended
//! - [`CommandExecutor`]: the execution seam, replaced by recorders in tests
//! - [`RealCommandExecutor`]: `std::process::Command` with streamed output

mod pipe;
mod real;

use std::process::ExitStatus;

use crate::error::HypervisorError;

pub(crate) use pipe::panic_message;
pub use real::RealCommandExecutor;

/// Formats arguments as a space-separated, debug-quoted string.
pub(crate) fn format_command_args(args: &[String]) -> String {
    args.iter()
        .map(|a| format!("{:?}", a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Specification for a command to be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// The command to execute (e.g., "vagrant")
    pub command: String,
    pub args: Vec<String>,
    /// Host or backend name attached to streamed output lines
    pub label: Option<String>,
    /// Keep stdout in the result in addition to logging it
    pub capture_stdout: bool,
}

impl CommandSpec {
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            label: None,
            capture_stdout: false,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn capturing_stdout(mut self) -> Self {
        self.capture_stdout = true;
        self
    }

    /// Renders the command line for logs and error messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, format_command_args(&self.args))
        }
    }
}

/// Result of command execution
#[derive(Debug)]
pub struct ExecutionResult {
    /// Exit status of the command (None in dry-run mode)
    pub status: Option<ExitStatus>,
    /// Captured stdout, when the spec asked for it and the command ran
    pub stdout: Option<String>,
}

impl ExecutionResult {
    /// Result of a command that was not run.
    pub fn skipped() -> Self {
        Self {
            status: None,
            stdout: None,
        }
    }

    /// Converts a non-zero exit into an `Execution` error for `command`.
    pub fn check(&self, command: &str) -> Result<(), HypervisorError> {
        match self.status {
            Some(status) if !status.success() => Err(HypervisorError::Execution {
                command: command.to_string(),
                status: status.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Trait for command execution.
///
/// Implementations must be `Send + Sync`: one executor is shared by every
/// backend and by workers configuring hosts in parallel.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, spec: &CommandSpec) -> anyhow::Result<ExecutionResult>;
}
