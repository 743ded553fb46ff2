//! Domain-specific error types for rshypervisor.
//!
//! `HypervisorError` is a `thiserror`-based enum with typed variants for the
//! failure modes of a run. Public orchestration APIs return
//! `Result<T, HypervisorError>`, while trait boundaries (backends, host
//! transports, command executors) use `anyhow::Result`.
//!
//! `HypervisorError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically at those boundaries.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Unrecognized kinds fall back to the OS-level message.
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for rshypervisor.
///
/// Fatal variants (`UnknownBackend`, `Provision`, `InvalidState`) abort a run.
/// `Step` and `WorkerPanic` are recorded per host and never cross host
/// boundaries.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HypervisorError {
    /// The requested backend identifier is not a known hypervisor type.
    #[error("unknown hypervisor type: '{name}'")]
    UnknownBackend {
        /// The identifier as given by the caller.
        name: String,
    },

    /// A backend failed to provision its hosts.
    #[error("failed to provision {backend} hosts: {reason}")]
    Provision {
        /// Name of the backend that failed.
        backend: String,
        /// Human-readable failure description, including the error chain.
        reason: String,
    },

    /// A backend failed to release its hosts.
    #[error("failed to clean up {backend} hosts: {reason}")]
    Cleanup {
        /// Name of the backend that failed.
        backend: String,
        /// Human-readable failure description, including the error chain.
        reason: String,
    },

    /// A configuration step failed on a single host.
    #[error("step {step} failed on host {host}: {reason}")]
    Step {
        /// Host the step was applied to.
        host: String,
        /// Name of the failing step.
        step: String,
        /// Human-readable failure description.
        reason: String,
    },

    /// An isolated worker could not be dispatched.
    #[error("isolation error: {0}")]
    Isolation(String),

    /// An isolated worker panicked while processing its item.
    #[error("worker {label} panicked: {message}")]
    WorkerPanic {
        /// Label of the work item (host or backend name).
        label: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// A validation constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// A configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An orchestrator operation was invoked from the wrong lifecycle state.
    #[error("cannot {operation} while orchestrator is {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the orchestrator was in.
        state: String,
    },

    /// A local or remote command failed.
    #[error("command execution failed: {command}: {status}")]
    Execution {
        /// The command that was executed.
        command: String,
        /// Exit status or description of the failure.
        status: String,
    },

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred (usually a path).
        context: String,
        /// Message derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl HypervisorError {
    /// Creates an `Io` variant with the `message` derived from `source`.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }
}
