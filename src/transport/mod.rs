//! Command transport to provisioned hosts.
//!
//! Configuration steps never talk to a host directly; they hand a command
//! line to a [`HostTransport`], which decides how it reaches the machine.

pub mod ssh;

use anyhow::Result;

use crate::executor::ExecutionResult;
use crate::host::HostDescriptor;

pub use ssh::SshTransport;

/// Runs commands on a target host.
///
/// Shared by every configuration worker, hence `Send + Sync`.
pub trait HostTransport: Send + Sync {
    /// Returns the name of this transport.
    fn name(&self) -> &'static str;

    /// Runs a shell command line on `host`.
    ///
    /// `env` holds variables established by earlier steps for this host.
    fn run(
        &self,
        host: &HostDescriptor,
        command: &str,
        env: &[(String, String)],
    ) -> Result<ExecutionResult>;
}
