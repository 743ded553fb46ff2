//! Vagrant backend.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::{BackendKind, Hypervisor, run_checked};
use crate::executor::{CommandExecutor, CommandSpec};
use crate::host::HostDescriptor;

/// Drives `vagrant` for the hosts of one partition.
///
/// The three Vagrant backend kinds differ only in the provider passed to
/// `vagrant up`.
pub struct Vagrant {
    kind: BackendKind,
    hosts: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
}

impl Vagrant {
    pub fn new(kind: BackendKind, hosts: &[HostDescriptor], executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            kind,
            hosts: hosts.iter().map(|h| h.name.clone()).collect(),
            executor,
        }
    }

    /// Provider passed to `vagrant up`, `None` for Vagrant's default.
    pub fn provider(&self) -> Option<&'static str> {
        match self.kind {
            BackendKind::VagrantFusion => Some("vmware_fusion"),
            BackendKind::VagrantVirtualbox => Some("virtualbox"),
            _ => None,
        }
    }

    pub fn up_spec(&self) -> CommandSpec {
        let mut args = vec!["up".to_string()];
        if let Some(provider) = self.provider() {
            args.push(format!("--provider={}", provider));
        }
        args.extend(self.hosts.iter().cloned());
        CommandSpec::new("vagrant", args).with_label(self.name())
    }

    pub fn destroy_spec(&self) -> CommandSpec {
        let mut args = vec!["destroy".to_string(), "--force".to_string()];
        args.extend(self.hosts.iter().cloned());
        CommandSpec::new("vagrant", args).with_label(self.name())
    }
}

impl Hypervisor for Vagrant {
    fn name(&self) -> &'static str {
        self.kind.into()
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn provision(&mut self) -> Result<()> {
        if self.hosts.is_empty() {
            return Ok(());
        }
        info!("bringing up {} host(s) with {}", self.hosts.len(), self.name());
        run_checked(self.executor.as_ref(), &self.up_spec())
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.hosts.is_empty() {
            return Ok(());
        }
        info!("destroying {} host(s) with {}", self.hosts.len(), self.name());
        run_checked(self.executor.as_ref(), &self.destroy_spec())
    }
}
