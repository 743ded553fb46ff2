//! VMware Fusion backend.

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;

use super::{Hypervisor, host_string, release_each, run_checked};
use crate::executor::{CommandExecutor, CommandSpec};
use crate::host::HostDescriptor;

#[derive(Debug, Clone)]
struct FusionHost {
    name: String,
    /// `.vmx` file of the virtual machine
    vmx: String,
    snapshot: Option<String>,
}

/// Reverts Fusion virtual machines to a snapshot and starts them with `vmrun`.
///
/// Each host reads `vmx` (default `<name>.vmx`) and the required `snapshot`
/// from its options.
pub struct Fusion {
    hosts: Vec<FusionHost>,
    executor: Arc<dyn CommandExecutor>,
}

impl Fusion {
    pub fn new(hosts: &[HostDescriptor], executor: Arc<dyn CommandExecutor>) -> Self {
        let hosts = hosts
            .iter()
            .map(|host| FusionHost {
                name: host.name.clone(),
                vmx: host_string(host, "vmx").unwrap_or_else(|| format!("{}.vmx", host.name)),
                snapshot: host_string(host, "snapshot"),
            })
            .collect();
        Self { hosts, executor }
    }

    fn vmrun(&self, host: &FusionHost, args: &[&str]) -> CommandSpec {
        let mut all = vec!["-T".to_string(), "fusion".to_string(), args[0].to_string()];
        all.push(host.vmx.clone());
        all.extend(args[1..].iter().map(|a| a.to_string()));
        CommandSpec::new("vmrun", all).with_label(host.name.clone())
    }
}

impl Hypervisor for Fusion {
    fn name(&self) -> &'static str {
        "fusion"
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.name.clone()).collect()
    }

    fn provision(&mut self) -> Result<()> {
        for host in &self.hosts {
            let Some(snapshot) = host.snapshot.as_deref() else {
                bail!("host {} has no snapshot to revert to", host.name);
            };
            info!("reverting {} to snapshot {}", host.name, snapshot);
            run_checked(
                self.executor.as_ref(),
                &self.vmrun(host, &["revertToSnapshot", snapshot]),
            )?;
            run_checked(self.executor.as_ref(), &self.vmrun(host, &["start", "nogui"]))?;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        release_each(self.name(), &self.hosts, |host: &FusionHost| {
            info!("stopping {}", host.name);
            run_checked(self.executor.as_ref(), &self.vmrun(host, &["stop", "soft"]))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RealCommandExecutor;

    fn executor() -> Arc<dyn CommandExecutor> {
        Arc::new(RealCommandExecutor { dry_run: true })
    }

    #[test]
    fn missing_snapshot_fails_provision() {
        let hosts = [HostDescriptor::new("mac", "osx-10.15-x86_64", "fusion")];
        let mut fusion = Fusion::new(&hosts, executor());
        let err = fusion.provision().unwrap_err();
        assert!(err.to_string().contains("no snapshot"));
    }

    #[test]
    fn vmrun_arguments() {
        let hosts = [HostDescriptor::new("mac", "osx-10.15-x86_64", "fusion")
            .with_option("snapshot", "clean")
            .with_option("vmx", "/vms/mac.vmx")];
        let fusion = Fusion::new(&hosts, executor());
        let spec = fusion.vmrun(&fusion.hosts[0], &["revertToSnapshot", "clean"]);
        assert_eq!(spec.command, "vmrun");
        assert_eq!(spec.args, ["-T", "fusion", "revertToSnapshot", "/vms/mac.vmx", "clean"]);
    }

    #[test]
    fn default_vmx_path() {
        let hosts = [HostDescriptor::new("mac", "osx-10.15-x86_64", "fusion")];
        let fusion = Fusion::new(&hosts, executor());
        assert_eq!(fusion.hosts[0].vmx, "mac.vmx");
    }
}
