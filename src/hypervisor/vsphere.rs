//! VMware vSphere backend.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::{Hypervisor, host_string, release_each, run_checked};
use crate::executor::{CommandExecutor, CommandSpec};
use crate::host::HostDescriptor;

/// Powers vSphere virtual machines on and off with `govc`.
///
/// Hosts with a `snapshot` option are reverted to it before power-on.
pub struct Vsphere {
    hosts: Vec<(String, Option<String>)>,
    executor: Arc<dyn CommandExecutor>,
}

impl Vsphere {
    pub fn new(hosts: &[HostDescriptor], executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            hosts: hosts
                .iter()
                .map(|h| (h.name.clone(), host_string(h, "snapshot")))
                .collect(),
            executor,
        }
    }
}

fn govc(host: &str, args: &[&str]) -> CommandSpec {
    let mut all: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    all.push(host.to_string());
    CommandSpec::new("govc", all).with_label(host)
}

impl Hypervisor for Vsphere {
    fn name(&self) -> &'static str {
        "vsphere"
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.iter().map(|(name, _)| name.clone()).collect()
    }

    fn provision(&mut self) -> Result<()> {
        for (name, snapshot) in &self.hosts {
            if let Some(snapshot) = snapshot {
                info!("reverting {} to snapshot {}", name, snapshot);
                let mut spec = govc(name, &["snapshot.revert", "-vm"]);
                spec.args.push(snapshot.clone());
                run_checked(self.executor.as_ref(), &spec)?;
            }
            info!("powering on {}", name);
            run_checked(self.executor.as_ref(), &govc(name, &["vm.power", "-on"]))?;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        release_each(self.name(), &self.hosts, |(name, _): &(String, Option<String>)| {
            info!("powering off {}", name);
            run_checked(self.executor.as_ref(), &govc(name, &["vm.power", "-off", "-force"]))
        })
    }
}
