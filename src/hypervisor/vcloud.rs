//! vCloud backends: pooled checkout and direct template clones.
//!
//! Which of the two a `vcloud` host gets is decided by the registry from the
//! `pooling_api` option, not by these types.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};
use url::Url;

use super::{Hypervisor, host_string, release_each, run_captured, run_checked};
use crate::executor::{CommandExecutor, CommandSpec};
use crate::host::HostDescriptor;
use crate::options::{GlobalOptions, keys};

/// Template a host is created from: its `template` option, else its platform.
fn template_of(host: &HostDescriptor) -> String {
    host_string(host, "template").unwrap_or_else(|| host.platform.clone())
}

/// Parses the pooling API base URL, normalized to end with `/`.
pub fn parse_pool_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("invalid pooling API URL: {}", raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("pooling API URL must use http or https: {}", raw);
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// A machine checked out of the pool for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CheckedOut {
    host: String,
    /// Name the pool knows the machine by, used to check it back in.
    vm: String,
    /// `vm` qualified with the pool's domain, if the reply carried one.
    address: String,
}

/// Reads a checkout reply of the form
/// `{"ok": true, "<template>": {"hostname": "<vm>"}, "domain": "<domain>"}`.
///
/// Returns the issued machine name and the address to reach it at.
fn issued_vm(body: &str, template: &str) -> Result<(String, String)> {
    let reply: serde_yaml::Value = serde_yaml::from_str(body)
        .with_context(|| format!("unreadable pooling API reply: {}", body.trim()))?;
    if reply.get("ok").and_then(serde_yaml::Value::as_bool) != Some(true) {
        bail!("pool refused checkout of {}: {}", template, body.trim());
    }
    let vm = reply
        .get(template)
        .and_then(|entry| entry.get("hostname"))
        .and_then(serde_yaml::Value::as_str)
        .with_context(|| format!("pooling API reply has no hostname for {}", template))?;
    let address = match reply.get("domain").and_then(serde_yaml::Value::as_str) {
        Some(domain) if !domain.is_empty() => format!("{}.{}", vm, domain),
        _ => vm.to_string(),
    };
    Ok((vm.to_string(), address))
}

/// Checks machines out of (and back into) a VM pooling service with `curl`.
///
/// The pool picks the machine; its name is only known from the checkout
/// reply, and check-in addresses the machine by that name.
pub struct VcloudPooled {
    pool: Url,
    hosts: Vec<(String, String)>,
    checked_out: Vec<CheckedOut>,
    executor: Arc<dyn CommandExecutor>,
}

impl VcloudPooled {
    /// Fails if `pooling_api_url` is missing or malformed.
    pub fn new(
        hosts: &[HostDescriptor],
        options: &GlobalOptions,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<Self> {
        let raw = options
            .get(keys::POOLING_API_URL)
            .and_then(|v| v.as_str())
            .context("pooled vcloud requires the pooling_api_url option")?;
        Ok(Self {
            pool: parse_pool_url(raw)?,
            hosts: hosts
                .iter()
                .map(|h| (h.name.clone(), template_of(h)))
                .collect(),
            checked_out: Vec::new(),
            executor,
        })
    }

    fn request(&self, label: &str, method: &str, path: &str) -> Result<CommandSpec> {
        let url = self
            .pool
            .join(path)
            .with_context(|| format!("failed to build pooling API URL for {}", path))?;
        Ok(CommandSpec::new(
            "curl",
            vec![
                "-fsS".to_string(),
                "-X".to_string(),
                method.to_string(),
                url.to_string(),
            ],
        )
        .with_label(label))
    }
}

impl Hypervisor for VcloudPooled {
    fn name(&self) -> &'static str {
        "vcloud"
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.iter().map(|(name, _)| name.clone()).collect()
    }

    fn provision(&mut self) -> Result<()> {
        for (name, template) in &self.hosts {
            info!("checking out {} from pool for {}", template, name);
            let spec = self
                .request(name, "POST", &format!("vm/{}", template))?
                .capturing_stdout();
            let Some(body) = run_captured(self.executor.as_ref(), &spec)? else {
                debug!("no pool reply for {}, nothing checked out", name);
                continue;
            };
            let (vm, address) = issued_vm(&body, template)
                .with_context(|| format!("failed to check out {} for {}", template, name))?;
            info!("pool issued {} for {}", address, name);
            self.checked_out.push(CheckedOut {
                host: name.clone(),
                vm,
                address,
            });
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        let checked_out = std::mem::take(&mut self.checked_out);
        release_each(self.name(), &checked_out, |machine: &CheckedOut| {
            info!("returning {} to pool", machine.vm);
            let spec = self.request(&machine.host, "DELETE", &format!("vm/{}", machine.vm))?;
            run_checked(self.executor.as_ref(), &spec)
        })
    }

    fn issued_host_names(&self) -> Vec<(String, String)> {
        self.checked_out
            .iter()
            .map(|machine| (machine.host.clone(), machine.address.clone()))
            .collect()
    }
}

/// Clones vCloud machines straight from templates with `govc`.
pub struct VcloudDirect {
    hosts: Vec<(String, String)>,
    executor: Arc<dyn CommandExecutor>,
}

impl VcloudDirect {
    pub fn new(hosts: &[HostDescriptor], executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            hosts: hosts
                .iter()
                .map(|h| (h.name.clone(), template_of(h)))
                .collect(),
            executor,
        }
    }
}

impl Hypervisor for VcloudDirect {
    fn name(&self) -> &'static str {
        "vcloud_direct"
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.iter().map(|(name, _)| name.clone()).collect()
    }

    fn provision(&mut self) -> Result<()> {
        for (name, template) in &self.hosts {
            info!("cloning {} from template {}", name, template);
            let spec = CommandSpec::new(
                "govc",
                vec![
                    "vm.clone".to_string(),
                    "-vm".to_string(),
                    template.clone(),
                    "-on=true".to_string(),
                    name.clone(),
                ],
            )
            .with_label(name.clone());
            run_checked(self.executor.as_ref(), &spec)?;
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        release_each(self.name(), &self.hosts, |(name, _): &(String, String)| {
            info!("destroying {}", name);
            let spec = CommandSpec::new("govc", vec!["vm.destroy".to_string(), name.clone()])
                .with_label(name.clone());
            run_checked(self.executor.as_ref(), &spec)
        })
    }
}
