//! Hypervisor backends and the registry that selects them.
//!
//! Every host declares the backend that provisions it by identifier
//! (`vsphere`, `fusion`, `vcloud`, `vagrant`, `vagrant_fusion`,
//! `vagrant_virtualbox`). Identifiers parse into the closed [`BackendKind`]
//! enum, and the [`HypervisorRegistry`] maps each kind to exactly one
//! constructor. Constructing a backend never provisions anything;
//! provisioning is an explicit [`Hypervisor::provision`] call.

pub mod fusion;
pub mod vagrant;
pub mod vcloud;
pub mod vsphere;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::HypervisorError;
use crate::executor::{CommandExecutor, CommandSpec};
use crate::host::HostDescriptor;
use crate::options::GlobalOptions;

pub use fusion::Fusion;
pub use vagrant::Vagrant;
pub use vcloud::{VcloudDirect, VcloudPooled};
pub use vsphere::Vsphere;

/// Capability set shared by all backends.
///
/// The orchestrator treats every backend uniformly through this trait and
/// never inspects the concrete type after construction. `provision` is not
/// required to be idempotent; callers invoke it once per run.
pub trait Hypervisor: Send {
    /// Returns the backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Names of the hosts this backend is responsible for.
    fn hosts(&self) -> Vec<String>;

    /// Creates or resets the machines for this backend's hosts.
    fn provision(&mut self) -> Result<()>;

    /// Releases the machines. Backends without teardown keep the default.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// `(host, hostname)` pairs for machines whose name was issued during
    /// provisioning rather than declared in the profile.
    fn issued_host_names(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Known backend types.
///
/// Identifiers are exact and case-sensitive.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    /// VMware vSphere
    Vsphere,
    /// VMware Fusion desktop virtualization
    Fusion,
    /// vCloud machines checked out from a pooling API
    Vcloud,
    /// vCloud machines cloned directly from templates
    VcloudDirect,
    /// Vagrant with its default provider
    Vagrant,
    /// Vagrant with the VMware Fusion provider
    VagrantFusion,
    /// Vagrant with the VirtualBox provider
    VagrantVirtualbox,
}

impl BackendKind {
    /// Parses a backend identifier.
    pub fn parse(name: &str) -> Result<Self, HypervisorError> {
        name.parse().map_err(|_| HypervisorError::UnknownBackend {
            name: name.to_string(),
        })
    }

    /// Applies registry policy to a requested kind.
    ///
    /// `vcloud` selects the direct backend when `pooling_api` is false.
    pub fn select(self, options: &GlobalOptions) -> Self {
        match self {
            Self::Vcloud if !options.pooling_api() => Self::VcloudDirect,
            other => other,
        }
    }
}

/// Builds a backend for a partition of hosts.
pub type Constructor =
    Box<dyn Fn(&[HostDescriptor], &GlobalOptions) -> Result<Box<dyn Hypervisor>> + Send + Sync>;

/// Lookup table from backend kind to constructor.
pub struct HypervisorRegistry {
    constructors: BTreeMap<BackendKind, Constructor>,
}

impl std::fmt::Debug for HypervisorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HypervisorRegistry")
            .field("kinds", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HypervisorRegistry {
    /// Creates a registry with no constructors.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Creates a registry with every built-in backend, all running their
    /// commands through `executor`.
    pub fn builtin(executor: Arc<dyn CommandExecutor>) -> Self {
        let mut registry = Self::empty();

        let exec = Arc::clone(&executor);
        registry.register(BackendKind::Vsphere, move |hosts, _| {
            Ok(Box::new(Vsphere::new(hosts, Arc::clone(&exec))))
        });
        let exec = Arc::clone(&executor);
        registry.register(BackendKind::Fusion, move |hosts, _| {
            Ok(Box::new(Fusion::new(hosts, Arc::clone(&exec))))
        });
        let exec = Arc::clone(&executor);
        registry.register(BackendKind::Vcloud, move |hosts, options| {
            Ok(Box::new(VcloudPooled::new(hosts, options, Arc::clone(&exec))?))
        });
        let exec = Arc::clone(&executor);
        registry.register(BackendKind::VcloudDirect, move |hosts, _| {
            Ok(Box::new(VcloudDirect::new(hosts, Arc::clone(&exec))))
        });
        for kind in [
            BackendKind::Vagrant,
            BackendKind::VagrantFusion,
            BackendKind::VagrantVirtualbox,
        ] {
            let exec = Arc::clone(&executor);
            registry.register(kind, move |hosts, _| {
                Ok(Box::new(Vagrant::new(kind, hosts, Arc::clone(&exec))))
            });
        }

        registry
    }

    /// Registers `constructor` for `kind`, replacing any previous one.
    pub fn register<F>(&mut self, kind: BackendKind, constructor: F)
    where
        F: Fn(&[HostDescriptor], &GlobalOptions) -> Result<Box<dyn Hypervisor>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind, Box::new(constructor));
    }

    /// Returns the kind `name` resolves to under `options`.
    pub fn resolve_kind(name: &str, options: &GlobalOptions) -> Result<BackendKind, HypervisorError> {
        Ok(BackendKind::parse(name)?.select(options))
    }

    /// Creates the backend for `name` over `hosts`.
    ///
    /// Exactly one constructor is invoked. Unknown identifiers fail with
    /// [`HypervisorError::UnknownBackend`].
    pub fn create(
        &self,
        name: &str,
        hosts: &[HostDescriptor],
        options: &GlobalOptions,
    ) -> Result<Box<dyn Hypervisor>, HypervisorError> {
        let kind = Self::resolve_kind(name, options)?;
        let constructor = self.constructors.get(&kind).ok_or_else(|| {
            HypervisorError::Config(format!("no constructor registered for {} hypervisor", kind))
        })?;
        tracing::debug!("creating {} hypervisor for {} host(s)", kind, hosts.len());
        constructor(hosts, options).map_err(|e| {
            HypervisorError::Config(format!("failed to create {} hypervisor: {:#}", kind, e))
        })
    }
}

/// Runs `spec` and fails on a spawn error or non-zero exit.
pub(crate) fn run_checked(executor: &dyn CommandExecutor, spec: &CommandSpec) -> Result<()> {
    run_captured(executor, spec).map(drop)
}

/// Like [`run_checked`], returning captured stdout if the command ran.
pub(crate) fn run_captured(
    executor: &dyn CommandExecutor,
    spec: &CommandSpec,
) -> Result<Option<String>> {
    let command = spec.display();
    let result = executor
        .execute(spec)
        .with_context(|| format!("failed to execute {}", command))?;
    result.check(&command)?;
    Ok(result.stdout)
}

/// Calls `release` for every item, then returns the first failure.
///
/// Used by backend teardown so that one stuck machine does not leak the
/// rest of the partition.
pub(crate) fn release_each<T, F>(backend: &str, items: &[T], mut release: F) -> Result<()>
where
    F: FnMut(&T) -> Result<()>,
{
    let mut first = None;
    for item in items {
        if let Err(e) = release(item) {
            tracing::error!("{} teardown failed: {:#}", backend, e);
            first.get_or_insert(e);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Reads a string option from a host.
pub(crate) fn host_string(host: &HostDescriptor, key: &str) -> Option<String> {
    host.options
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
