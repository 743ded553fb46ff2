//! Host configuration steps.
//!
//! The catalog is a fixed, ordered list of independent steps. Each step is
//! gated by its own predicate over the host's effective options and, when it
//! runs, applies an idempotent change to one host through a
//! [`HostTransport`].
//!
//! Adding a step requires:
//! 1. Adding a variant to [`Step`] at its position in the run order
//! 2. Adding its gate to [`Step::is_enabled`]
//! 3. Adding its implementation to [`Step::apply`]

mod env;
mod firewall;
mod hostname;
mod keys;
mod packages;
mod timesync;

use anyhow::{Context, Result};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::debug;

use crate::host::{HostDescriptor, PlatformFamily};
use crate::options::{EffectiveOptions, GlobalOptions, keys as option_keys};
use crate::transport::HostTransport;

pub use hostname::{HOST_NAME_SUFFIX_LEN, generate_host_name};

/// Configuration steps in run order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Step {
    /// Establishes the per-host environment used by later steps
    SetEnv,
    /// Synchronizes the host clock
    Timesync,
    /// Installs the shared root SSH keys
    SyncRootKeys,
    /// Enables the extra package repository on Enterprise Linux
    AddElExtras,
    /// Stops the host firewall
    DisableIptables,
    /// Suppresses automatic OS updates
    DisableUpdates,
    /// Generates and assigns a prefixed hostname
    HostName,
}

impl Step {
    /// All steps in run order.
    pub fn catalog() -> impl Iterator<Item = Step> {
        Step::iter()
    }

    /// Option key that gates this step.
    pub fn gate_key(self) -> &'static str {
        match self {
            Self::SetEnv => option_keys::CONFIGURE,
            Self::Timesync => option_keys::TIMESYNC,
            Self::SyncRootKeys => option_keys::ROOT_KEYS,
            Self::AddElExtras => option_keys::ADD_EL_EXTRAS,
            Self::DisableIptables => option_keys::DISABLE_IPTABLES,
            Self::DisableUpdates => option_keys::DISABLE_UPDATES,
            Self::HostName => option_keys::HOST_NAME_PREFIX,
        }
    }

    /// Decides whether this step runs for `host`.
    ///
    /// [`Step::HostName`] also stays off for a host that already has a
    /// hostname, whether declared in the profile or issued by its backend.
    pub fn is_enabled(self, host: &HostDescriptor, options: &EffectiveOptions<'_>) -> bool {
        match self {
            Self::HostName => {
                options.string(option_keys::HOST_NAME_PREFIX).is_some()
                    && host.assigned_host_name().is_none()
            }
            Self::AddElExtras => {
                options.flag(self.gate_key()) && host.family() == PlatformFamily::El
            }
            _ => options.flag(self.gate_key()),
        }
    }

    /// Applies this step to the host held by `ctx`.
    pub fn apply(self, ctx: &mut StepContext<'_>) -> Result<()> {
        match self {
            Self::SetEnv => env::set_env(ctx),
            Self::Timesync => timesync::timesync(ctx),
            Self::SyncRootKeys => keys::sync_root_keys(ctx),
            Self::AddElExtras => packages::add_el_extras(ctx),
            Self::DisableIptables => firewall::disable_iptables(ctx),
            Self::DisableUpdates => packages::disable_updates(ctx),
            Self::HostName => hostname::assign_host_name(ctx),
        }
    }
}

/// Returns the ordered steps that apply to `host`.
///
/// When `configure` resolves false for the host, nothing runs, not even
/// [`Step::SetEnv`].
pub fn plan(host: &HostDescriptor, global: &GlobalOptions) -> Vec<Step> {
    let options = EffectiveOptions::new(global, &host.options);
    if !options.flag(option_keys::CONFIGURE) {
        debug!(host = %host.name, "configure is disabled, no steps planned");
        return Vec::new();
    }
    Step::catalog()
        .filter(|step| {
            let enabled = step.is_enabled(host, &options);
            debug!(host = %host.name, step = %step, enabled, "gate evaluated");
            enabled
        })
        .collect()
}

/// Everything a step may touch while configuring one host.
///
/// `host` is the worker's own copy of the descriptor; the global options
/// are shared read-only.
pub struct StepContext<'a> {
    pub host: &'a mut HostDescriptor,
    pub global: &'a GlobalOptions,
    pub transport: &'a dyn HostTransport,
    /// Environment established by `set_env`, passed to every later command.
    pub env: Vec<(String, String)>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        host: &'a mut HostDescriptor,
        global: &'a GlobalOptions,
        transport: &'a dyn HostTransport,
    ) -> Self {
        Self {
            host,
            global,
            transport,
            env: Vec::new(),
        }
    }

    /// Effective options for this host, resolved against its current map.
    pub fn options(&self) -> EffectiveOptions<'_> {
        EffectiveOptions::new(self.global, &self.host.options)
    }

    /// Runs `command` on the host and fails on a non-zero exit.
    pub fn run(&self, command: &str) -> Result<()> {
        let result = self
            .transport
            .run(self.host, command, &self.env)
            .with_context(|| format!("failed to run `{}` on {}", command, self.host.name))?;
        result.check(command)?;
        Ok(())
    }
}

/// Quotes `value` for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el_host() -> HostDescriptor {
        HostDescriptor::new("a", "el-5-x86_64", "vagrant")
    }

    #[test]
    fn catalog_order() {
        let names: Vec<String> = Step::catalog().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            [
                "set_env",
                "timesync",
                "sync_root_keys",
                "add_el_extras",
                "disable_iptables",
                "disable_updates",
                "host_name"
            ]
        );
    }

    #[test]
    fn default_plan_is_set_env_only() {
        assert_eq!(plan(&el_host(), &GlobalOptions::new()), [Step::SetEnv]);
    }

    #[test]
    fn configure_false_plans_nothing() {
        let global = GlobalOptions::new()
            .with(option_keys::CONFIGURE, false)
            .with(option_keys::TIMESYNC, true)
            .with(option_keys::ROOT_KEYS, true)
            .with(option_keys::ADD_EL_EXTRAS, true)
            .with(option_keys::DISABLE_IPTABLES, true)
            .with(option_keys::DISABLE_UPDATES, true)
            .with(option_keys::HOST_NAME_PREFIX, "test-");
        assert!(plan(&el_host(), &global).is_empty());
    }

    #[test]
    fn full_plan_follows_catalog_order() {
        let global = GlobalOptions::new()
            .with(option_keys::TIMESYNC, true)
            .with(option_keys::ROOT_KEYS, true)
            .with(option_keys::ADD_EL_EXTRAS, true)
            .with(option_keys::DISABLE_IPTABLES, true)
            .with(option_keys::DISABLE_UPDATES, true)
            .with(option_keys::HOST_NAME_PREFIX, "test-");
        let planned = plan(&el_host(), &global);
        assert_eq!(planned, Step::catalog().collect::<Vec<_>>());
    }

    #[test]
    fn add_el_extras_skipped_on_other_platforms() {
        let global = GlobalOptions::new().with(option_keys::ADD_EL_EXTRAS, true);
        let host = HostDescriptor::new("u", "ubuntu-2204-amd64", "vagrant");
        assert_eq!(plan(&host, &global), [Step::SetEnv]);
    }

    #[test]
    fn host_false_suppresses_global_true() {
        let global = GlobalOptions::new().with(option_keys::TIMESYNC, true);
        let host = el_host().with_option(option_keys::TIMESYNC, false);
        assert!(!plan(&host, &global).contains(&Step::Timesync));
    }

    #[test]
    fn empty_prefix_disables_host_name() {
        let global = GlobalOptions::new().with(option_keys::HOST_NAME_PREFIX, "");
        assert!(!plan(&el_host(), &global).contains(&Step::HostName));
    }

    #[test]
    fn declared_hostname_is_kept() {
        let global = GlobalOptions::new().with(option_keys::HOST_NAME_PREFIX, "ci-");
        assert!(plan(&el_host(), &global).contains(&Step::HostName));
        let named = el_host().with_option(option_keys::VM_HOSTNAME, "web01.example.com");
        assert_eq!(plan(&named, &global), [Step::SetEnv]);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
