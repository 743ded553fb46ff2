//! Host descriptors.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::options::{OptionMap, OptionValue, keys};

static EL_PLATFORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^el-(\d+)").expect("EL platform pattern is valid"));

/// Operating system family derived from a host's platform tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PlatformFamily {
    /// Enterprise Linux (`el-<major>-<arch>`)
    El,
    Fedora,
    Debian,
    Ubuntu,
    Other,
}

/// A single target host as declared in a profile.
///
/// The orchestrator borrows descriptors for the duration of a run and may
/// add entries to `options` (such as the assigned hostname), but never
/// replaces `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostDescriptor {
    pub name: String,
    /// Platform tag, e.g. `el-7-x86_64` or `ubuntu-2204-amd64`.
    pub platform: String,
    /// Backend identifier used to provision this host.
    pub hypervisor: String,
    #[serde(default)]
    pub options: OptionMap,
}

impl HostDescriptor {
    pub fn new(
        name: impl Into<String>,
        platform: impl Into<String>,
        hypervisor: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            platform: platform.into(),
            hypervisor: hypervisor.into(),
            options: OptionMap::new(),
        }
    }

    /// Sets a per-host option override.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn family(&self) -> PlatformFamily {
        if EL_PLATFORM.is_match(&self.platform) {
            return PlatformFamily::El;
        }
        match self.platform.split('-').next().unwrap_or_default() {
            "fedora" => PlatformFamily::Fedora,
            "debian" => PlatformFamily::Debian,
            "ubuntu" => PlatformFamily::Ubuntu,
            _ => PlatformFamily::Other,
        }
    }

    /// Returns the major version of an Enterprise Linux platform.
    pub fn el_version(&self) -> Option<u32> {
        EL_PLATFORM
            .captures(&self.platform)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Address used to reach the host: the `ip` option, else the assigned
    /// hostname, else the declared name.
    pub fn address(&self) -> &str {
        ["ip", keys::VM_HOSTNAME]
            .iter()
            .find_map(|key| self.options.get(*key).and_then(OptionValue::as_str))
            .unwrap_or(&self.name)
    }

    /// Hostname assigned during the run, if any.
    pub fn assigned_host_name(&self) -> Option<&str> {
        self.options
            .get(keys::VM_HOSTNAME)
            .and_then(OptionValue::as_str)
    }
}
