//! Layered option resolution.
//!
//! A run is driven by two option maps with the same key space: the
//! profile-wide [`GlobalOptions`] and the per-host map carried by each
//! [`HostDescriptor`](crate::host::HostDescriptor). [`EffectiveOptions`] is the
//! per-host view over both:
//!
//! - a key present in the host map wins, whatever its value
//! - otherwise the global value is used
//! - otherwise the documented default for the key applies
//!
//! Override is host-wins, not merge: a host-level `false` suppresses a step
//! even when the global flag is `true`. Views borrow both maps and resolve on
//! every lookup, so changes to host options between steps are always seen.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Recognized option keys.
pub mod keys {
    pub const CONFIGURE: &str = "configure";
    pub const TIMESYNC: &str = "timesync";
    pub const ROOT_KEYS: &str = "root_keys";
    pub const ADD_EL_EXTRAS: &str = "add_el_extras";
    pub const DISABLE_IPTABLES: &str = "disable_iptables";
    pub const DISABLE_UPDATES: &str = "disable_updates";
    pub const HOST_NAME_PREFIX: &str = "host_name_prefix";
    pub const RUN_IN_PARALLEL: &str = "run_in_parallel";
    pub const POOLING_API: &str = "pooling_api";
    pub const POOLING_API_URL: &str = "pooling_api_url";
    pub const STEP_FAILURE: &str = "step_failure";
    pub const NTP_SERVER: &str = "ntp_server";
    pub const ROOT_KEYS_URL: &str = "root_keys_url";
    pub const EPEL_PACKAGE: &str = "epel_package";
    pub const SSH_ENV: &str = "ssh_env";
    /// Hostname assigned by the hostname step during a run.
    pub const VM_HOSTNAME: &str = "vmhostname";

    /// Keys whose values must be booleans.
    pub const FLAGS: &[&str] = &[
        CONFIGURE,
        TIMESYNC,
        ROOT_KEYS,
        ADD_EL_EXTRAS,
        DISABLE_IPTABLES,
        DISABLE_UPDATES,
        POOLING_API,
    ];
}

/// A single option value as written in a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<String>),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a list; a single string is a one-element list.
    pub fn as_list(&self) -> Option<Vec<String>> {
        match self {
            Self::List(items) => Some(items.clone()),
            Self::Str(s) => Some(vec![s.clone()]),
            _ => None,
        }
    }

    /// Short type name used in validation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::List(_) => "list",
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<&[&str]> for OptionValue {
    fn from(value: &[&str]) -> Self {
        Self::List(value.iter().map(|s| s.to_string()).collect())
    }
}

/// Key/value option map shared by global and per-host options.
pub type OptionMap = BTreeMap<String, OptionValue>;

/// Returns the documented default for `key`, if it has one.
pub fn default_value(key: &str) -> Option<OptionValue> {
    match key {
        keys::CONFIGURE | keys::POOLING_API => Some(OptionValue::Bool(true)),
        keys::TIMESYNC
        | keys::ROOT_KEYS
        | keys::ADD_EL_EXTRAS
        | keys::DISABLE_IPTABLES
        | keys::DISABLE_UPDATES => Some(OptionValue::Bool(false)),
        keys::HOST_NAME_PREFIX => Some(OptionValue::Str(String::new())),
        keys::RUN_IN_PARALLEL | keys::SSH_ENV => Some(OptionValue::List(Vec::new())),
        keys::STEP_FAILURE => Some(OptionValue::Str(StepFailurePolicy::default().to_string())),
        keys::NTP_SERVER => Some(OptionValue::Str("pool.ntp.org".to_string())),
        keys::EPEL_PACKAGE => Some(OptionValue::Str("epel-release".to_string())),
        _ => None,
    }
}

/// Execution phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    Provision,
    Configure,
}

/// What happens to the remaining steps of a host after one of its steps fails.
///
/// Other hosts are never affected, whichever policy applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum StepFailurePolicy {
    /// Skip the host's remaining steps.
    #[default]
    Abort,
    /// Keep running the host's remaining steps.
    Continue,
}

/// Profile-wide options, read-only for the duration of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalOptions {
    values: OptionMap,
}

impl GlobalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Sets `key` to `value` in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the raw value for `key`, without defaults.
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn values(&self) -> &OptionMap {
        &self.values
    }

    /// Resolves a global flag with its documented default.
    pub fn flag(&self, key: &str) -> bool {
        EffectiveOptions::global_only(self).flag(key)
    }

    pub fn pooling_api(&self) -> bool {
        self.flag(keys::POOLING_API)
    }

    /// Returns true if `phase` is listed in `run_in_parallel`.
    pub fn run_in_parallel(&self, phase: Phase) -> bool {
        let phase = phase.to_string();
        EffectiveOptions::global_only(self)
            .list(keys::RUN_IN_PARALLEL)
            .iter()
            .any(|p| *p == phase)
    }
}

/// Per-host view over global and host options.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveOptions<'a> {
    global: &'a OptionMap,
    host: Option<&'a OptionMap>,
}

impl<'a> EffectiveOptions<'a> {
    pub fn new(global: &'a GlobalOptions, host: &'a OptionMap) -> Self {
        Self {
            global: &global.values,
            host: Some(host),
        }
    }

    /// View with no host layer.
    pub fn global_only(global: &'a GlobalOptions) -> Self {
        Self {
            global: &global.values,
            host: None,
        }
    }

    /// Returns the explicitly set value for `key`, host layer first.
    pub fn get(&self, key: &str) -> Option<&'a OptionValue> {
        self.host
            .and_then(|host| host.get(key))
            .or_else(|| self.global.get(key))
    }

    /// Returns the resolved value for `key`, falling back to its default.
    pub fn value(&self, key: &str) -> Option<OptionValue> {
        self.get(key).cloned().or_else(|| default_value(key))
    }

    /// Resolves a boolean flag. Unset flags without a default are `false`.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(value) => value.as_bool().unwrap_or_else(|| {
                tracing::warn!(
                    key,
                    "option is a {} where a boolean was expected, using default",
                    value.kind()
                );
                default_flag(key)
            }),
            None => default_flag(key),
        }
    }

    /// Resolves a string option; empty strings are treated as unset.
    pub fn string(&self, key: &str) -> Option<String> {
        self.value(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty())
    }

    /// Resolves a list option; unset lists are empty.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.value(key)
            .and_then(|v| v.as_list())
            .unwrap_or_default()
    }

    /// Resolves the step failure policy for this view.
    pub fn step_failure_policy(&self) -> StepFailurePolicy {
        self.string(keys::STEP_FAILURE)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

fn default_flag(key: &str) -> bool {
    default_value(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// Resolves `key` for a host against the global options.
pub fn effective(global: &GlobalOptions, host: &OptionMap, key: &str) -> Option<OptionValue> {
    EffectiveOptions::new(global, host).value(key)
}
