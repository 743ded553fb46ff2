//! Profile loading and validation.
//!
//! A profile is a YAML document with two top-level keys:
//!
//! ```yaml
//! options:
//!   timesync: true
//!   run_in_parallel: [configure]
//! hosts:
//!   - name: web01
//!     platform: el-7-x86_64
//!     hypervisor: vagrant
//!     options:
//!       timesync: false
//! ```

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HypervisorError;
use crate::host::HostDescriptor;
use crate::hypervisor::{BackendKind, vcloud::parse_pool_url};
use crate::options::{GlobalOptions, OptionMap, Phase, StepFailurePolicy, keys};

/// A loaded profile: global options plus the hosts of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    #[serde(default)]
    pub options: GlobalOptions,
    #[serde(default)]
    pub hosts: Vec<HostDescriptor>,
}

impl Profile {
    /// Checks the profile for errors that would only surface mid-run.
    pub fn validate(&self) -> Result<(), HypervisorError> {
        if self.hosts.is_empty() {
            return Err(HypervisorError::Validation("profile defines no hosts".to_string()));
        }
        validate_options("options", self.options.values())?;

        let mut seen = HashSet::new();
        for (index, host) in self.hosts.iter().enumerate() {
            let label = format!("host {} ({})", index + 1, host.name);
            if host.name.trim().is_empty() {
                return Err(HypervisorError::Validation(format!(
                    "host {} has an empty name",
                    index + 1
                )));
            }
            if host.name.chars().any(char::is_control) {
                return Err(HypervisorError::Validation(format!(
                    "host {} name {:?} contains control characters",
                    index + 1,
                    host.name
                )));
            }
            if !seen.insert(host.name.as_str()) {
                return Err(HypervisorError::Validation(format!(
                    "duplicate host name: {}",
                    host.name
                )));
            }
            if host.platform.trim().is_empty() {
                return Err(HypervisorError::Validation(format!("{} has an empty platform", label)));
            }
            BackendKind::parse(&host.hypervisor)
                .map_err(|e| HypervisorError::Validation(format!("{}: {}", label, e)))?;
            validate_options(&label, &host.options)?;
        }
        debug!("validated profile with {} host(s)", self.hosts.len());
        Ok(())
    }
}

fn invalid(scope: &str, key: &str, reason: impl std::fmt::Display) -> HypervisorError {
    HypervisorError::Validation(format!("{}: option '{}' {}", scope, key, reason))
}

fn validate_options(scope: &str, options: &OptionMap) -> Result<(), HypervisorError> {
    for (key, value) in options {
        let key = key.as_str();
        if keys::FLAGS.contains(&key) && value.as_bool().is_none() {
            return Err(invalid(scope, key, format!("must be a boolean, got {}", value.kind())));
        }
        match key {
            keys::HOST_NAME_PREFIX if value.as_str().is_none() => {
                return Err(invalid(scope, key, format!("must be a string, got {}", value.kind())));
            }
            keys::RUN_IN_PARALLEL => {
                let phases = value.as_list().ok_or_else(|| {
                    invalid(scope, key, format!("must be a list of phases, got {}", value.kind()))
                })?;
                for phase in phases {
                    phase.parse::<Phase>().map_err(|_| {
                        invalid(scope, key, format!("names unknown phase '{}'", phase))
                    })?;
                }
            }
            keys::STEP_FAILURE => {
                let policy = value.as_str().unwrap_or_default();
                policy.parse::<StepFailurePolicy>().map_err(|_| {
                    invalid(scope, key, "must be 'abort' or 'continue'")
                })?;
            }
            keys::POOLING_API_URL => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| invalid(scope, key, "must be a string"))?;
                parse_pool_url(raw).map_err(|e| invalid(scope, key, format!("{:#}", e)))?;
            }
            keys::SSH_ENV => {
                let entries = value
                    .as_list()
                    .ok_or_else(|| invalid(scope, key, "must be a list of KEY=VALUE strings"))?;
                if let Some(bad) = entries.iter().find(|e| !e.contains('=')) {
                    return Err(invalid(scope, key, format!("entry '{}' is not KEY=VALUE", bad)));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Reads and parses a profile from `path`.
pub fn load_profile(path: &Utf8Path) -> Result<Profile, HypervisorError> {
    let file = File::open(path).map_err(|e| HypervisorError::io(path.as_str(), e))?;
    let reader = BufReader::new(file);
    let profile: Profile = serde_yaml::from_reader(reader)
        .map_err(|e| HypervisorError::Config(format!("failed to parse yaml {}: {}", path, e)))?;
    debug!("loaded profile {} with {} host(s)", path, profile.hosts.len());
    Ok(profile)
}
