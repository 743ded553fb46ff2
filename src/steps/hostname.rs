//! Prefixed hostname generation and assignment.

use anyhow::{Result, bail};
use tracing::info;

use super::{StepContext, shell_quote};
use crate::options::{OptionValue, keys};

/// Length of the random suffix appended to the prefix.
pub const HOST_NAME_SUFFIX_LEN: usize = 32;

/// Returns `prefix` followed by a random 32-character lowercase hex suffix.
///
/// Suffixes come from UUIDv4 values, so collisions within a process are not
/// a practical concern.
pub fn generate_host_name(prefix: &str) -> String {
    let mut buf = uuid::Uuid::encode_buffer();
    let suffix = uuid::Uuid::new_v4().simple().encode_lower(&mut buf);
    format!("{}{}", prefix, suffix)
}

/// Generates a name for the host, sets it, and records it as `vmhostname`
/// on the worker's copy of the host.
pub(super) fn assign_host_name(ctx: &mut StepContext<'_>) -> Result<()> {
    if let Some(existing) = ctx.host.assigned_host_name() {
        bail!("host already has assigned hostname {}", existing);
    }
    let Some(prefix) = ctx.options().string(keys::HOST_NAME_PREFIX) else {
        bail!("host_name_prefix is empty");
    };
    let name = generate_host_name(&prefix);
    info!(host = %ctx.host.name, "assigning hostname {}", name);
    ctx.run(&format!("hostname {}", shell_quote(&name)))?;
    ctx.host
        .options
        .insert(keys::VM_HOSTNAME.to_string(), OptionValue::Str(name));
    Ok(())
}
