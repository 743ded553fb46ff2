//! `set_env`: per-host environment.

use anyhow::{Result, bail};
use tracing::info;

use super::{StepContext, shell_quote};
use crate::host::PlatformFamily;
use crate::options::keys;

const SYSTEM_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Builds the environment for the host and persists it to
/// `~/.ssh/environment`, then makes it current for the remaining steps.
pub(super) fn set_env(ctx: &mut StepContext<'_>) -> Result<()> {
    let path = match ctx.host.family() {
        PlatformFamily::Other => "/usr/bin:/bin".to_string(),
        _ => SYSTEM_PATH.to_string(),
    };
    let mut env = vec![("PATH".to_string(), path)];

    for entry in ctx.options().list(keys::SSH_ENV) {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("ssh_env entry '{}' is not KEY=VALUE", entry);
        };
        if key.is_empty() {
            bail!("ssh_env entry '{}' has an empty key", entry);
        }
        env.retain(|(k, _)| k != key);
        env.push((key.to_string(), value.to_string()));
    }

    let lines: Vec<String> = env
        .iter()
        .map(|(k, v)| shell_quote(&format!("{}={}", k, v)))
        .collect();
    info!(host = %ctx.host.name, "setting {} environment variable(s)", env.len());
    ctx.run(&format!(
        "mkdir -p ~/.ssh && chmod 0700 ~/.ssh && printf '%s\\n' {} > ~/.ssh/environment",
        lines.join(" ")
    ))?;

    ctx.env = env;
    Ok(())
}
