//! `sync_root_keys`: shared root SSH keys.

use anyhow::{Result, bail};
use tracing::info;

use super::{StepContext, shell_quote};
use crate::options::keys;

/// Fetches the key-management script from `root_keys_url` and runs it.
pub(super) fn sync_root_keys(ctx: &mut StepContext<'_>) -> Result<()> {
    let Some(url) = ctx.options().string(keys::ROOT_KEYS_URL) else {
        bail!("root_keys is enabled but root_keys_url is not set");
    };
    info!(host = %ctx.host.name, "syncing root keys from {}", url);
    ctx.run(&format!("curl -fsSL {} | bash", shell_quote(&url)))
}
