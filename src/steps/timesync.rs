//! `timesync`: clock synchronization.

use anyhow::{Result, anyhow};
use tracing::{info, warn};

use super::{StepContext, shell_quote};
use crate::options::keys;

/// ntpdate is retried this many times before the step fails.
pub(super) const TIMESYNC_ATTEMPTS: usize = 5;

pub(super) fn timesync(ctx: &mut StepContext<'_>) -> Result<()> {
    let server = ctx
        .options()
        .string(keys::NTP_SERVER)
        .ok_or_else(|| anyhow!("ntp_server must not be empty"))?;
    let command = format!("ntpdate -u {}", shell_quote(&server));

    let mut last_error = None;
    for attempt in 1..=TIMESYNC_ATTEMPTS {
        match ctx.run(&command) {
            Ok(()) => {
                info!(host = %ctx.host.name, "clock synchronized with {}", server);
                return Ok(());
            }
            Err(e) => {
                warn!(
                    host = %ctx.host.name,
                    "timesync attempt {}/{} failed: {:#}",
                    attempt,
                    TIMESYNC_ATTEMPTS,
                    e
                );
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| anyhow!("no timesync attempts made"))
        .context(format!("timesync failed after {} attempts", TIMESYNC_ATTEMPTS)))
}
