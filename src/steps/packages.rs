//! Package repository and update steps.

use anyhow::Result;
use tracing::{debug, info};

use super::{StepContext, shell_quote};
use crate::host::{HostDescriptor, PlatformFamily};
use crate::options::keys;

/// Installs the extra EL repository package unless already present.
///
/// Non-EL hosts are left untouched.
pub(super) fn add_el_extras(ctx: &mut StepContext<'_>) -> Result<()> {
    if ctx.host.family() != PlatformFamily::El {
        debug!(host = %ctx.host.name, "not an EL platform, nothing to add");
        return Ok(());
    }
    let package = ctx
        .options()
        .string(keys::EPEL_PACKAGE)
        .unwrap_or_else(|| "epel-release".to_string());
    let package = shell_quote(&package);
    info!(host = %ctx.host.name, "adding EL extras repository");
    ctx.run(&format!("rpm -q {0} || yum install -y {0}", package))
}

/// Automatic-update suppression command for the host's platform.
pub(super) fn updates_command(host: &HostDescriptor) -> &'static str {
    match (host.family(), host.el_version()) {
        (PlatformFamily::El, Some(version)) if version < 7 => {
            "service yum-cron stop; chkconfig yum-cron off; true"
        }
        (PlatformFamily::El, _) | (PlatformFamily::Fedora, _) => {
            "systemctl disable --now dnf-automatic.timer yum-cron 2>/dev/null; true"
        }
        (PlatformFamily::Debian, _) | (PlatformFamily::Ubuntu, _) => {
            "printf 'APT::Periodic::Update-Package-Lists \"0\";\\nAPT::Periodic::Unattended-Upgrade \"0\";\\n' \
             > /etc/apt/apt.conf.d/99-disable-updates"
        }
        _ => "true",
    }
}

pub(super) fn disable_updates(ctx: &mut StepContext<'_>) -> Result<()> {
    info!(host = %ctx.host.name, "disabling automatic updates");
    ctx.run(updates_command(ctx.host))
}
