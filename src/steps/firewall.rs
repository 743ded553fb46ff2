//! `disable_iptables`: host firewall.

use anyhow::Result;
use tracing::info;

use super::StepContext;
use crate::host::{HostDescriptor, PlatformFamily};

/// Firewall stop command for the host's platform.
pub(super) fn firewall_command(host: &HostDescriptor) -> &'static str {
    match (host.family(), host.el_version()) {
        (PlatformFamily::El, Some(version)) if version < 7 => {
            "service iptables stop && chkconfig iptables off"
        }
        (PlatformFamily::El, _) | (PlatformFamily::Fedora, _) => {
            "systemctl stop firewalld && systemctl disable firewalld"
        }
        (PlatformFamily::Ubuntu, _) => "ufw disable",
        _ => "iptables -F",
    }
}

pub(super) fn disable_iptables(ctx: &mut StepContext<'_>) -> Result<()> {
    info!(host = %ctx.host.name, "disabling firewall");
    ctx.run(firewall_command(ctx.host))
}
