//! SSH transport.

use std::sync::Arc;

use anyhow::Result;

use super::HostTransport;
use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use crate::host::HostDescriptor;
use crate::options::OptionValue;
use crate::steps::shell_quote;

/// Runs host commands through the local `ssh` client.
///
/// Connection settings come from the host option map: `user` (default
/// `root`), `port`, `ssh_key` and `ip`.
pub struct SshTransport {
    executor: Arc<dyn CommandExecutor>,
}

impl SshTransport {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Builds the `ssh` invocation for `command` on `host`.
    pub fn build_spec(
        &self,
        host: &HostDescriptor,
        command: &str,
        env: &[(String, String)],
    ) -> CommandSpec {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ];
        match host.options.get("port") {
            Some(OptionValue::Int(port)) => {
                args.extend(["-p".to_string(), port.to_string()]);
            }
            Some(OptionValue::Str(port)) => {
                args.extend(["-p".to_string(), port.clone()]);
            }
            _ => {}
        }
        if let Some(key) = host.options.get("ssh_key").and_then(OptionValue::as_str) {
            args.extend(["-i".to_string(), key.to_string()]);
        }
        let user = host
            .options
            .get("user")
            .and_then(OptionValue::as_str)
            .unwrap_or("root");
        args.push(format!("{}@{}", user, host.address()));
        args.push("--".to_string());

        let remote = if env.is_empty() {
            command.to_string()
        } else {
            let assignments: Vec<String> = env
                .iter()
                .map(|(k, v)| format!("{}={}", k, shell_quote(v)))
                .collect();
            format!("env {} {}", assignments.join(" "), command)
        };
        args.push(remote);

        CommandSpec::new("ssh", args).with_label(host.name.clone())
    }
}

impl HostTransport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn run(
        &self,
        host: &HostDescriptor,
        command: &str,
        env: &[(String, String)],
    ) -> Result<ExecutionResult> {
        let spec = self.build_spec(host, command, env);
        self.executor.execute(&spec)
    }
}
