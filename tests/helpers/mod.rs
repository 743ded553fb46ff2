//! Shared test doubles and fixtures.

#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use camino::Utf8Path;
use rshypervisor::HypervisorError;
use rshypervisor::config::{Profile, load_profile};
use rshypervisor::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use rshypervisor::host::HostDescriptor;
use rshypervisor::hypervisor::{BackendKind, Hypervisor, HypervisorRegistry};
use rshypervisor::orchestrator::ExecutionContext;
use rshypervisor::transport::HostTransport;

/// Executor that records every command without running it.
///
/// Commands whose line contains a `failures` fragment fail. Capturing
/// commands get the first `responses` entry whose fragment they contain.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<CommandSpec>>,
    pub failures: Vec<String>,
    pub responses: Vec<(String, String)>,
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, spec: &CommandSpec) -> anyhow::Result<ExecutionResult> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = command_line(spec);
        if self.failures.iter().any(|f| line.contains(f.as_str())) {
            bail!("simulated failure running `{}`", line);
        }
        let stdout = if spec.capture_stdout {
            self.responses
                .iter()
                .find(|(fragment, _)| line.contains(fragment.as_str()))
                .map(|(_, body)| body.clone())
        } else {
            None
        };
        Ok(ExecutionResult { status: None, stdout })
    }
}

fn command_line(spec: &CommandSpec) -> String {
    std::iter::once(spec.command.clone())
        .chain(spec.args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

impl RecordingExecutor {
    pub fn failing_on(fragment: &str) -> Self {
        Self {
            failures: vec![fragment.to_string()],
            ..Self::default()
        }
    }

    /// Answers capturing commands containing `fragment` with `body`.
    pub fn respond(mut self, fragment: &str, body: &str) -> Self {
        self.responses.push((fragment.to_string(), body.to_string()));
        self
    }

    /// Recorded command lines as `command arg arg ...`.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(command_line).collect()
    }
}

/// One command sent to a host.
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub host: String,
    pub command: String,
    pub env: Vec<(String, String)>,
    pub thread: Option<String>,
}

/// Transport that records commands per host and fails on request.
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<TransportCall>>,
    /// `(host, fragment)`: commands on `host` containing `fragment` fail.
    pub failures: Vec<(String, String)>,
}

impl RecordingTransport {
    pub fn failing_on(host: &str, fragment: &str) -> Self {
        Self {
            failures: vec![(host.to_string(), fragment.to_string())],
            ..Self::default()
        }
    }

    /// Commands run on `host`, in order.
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.host == host)
            .map(|c| c.command.clone())
            .collect()
    }

    /// Number of commands on `host` containing `fragment`.
    pub fn count(&self, host: &str, fragment: &str) -> usize {
        self.commands_for(host)
            .iter()
            .filter(|c| c.contains(fragment))
            .count()
    }
}

impl HostTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn run(
        &self,
        host: &HostDescriptor,
        command: &str,
        env: &[(String, String)],
    ) -> anyhow::Result<ExecutionResult> {
        self.calls.lock().unwrap().push(TransportCall {
            host: host.name.clone(),
            command: command.to_string(),
            env: env.to_vec(),
            thread: std::thread::current().name().map(str::to_string),
        });
        if self
            .failures
            .iter()
            .any(|(h, fragment)| *h == host.name && command.contains(fragment.as_str()))
        {
            bail!("simulated failure running `{}` on {}", command, host.name);
        }
        Ok(ExecutionResult::skipped())
    }
}

/// Counters shared between a registry and the backends it creates.
#[derive(Default)]
pub struct BackendCounters {
    pub constructed: AtomicUsize,
    pub provisioned: AtomicUsize,
    pub cleaned_up: AtomicUsize,
    pub provisioned_hosts: Mutex<Vec<String>>,
}

impl BackendCounters {
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn provisioned(&self) -> usize {
        self.provisioned.load(Ordering::SeqCst)
    }

    pub fn cleaned_up(&self) -> usize {
        self.cleaned_up.load(Ordering::SeqCst)
    }
}

/// Backend double that only counts calls.
pub struct FakeHypervisor {
    name: &'static str,
    hosts: Vec<String>,
    fail_provision: bool,
    fail_cleanup: bool,
    counters: Arc<BackendCounters>,
}

impl Hypervisor for FakeHypervisor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn hosts(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn provision(&mut self) -> anyhow::Result<()> {
        self.counters.provisioned.fetch_add(1, Ordering::SeqCst);
        if self.fail_provision {
            bail!("simulated provisioning failure");
        }
        self.counters
            .provisioned_hosts
            .lock()
            .unwrap()
            .extend(self.hosts.iter().cloned());
        Ok(())
    }

    fn cleanup(&mut self) -> anyhow::Result<()> {
        self.counters.cleaned_up.fetch_add(1, Ordering::SeqCst);
        if self.fail_cleanup {
            bail!("simulated cleanup failure");
        }
        Ok(())
    }
}

/// Registers a counting [`FakeHypervisor`] constructor for `kind`.
pub fn register_fake(
    registry: &mut HypervisorRegistry,
    kind: BackendKind,
    counters: &Arc<BackendCounters>,
    fail_provision: bool,
    fail_cleanup: bool,
) {
    let counters = Arc::clone(counters);
    registry.register(kind, move |hosts, _| {
        counters.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeHypervisor {
            name: kind.into(),
            hosts: hosts.iter().map(|h| h.name.clone()).collect(),
            fail_provision,
            fail_cleanup,
            counters: Arc::clone(&counters),
        }))
    });
}

/// Registry where every backend kind is a healthy [`FakeHypervisor`].
pub fn fake_registry(counters: &Arc<BackendCounters>) -> HypervisorRegistry {
    use strum::IntoEnumIterator;

    let mut registry = HypervisorRegistry::empty();
    for kind in BackendKind::iter() {
        register_fake(&mut registry, kind, counters, false, false);
    }
    registry
}

/// Context with fake backends and the given transport.
pub fn fake_context(
    counters: &Arc<BackendCounters>,
    transport: Arc<RecordingTransport>,
) -> ExecutionContext {
    ExecutionContext::new(fake_registry(counters), transport)
}

/// Creates `count` hosts named `host1..` on `platform` and `hypervisor`.
pub fn make_hosts(count: usize, platform: &str, hypervisor: &str) -> Vec<HostDescriptor> {
    (1..=count)
        .map(|i| HostDescriptor::new(format!("host{}", i), platform, hypervisor))
        .collect()
}

/// Writes `yaml` to a temporary file and loads it as a profile.
pub fn load_profile_from_yaml(yaml: impl AsRef<str>) -> Result<Profile, HypervisorError> {
    let mut file = tempfile::Builder::new()
        .suffix(".yml")
        .tempfile()
        .expect("failed to create temp file");
    file.write_all(yaml.as_ref().as_bytes())
        .expect("failed to write temp file");
    let path = Utf8Path::from_path(file.path()).expect("temp path is not UTF-8");
    load_profile(path)
}
