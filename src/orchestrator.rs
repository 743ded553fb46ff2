//! Run orchestration: provisioning, configuration and cleanup.
//!
//! An [`Orchestrator`] borrows the host list and the global options of a
//! profile and drives them through a single run:
//!
//! 1. **provision**: partition hosts by backend identifier, construct every
//!    backend, then provision the partitions
//! 2. **configure**: plan the applicable steps per host and run each host's
//!    sequence as one work item
//! 3. **cleanup**: release every constructed backend
//!
//! Workers only ever see their own copy of a host. Anything a worker reports
//! back (the assigned hostname) is merged into the canonical host list here,
//! after the batch has completed.

use std::sync::Arc;

use strum::Display;
use tracing::{debug, error, info, warn};

use crate::error::HypervisorError;
use crate::executor::CommandExecutor;
use crate::host::HostDescriptor;
use crate::hypervisor::{Hypervisor, HypervisorRegistry};
use crate::options::{EffectiveOptions, GlobalOptions, OptionValue, Phase, StepFailurePolicy, keys};
use crate::steps::{self, Step, StepContext};
use crate::strategy::ExecutionStrategy;
use crate::transport::{HostTransport, SshTransport};

/// Collaborators an orchestrator works with, passed in explicitly.
pub struct ExecutionContext {
    registry: HypervisorRegistry,
    transport: Arc<dyn HostTransport>,
}

impl ExecutionContext {
    pub fn new(registry: HypervisorRegistry, transport: Arc<dyn HostTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Built-in backends and SSH transport, all running through `executor`.
    pub fn with_executor(executor: Arc<dyn CommandExecutor>) -> Self {
        Self::new(
            HypervisorRegistry::builtin(Arc::clone(&executor)),
            Arc::new(SshTransport::new(executor)),
        )
    }

    pub fn registry(&self) -> &HypervisorRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &dyn HostTransport {
        self.transport.as_ref()
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Provisioned,
    Configuring,
    Configured,
    /// A run that aborted, or finished configuring with failed hosts.
    Failed,
}

/// How a single planned step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    Failed(String),
    /// Not attempted because an earlier step failed under the abort policy.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Step,
    pub outcome: StepOutcome,
}

/// Configuration outcome for one host.
#[derive(Debug)]
pub struct HostResult {
    pub host: String,
    /// Planned steps in run order, with their outcomes.
    pub steps: Vec<StepRecord>,
    pub assigned_host_name: Option<String>,
    /// First failure on this host, if any.
    pub failure: Option<HypervisorError>,
}

impl HostResult {
    fn untouched(host: &HostDescriptor) -> Self {
        Self {
            host: host.name.clone(),
            steps: Vec::new(),
            assigned_host_name: None,
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Returns true if `step` was attempted on this host.
    pub fn ran(&self, step: Step) -> bool {
        self.steps
            .iter()
            .any(|r| r.step == step && r.outcome != StepOutcome::Skipped)
    }

    /// Steps that were attempted, in run order.
    pub fn attempted(&self) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|r| r.outcome != StepOutcome::Skipped)
            .map(|r| r.step)
            .collect()
    }
}

/// Per-host results of a configuration phase, in host-list order.
#[derive(Debug)]
pub struct ConfigureReport {
    pub hosts: Vec<HostResult>,
    pub strategy: ExecutionStrategy,
    /// Number of hosts whose steps ran on their own worker.
    pub isolated_dispatches: usize,
}

impl ConfigureReport {
    pub fn host(&self, name: &str) -> Option<&HostResult> {
        self.hosts.iter().find(|h| h.host == name)
    }

    pub fn failed_hosts(&self) -> impl Iterator<Item = &HostResult> {
        self.hosts.iter().filter(|h| !h.succeeded())
    }

    pub fn is_success(&self) -> bool {
        self.hosts.iter().all(HostResult::succeeded)
    }
}

/// One host's share of the configuration phase.
struct HostWork {
    host: HostDescriptor,
    steps: Vec<Step>,
}

/// Drives one run over a borrowed host list.
pub struct Orchestrator<'a> {
    hosts: &'a mut [HostDescriptor],
    options: &'a GlobalOptions,
    context: ExecutionContext,
    hypervisors: Vec<Box<dyn Hypervisor>>,
    state: RunState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        hosts: &'a mut [HostDescriptor],
        options: &'a GlobalOptions,
        context: ExecutionContext,
    ) -> Self {
        Self {
            hosts,
            options,
            context,
            hypervisors: Vec::new(),
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn hosts(&self) -> &[HostDescriptor] {
        self.hosts
    }

    /// Names of the constructed backends, in partition order.
    pub fn backends(&self) -> Vec<&'static str> {
        self.hypervisors.iter().map(|h| h.name()).collect()
    }

    /// Creates the backend `name` for `hosts` through the registry.
    pub fn create(
        &self,
        name: &str,
        hosts: &[HostDescriptor],
    ) -> Result<Box<dyn Hypervisor>, HypervisorError> {
        self.context.registry.create(name, hosts, self.options)
    }

    /// Groups hosts by backend identifier, in first-seen order.
    pub fn partitions(&self) -> Vec<(String, Vec<HostDescriptor>)> {
        let mut partitions: Vec<(String, Vec<HostDescriptor>)> = Vec::new();
        for host in self.hosts.iter() {
            match partitions.iter_mut().find(|(name, _)| *name == host.hypervisor) {
                Some((_, members)) => members.push(host.clone()),
                None => partitions.push((host.hypervisor.clone(), vec![host.clone()])),
            }
        }
        partitions
    }

    fn expect_state(&self, expected: RunState, operation: &'static str) -> Result<(), HypervisorError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HypervisorError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Constructs every backend, then provisions them.
    ///
    /// No backend is provisioned unless all of them could be constructed.
    /// Any provisioning failure aborts the run: run sequentially, later
    /// partitions are not provisioned at all. Backends constructed so far
    /// are kept so that [`Orchestrator::cleanup`] can release them.
    pub fn provision(&mut self) -> Result<(), HypervisorError> {
        self.expect_state(RunState::NotStarted, "provision")?;

        let mut hypervisors = Vec::new();
        for (name, members) in self.partitions() {
            match self.create(&name, &members) {
                Ok(hypervisor) => hypervisors.push(hypervisor),
                Err(e) => {
                    self.state = RunState::Failed;
                    return Err(e);
                }
            }
        }
        self.hypervisors = hypervisors;

        let strategy = ExecutionStrategy::for_phase(self.options, Phase::Provision);
        info!(
            "provisioning {} backend(s) for {} host(s) ({})",
            self.hypervisors.len(),
            self.hosts.len(),
            strategy
        );
        let items = self
            .hypervisors
            .iter_mut()
            .map(|h| (h.name().to_string(), h))
            .collect();
        let provisioned = strategy.run_until_failure(
            Phase::Provision,
            items,
            |hypervisor: &mut Box<dyn Hypervisor>| {
                info!(
                    "provisioning {} with {}",
                    hypervisor.hosts().join(", "),
                    hypervisor.name()
                );
                hypervisor
                    .provision()
                    .map_err(|e| HypervisorError::Provision {
                        backend: hypervisor.name().to_string(),
                        reason: format!("{:#}", e),
                    })
            },
        );

        if let Err(err) = provisioned {
            error!("{}", err);
            self.state = RunState::Failed;
            return Err(err);
        }
        self.record_issued_host_names();
        self.state = RunState::Provisioned;
        Ok(())
    }

    /// Stores hostnames chosen by backends as the hosts' `vmhostname`.
    fn record_issued_host_names(&mut self) {
        for hypervisor in &self.hypervisors {
            for (name, issued) in hypervisor.issued_host_names() {
                if let Some(host) = self.hosts.iter_mut().find(|h| h.name == name) {
                    debug!(host = %name, "{} issued hostname {}", hypervisor.name(), issued);
                    host.options
                        .insert(keys::VM_HOSTNAME.to_string(), OptionValue::Str(issued));
                }
            }
        }
    }

    /// Runs the applicable steps on every host.
    ///
    /// Step failures never abort the phase; they are reported per host.
    /// Whether a host's remaining steps still run after one of them failed
    /// follows that host's `step_failure` policy.
    pub fn configure(&mut self) -> Result<ConfigureReport, HypervisorError> {
        self.expect_state(RunState::Provisioned, "configure")?;
        let strategy = ExecutionStrategy::for_phase(self.options, Phase::Configure);

        if !self.options.flag(keys::CONFIGURE) {
            info!("configure is disabled, skipping host configuration");
            self.state = RunState::Configured;
            return Ok(ConfigureReport {
                hosts: self.hosts.iter().map(HostResult::untouched).collect(),
                strategy,
                isolated_dispatches: 0,
            });
        }

        self.state = RunState::Configuring;
        let mut results: Vec<Option<HostResult>> = self.hosts.iter().map(|_| None).collect();
        let mut indices = Vec::new();
        let mut items = Vec::new();
        for (index, host) in self.hosts.iter().enumerate() {
            let planned = steps::plan(host, self.options);
            if planned.is_empty() {
                results[index] = Some(HostResult::untouched(host));
                continue;
            }
            indices.push(index);
            items.push((
                host.name.clone(),
                HostWork {
                    host: host.clone(),
                    steps: planned,
                },
            ));
        }

        info!("configuring {} host(s) ({})", items.len(), strategy);
        let global = self.options;
        let transport = self.context.transport();
        let batch = strategy.run(Phase::Configure, items, |work| {
            Ok(configure_host(work, global, transport))
        });

        for (index, result) in indices.into_iter().zip(batch.results) {
            let host = &mut self.hosts[index];
            let result = result.unwrap_or_else(|err| {
                error!(host = %host.name, "{}", err);
                HostResult {
                    failure: Some(err),
                    ..HostResult::untouched(host)
                }
            });
            if let Some(name) = &result.assigned_host_name {
                host.options
                    .insert(keys::VM_HOSTNAME.to_string(), OptionValue::Str(name.clone()));
            }
            results[index] = Some(result);
        }

        let report = ConfigureReport {
            hosts: results.into_iter().flatten().collect(),
            strategy,
            isolated_dispatches: batch.isolated_dispatches,
        };
        if report.is_success() {
            self.state = RunState::Configured;
        } else {
            warn!("{} host(s) failed configuration", report.failed_hosts().count());
            self.state = RunState::Failed;
        }
        Ok(report)
    }

    /// Releases every constructed backend.
    ///
    /// All backends are attempted; the first failure is returned after
    /// every backend has been tried.
    pub fn cleanup(&mut self) -> Result<(), HypervisorError> {
        let mut first = None;
        for mut hypervisor in self.hypervisors.drain(..) {
            info!("cleaning up {} hosts", hypervisor.name());
            if let Err(e) = hypervisor.cleanup() {
                let err = HypervisorError::Cleanup {
                    backend: hypervisor.name().to_string(),
                    reason: format!("{:#}", e),
                };
                error!("{}", err);
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

/// Runs one host's planned steps in order on the worker's own host copy.
fn configure_host(
    work: HostWork,
    global: &GlobalOptions,
    transport: &dyn HostTransport,
) -> HostResult {
    let HostWork { mut host, steps } = work;
    let name = host.name.clone();
    let policy = EffectiveOptions::new(global, &host.options).step_failure_policy();

    let mut records = Vec::with_capacity(steps.len());
    let mut failure = None;
    {
        let mut ctx = StepContext::new(&mut host, global, transport);
        for step in steps {
            if failure.is_some() && policy == StepFailurePolicy::Abort {
                debug!(host = %name, step = %step, "skipped after earlier failure");
                records.push(StepRecord {
                    step,
                    outcome: StepOutcome::Skipped,
                });
                continue;
            }
            info!(host = %name, step = %step, "applying step");
            match step.apply(&mut ctx) {
                Ok(()) => records.push(StepRecord {
                    step,
                    outcome: StepOutcome::Applied,
                }),
                Err(e) => {
                    let reason = format!("{:#}", e);
                    error!(host = %name, step = %step, "step failed: {}", reason);
                    records.push(StepRecord {
                        step,
                        outcome: StepOutcome::Failed(reason.clone()),
                    });
                    failure.get_or_insert(HypervisorError::Step {
                        host: name.clone(),
                        step: step.to_string(),
                        reason,
                    });
                }
            }
        }
    }

    HostResult {
        assigned_host_name: host.assigned_host_name().map(str::to_string),
        host: name,
        steps: records,
        failure,
    }
}
