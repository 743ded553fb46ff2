mod helpers;

use std::sync::Arc;

use helpers::{BackendCounters, RecordingExecutor, RecordingTransport, make_hosts, register_fake};
use rshypervisor::HypervisorError;
use rshypervisor::hypervisor::{BackendKind, HypervisorRegistry};
use rshypervisor::options::{GlobalOptions, keys};
use rshypervisor::orchestrator::{ExecutionContext, Orchestrator, RunState};
use strum::IntoEnumIterator;

const IDENTIFIERS: [&str; 6] = [
    "vsphere",
    "fusion",
    "vcloud",
    "vagrant",
    "vagrant_fusion",
    "vagrant_virtualbox",
];

/// One registry with a separate counter per kind.
fn counting_registry() -> (HypervisorRegistry, Vec<(BackendKind, Arc<BackendCounters>)>) {
    let mut registry = HypervisorRegistry::empty();
    let mut counters = Vec::new();
    for kind in BackendKind::iter() {
        let c = Arc::new(BackendCounters::default());
        register_fake(&mut registry, kind, &c, false, false);
        counters.push((kind, c));
    }
    (registry, counters)
}

// =============================================================================
// Backend selection
// =============================================================================

#[test]
fn create_invokes_exactly_one_constructor() {
    for name in IDENTIFIERS {
        let (registry, counters) = counting_registry();
        let hosts = make_hosts(2, "el-7-x86_64", name);

        let backend = registry
            .create(name, &hosts, &GlobalOptions::new())
            .expect("known identifier");

        assert_eq!(backend.name(), name);
        assert_eq!(backend.hosts(), ["host1", "host2"]);
        for (kind, c) in &counters {
            let expected = usize::from(kind.to_string() == name);
            assert_eq!(c.constructed(), expected, "{} constructing {}", kind, name);
        }
    }
}

#[test]
fn vcloud_without_pooling_api_selects_direct_backend() {
    let (registry, counters) = counting_registry();
    let hosts = make_hosts(1, "el-7-x86_64", "vcloud");
    let options = GlobalOptions::new().with(keys::POOLING_API, false);

    let backend = registry.create("vcloud", &hosts, &options).unwrap();

    assert_eq!(backend.name(), "vcloud_direct");
    for (kind, c) in &counters {
        let expected = usize::from(*kind == BackendKind::VcloudDirect);
        assert_eq!(c.constructed(), expected, "{}", kind);
    }
}

#[test]
fn vcloud_with_pooling_api_selects_pooled_backend() {
    let (registry, _) = counting_registry();
    let hosts = make_hosts(1, "el-7-x86_64", "vcloud");
    let backend = registry
        .create("vcloud", &hosts, &GlobalOptions::new())
        .unwrap();
    assert_eq!(backend.name(), "vcloud");
}

#[test]
fn unknown_identifier_constructs_nothing() {
    let (registry, counters) = counting_registry();
    let hosts = make_hosts(1, "el-7-x86_64", "xen");

    for name in ["xen", "VSPHERE", "", "vagrant "] {
        let err = registry
            .create(name, &hosts, &GlobalOptions::new())
            .err()
            .expect("unknown identifier must fail");
        assert!(matches!(err, HypervisorError::UnknownBackend { .. }), "{}", name);
    }
    assert!(counters.iter().all(|(_, c)| c.constructed() == 0));
}

#[test]
fn builtin_registry_knows_every_identifier() {
    let executor = Arc::new(RecordingExecutor::default());
    let registry = HypervisorRegistry::builtin(executor.clone());
    let options = GlobalOptions::new().with(keys::POOLING_API_URL, "https://pool.example.com");

    for name in IDENTIFIERS {
        let hosts = make_hosts(1, "el-7-x86_64", name);
        let backend = registry.create(name, &hosts, &options).unwrap();
        assert_eq!(backend.name(), name);
    }
    assert!(executor.calls.lock().unwrap().is_empty(), "construction must not run commands");
}

// =============================================================================
// Provisioning through the orchestrator
// =============================================================================

#[test]
fn provision_creates_one_backend_per_partition() {
    let counters = Arc::new(BackendCounters::default());
    let mut hosts = make_hosts(2, "el-7-x86_64", "vagrant");
    hosts.extend(make_hosts(1, "el-7-x86_64", "vsphere").into_iter().map(|mut h| {
        h.name = "vs1".to_string();
        h
    }));
    let options = GlobalOptions::new();
    let context = helpers::fake_context(&counters, Arc::new(RecordingTransport::default()));
    let mut orchestrator = Orchestrator::new(&mut hosts, &options, context);

    orchestrator.provision().unwrap();

    assert_eq!(orchestrator.state(), RunState::Provisioned);
    assert_eq!(orchestrator.backends(), ["vagrant", "vsphere"]);
    assert_eq!(counters.constructed(), 2);
    assert_eq!(counters.provisioned(), 2);
    orchestrator.cleanup().unwrap();
    assert_eq!(counters.cleaned_up(), 2);
}

#[test]
fn unknown_backend_aborts_before_provisioning() {
    let counters = Arc::new(BackendCounters::default());
    let mut hosts = make_hosts(1, "el-7-x86_64", "vagrant");
    hosts.extend(make_hosts(1, "el-7-x86_64", "xen"));
    let options = GlobalOptions::new();
    let context = helpers::fake_context(&counters, Arc::new(RecordingTransport::default()));
    let mut orchestrator = Orchestrator::new(&mut hosts, &options, context);

    let err = orchestrator.provision().unwrap_err();

    assert!(matches!(err, HypervisorError::UnknownBackend { ref name } if name == "xen"));
    assert_eq!(counters.provisioned(), 0);
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert!(orchestrator.configure().is_err());
}

#[test]
fn provision_failure_aborts_run() {
    for parallel in [false, true] {
        let good = Arc::new(BackendCounters::default());
        let bad = Arc::new(BackendCounters::default());
        let mut registry = helpers::fake_registry(&good);
        register_fake(&mut registry, BackendKind::Fusion, &bad, true, false);
        let context = ExecutionContext::new(registry, Arc::new(RecordingTransport::default()));

        let mut hosts = make_hosts(2, "el-7-x86_64", "vagrant");
        hosts[1].hypervisor = "fusion".to_string();
        let mut options = GlobalOptions::new();
        if parallel {
            options.set(keys::RUN_IN_PARALLEL, vec!["provision".to_string()]);
        }
        let mut orchestrator = Orchestrator::new(&mut hosts, &options, context);

        let err = orchestrator.provision().unwrap_err();

        assert!(
            matches!(err, HypervisorError::Provision { ref backend, .. } if backend == "fusion"),
            "{}",
            err
        );
        assert_eq!(orchestrator.state(), RunState::Failed);
        assert!(matches!(
            orchestrator.configure().unwrap_err(),
            HypervisorError::InvalidState { .. }
        ));

        // constructed backends are still released
        orchestrator.cleanup().unwrap();
        assert_eq!(good.cleaned_up() + bad.cleaned_up(), 2);
    }
}

#[test]
fn sequential_provision_stops_at_failed_partition() {
    let good = Arc::new(BackendCounters::default());
    let bad = Arc::new(BackendCounters::default());
    let mut registry = helpers::fake_registry(&good);
    register_fake(&mut registry, BackendKind::Fusion, &bad, true, false);
    let context = ExecutionContext::new(registry, Arc::new(RecordingTransport::default()));

    let mut hosts = make_hosts(3, "el-7-x86_64", "fusion");
    hosts[1].hypervisor = "vagrant".to_string();
    hosts[2].hypervisor = "vsphere".to_string();
    let options = GlobalOptions::new();
    let mut orchestrator = Orchestrator::new(&mut hosts, &options, context);

    let err = orchestrator.provision().unwrap_err();

    assert!(matches!(err, HypervisorError::Provision { ref backend, .. } if backend == "fusion"));
    assert_eq!(bad.provisioned(), 1);
    assert_eq!(good.provisioned(), 0);
    assert_eq!(orchestrator.backends(), ["fusion", "vagrant", "vsphere"]);

    orchestrator.cleanup().unwrap();
    assert_eq!(bad.cleaned_up(), 1);
    assert_eq!(good.cleaned_up(), 2);
}

#[test]
fn cleanup_attempts_every_backend() {
    let good = Arc::new(BackendCounters::default());
    let bad = Arc::new(BackendCounters::default());
    let mut registry = helpers::fake_registry(&good);
    register_fake(&mut registry, BackendKind::Vagrant, &bad, false, true);
    let context = ExecutionContext::new(registry, Arc::new(RecordingTransport::default()));

    let mut hosts = make_hosts(3, "el-7-x86_64", "vagrant");
    hosts[1].hypervisor = "vsphere".to_string();
    hosts[2].hypervisor = "fusion".to_string();
    let options = GlobalOptions::new();
    let mut orchestrator = Orchestrator::new(&mut hosts, &options, context);
    orchestrator.provision().unwrap();

    let err = orchestrator.cleanup().unwrap_err();

    assert!(matches!(err, HypervisorError::Cleanup { ref backend, .. } if backend == "vagrant"));
    assert_eq!(bad.cleaned_up(), 1);
    assert_eq!(good.cleaned_up(), 2);
    // backends are released once
    orchestrator.cleanup().unwrap();
    assert_eq!(good.cleaned_up(), 2);
}

#[test]
fn parallel_provision_runs_every_partition() {
    let counters = Arc::new(BackendCounters::default());
    let mut hosts = make_hosts(3, "el-7-x86_64", "vagrant");
    hosts[1].hypervisor = "vsphere".to_string();
    hosts[2].hypervisor = "fusion".to_string();
    let options = GlobalOptions::new().with(keys::RUN_IN_PARALLEL, vec!["provision".to_string()]);
    let context = helpers::fake_context(&counters, Arc::new(RecordingTransport::default()));
    let mut orchestrator = Orchestrator::new(&mut hosts, &options, context);

    orchestrator.provision().unwrap();

    let mut provisioned = counters.provisioned_hosts.lock().unwrap().clone();
    provisioned.sort();
    assert_eq!(provisioned, ["host1", "host2", "host3"]);
}
