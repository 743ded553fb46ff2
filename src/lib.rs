pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod hypervisor;
pub mod options;
pub mod orchestrator;
pub mod steps;
pub mod strategy;
pub mod transport;

pub use error::HypervisorError;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use strum::IntoEnumIterator;
use tracing::{error, info, warn};
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::executor::CommandExecutor;
use crate::hypervisor::BackendKind;
use crate::orchestrator::{ConfigureReport, ExecutionContext, Orchestrator, StepOutcome};

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Logs one line per host, plus the reason for every failed step.
fn log_report(report: &ConfigureReport) {
    info!(
        "configuration finished ({}, {} isolated dispatch(es))",
        report.strategy, report.isolated_dispatches
    );
    for result in &report.hosts {
        let steps: Vec<String> = result.attempted().iter().map(|s| s.to_string()).collect();
        match &result.failure {
            None => info!(host = %result.host, "ok: [{}]", steps.join(", ")),
            Some(err) => error!(host = %result.host, "failed: {}", err),
        }
        for record in &result.steps {
            if let StepOutcome::Failed(reason) = &record.outcome {
                warn!(host = %result.host, step = %record.step, "{}", reason);
            }
        }
        if let Some(name) = &result.assigned_host_name {
            info!(host = %result.host, "assigned hostname {}", name);
        }
    }
}

pub fn run_apply(opts: &cli::ApplyArgs, executor: Arc<dyn CommandExecutor>) -> Result<()> {
    let file = &opts.common.file;
    let mut profile = config::load_profile(file)
        .with_context(|| format!("failed to load profile from {}", file))?;
    profile.validate().context("profile validation failed")?;

    let context = ExecutionContext::with_executor(executor);
    let mut orchestrator = Orchestrator::new(&mut profile.hosts, &profile.options, context);

    let run_result = (|| -> Result<ConfigureReport> {
        orchestrator.provision()?;
        Ok(orchestrator.configure()?)
    })();

    let cleanup_result = if opts.no_cleanup {
        info!("leaving hosts running");
        Ok(())
    } else {
        orchestrator.cleanup()
    };

    let report = match (run_result, cleanup_result) {
        (Ok(report), Ok(())) => report,
        (Ok(_), Err(e)) => return Err(e).context("failed to clean up hosts"),
        (Err(e), Ok(())) => return Err(e),
        (Err(run_err), Err(cleanup_err)) => {
            error!("cleanup also failed: {:#}", cleanup_err);
            return Err(run_err);
        }
    };

    log_report(&report);
    let failed: Vec<&str> = report.failed_hosts().map(|h| h.host.as_str()).collect();
    if !failed.is_empty() {
        bail!("{} host(s) failed configuration: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

pub fn run_validate(opts: &cli::ValidateArgs) -> Result<()> {
    let profile = config::load_profile(&opts.common.file)?;
    profile.validate().context("profile validation failed")?;
    info!("validation successful:\n{:#?}", profile);
    Ok(())
}

/// Prints every hypervisor identifier a profile may use.
pub fn run_backends() {
    for kind in BackendKind::iter() {
        println!("{}", kind);
    }
}
