//! Execution strategies for batches of independent work items.
//!
//! Provisioning and configuration both hand the strategy a batch of items
//! that share no mutable state: backends during provisioning, per-host step
//! sequences during configuration. The strategy for a phase is chosen once,
//! from whether the phase is listed in `run_in_parallel`.
//!
//! - [`ExecutionStrategy::Sequential`] runs items one at a time in batch order.
//! - [`ExecutionStrategy::Parallel`] gives each item its own named worker
//!   thread and blocks until every worker has finished. Batches smaller than
//!   [`MIN_PARALLEL_BATCH`] run inline.
//!
//! Both strategies return results in batch order and convert a panicking
//! item into [`HypervisorError::WorkerPanic`] for that item only. If a worker
//! thread cannot be spawned, the items not yet dispatched run inline instead.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread;

use strum::Display;
use tracing::{debug, warn};

use crate::error::HypervisorError;
use crate::executor::panic_message;
use crate::options::{GlobalOptions, Phase};

/// Smallest batch that is dispatched to worker threads.
pub const MIN_PARALLEL_BATCH: usize = 2;

/// How a batch of work items is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionStrategy {
    Sequential,
    Parallel,
}

/// Per-item results of a batch, in batch order.
#[derive(Debug)]
pub struct Batch<R> {
    pub results: Vec<Result<R, HypervisorError>>,
    /// Number of items that ran on their own worker thread.
    pub isolated_dispatches: usize,
}

impl ExecutionStrategy {
    /// Selects the strategy for `phase`.
    pub fn for_phase(options: &GlobalOptions, phase: Phase) -> Self {
        if options.run_in_parallel(phase) {
            Self::Parallel
        } else {
            Self::Sequential
        }
    }

    /// Runs every item through `work`.
    ///
    /// Each item carries a label (host or backend name) used for worker
    /// thread names and error messages.
    pub fn run<T, R, F>(&self, phase: Phase, items: Vec<(String, T)>, work: F) -> Batch<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R, HypervisorError> + Sync,
    {
        match self {
            Self::Parallel if items.len() >= MIN_PARALLEL_BATCH => {
                dispatch(phase, items, &work, &mut |_| Ok(()))
            }
            Self::Parallel => {
                debug!("{} batch of {} item(s) runs inline", phase, items.len());
                run_inline(items, &work)
            }
            Self::Sequential => run_inline(items, &work),
        }
    }

    /// Runs items until one fails and returns that failure.
    ///
    /// Sequential batches never start the items after the failed one.
    /// Parallel batches have already dispatched every item, so all workers
    /// are still joined before the first failure in batch order is returned.
    pub fn run_until_failure<T, R, F>(
        &self,
        phase: Phase,
        items: Vec<(String, T)>,
        work: F,
    ) -> Result<Vec<R>, HypervisorError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> Result<R, HypervisorError> + Sync,
    {
        match self {
            Self::Sequential => items
                .into_iter()
                .map(|(label, item)| run_item(&label, item, &work))
                .collect(),
            Self::Parallel => self.run(phase, items, work).results.into_iter().collect(),
        }
    }
}

fn run_item<T, R, F>(label: &str, item: T, work: &F) -> Result<R, HypervisorError>
where
    F: Fn(T) -> Result<R, HypervisorError>,
{
    panic::catch_unwind(AssertUnwindSafe(|| work(item))).unwrap_or_else(|payload| {
        Err(HypervisorError::WorkerPanic {
            label: label.to_string(),
            message: panic_message(&*payload).to_string(),
        })
    })
}

fn run_inline<T, R, F>(items: Vec<(String, T)>, work: &F) -> Batch<R>
where
    F: Fn(T) -> Result<R, HypervisorError>,
{
    let results = items
        .into_iter()
        .map(|(label, item)| run_item(&label, item, work))
        .collect();
    Batch {
        results,
        isolated_dispatches: 0,
    }
}

/// Dispatches one worker thread per item.
///
/// `admit` is consulted before each spawn and may refuse dispatch, which is
/// handled exactly like a failed thread spawn.
fn dispatch<T, R, F>(
    phase: Phase,
    items: Vec<(String, T)>,
    work: &F,
    admit: &mut dyn FnMut(usize) -> std::io::Result<()>,
) -> Batch<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R, HypervisorError> + Sync,
{
    let (labels, slots): (Vec<String>, Vec<Mutex<Option<T>>>) = items
        .into_iter()
        .map(|(label, item)| (label, Mutex::new(Some(item))))
        .unzip();
    let mut results: Vec<Option<Result<R, HypervisorError>>> =
        labels.iter().map(|_| None).collect();
    let mut isolated_dispatches = 0;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(slots.len());
        for (index, (label, slot)) in labels.iter().zip(&slots).enumerate() {
            let spawned = admit(index).and_then(|()| {
                thread::Builder::new()
                    .name(format!("{}-{}", phase, label))
                    .spawn_scoped(scope, move || {
                        let item = slot.lock().ok().and_then(|mut guard| guard.take());
                        match item {
                            Some(item) => run_item(label, item, work),
                            None => Err(HypervisorError::Isolation(format!(
                                "work item for {} was already taken",
                                label
                            ))),
                        }
                    })
            });
            match spawned {
                Ok(handle) => {
                    isolated_dispatches += 1;
                    handles.push((index, handle));
                }
                Err(e) => {
                    let err = HypervisorError::Isolation(format!(
                        "failed to dispatch worker for {}: {}",
                        label, e
                    ));
                    warn!("{}; running remaining {} item(s) inline", err, labels.len() - index);
                    break;
                }
            }
        }

        for (index, handle) in handles {
            results[index] = Some(handle.join().unwrap_or_else(|payload| {
                Err(HypervisorError::WorkerPanic {
                    label: labels[index].clone(),
                    message: panic_message(&*payload).to_string(),
                })
            }));
        }
    });

    let results = results
        .into_iter()
        .zip(labels.iter().zip(slots))
        .map(|(result, (label, slot))| match result {
            Some(result) => result,
            None => match slot.into_inner().ok().flatten() {
                Some(item) => run_item(label, item, work),
                None => Err(HypervisorError::Isolation(format!(
                    "work item for {} was lost",
                    label
                ))),
            },
        })
        .collect();

    Batch {
        results,
        isolated_dispatches,
    }
}
